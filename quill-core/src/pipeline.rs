//! Pipeline orchestrator.
//!
//! Wires the stages together for one book project: plan, then for each
//! chapter draft-check-redraft, critique-revise, extract continuity, commit
//! the ledger, and write the manuscript page. The ledger is only updated
//! after a chapter is fully processed, so a crash mid-chapter leaves the
//! previous snapshot intact and the run can resume from it.

use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;

use crate::artifact::{
    book_plan_schema, chapter_brief_schema, continuity_extract_schema, BookPlan, ChapterBrief,
    ChapterOutline, ContinuityExtract,
};
use crate::constraints::ProjectConstraints;
use crate::critique::{CritiqueConfig, CritiqueContext, CritiqueEngine};
use crate::decoding;
use crate::engine::{
    BriefBaselines, EngineOutcome, NoDomainRules, PlanBaselines, RepairConfig, RepairEngine,
};
use crate::error::PipelineError;
use crate::generator::{generate_with_retry, GenerationRequest, TextGenerator};
use crate::ledger::{LedgerStore, NarrativeLedger, RoundUpdate};
use crate::manuscript;
use crate::prompts;
use crate::quality::{count_words, split_analysis, Issue, QualityChecker};
use crate::schema::SchemaValidator;

/// Knobs for one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Draft attempts per chapter before the best draft proceeds anyway.
    pub max_generation_attempts: u32,
    /// Critique-revise passes per chapter.
    pub max_critique_passes: u32,
    /// Transport retries per backend call.
    pub backend_retries: u32,
    pub retry_backoff: Duration,
    /// Character budget for the story-so-far block.
    pub context_budget: usize,
    /// Base decoding options for chapter drafting.
    pub draft_options: ollama::Options,
    /// Directory manuscript pages are written to.
    pub out_dir: PathBuf,
    /// Path of the ledger snapshot.
    pub ledger_path: PathBuf,
}

impl PipelineConfig {
    /// Defaults rooted at a project directory: pages under
    /// `<root>/manuscript`, snapshot at `<root>/ledger.json`.
    pub fn rooted_at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        PipelineConfig {
            max_generation_attempts: 3,
            max_critique_passes: 3,
            backend_retries: 2,
            retry_backoff: Duration::from_secs(2),
            context_budget: 4000,
            draft_options: ollama::Options::drafting(),
            out_dir: root.join("manuscript"),
            ledger_path: root.join("ledger.json"),
        }
    }
}

/// What happened to one chapter.
#[derive(Debug, Clone)]
pub struct ChapterReport {
    pub round: u32,
    pub title: String,
    /// Where the page was written.
    pub path: PathBuf,
    pub word_count: usize,
    /// Draft attempts used by the quality loop.
    pub draft_attempts: u32,
    /// Local issues still present in the published draft.
    pub remaining_issues: Vec<String>,
    /// Whether the critique policy accepted the published text.
    pub accepted: bool,
    /// Rejection reasons for the published text; empty when accepted.
    pub rejection_reasons: Vec<String>,
    pub critique_passes: u32,
    /// Violations left if continuity extraction exhausted its budget.
    pub continuity_violations: Vec<String>,
}

/// Drives a whole book project through a [`TextGenerator`].
pub struct Pipeline<G: TextGenerator> {
    generator: G,
    constraints: ProjectConstraints,
    config: PipelineConfig,
    ledger: NarrativeLedger,
    store: LedgerStore,
    /// Closing lines of the previous chapter, for drafting continuity.
    previous_tail: Option<String>,
}

impl<G: TextGenerator> Pipeline<G> {
    /// Build a pipeline, resuming from an existing ledger snapshot when one
    /// is present at the configured path.
    pub async fn new(
        generator: G,
        constraints: ProjectConstraints,
        config: PipelineConfig,
    ) -> Result<Self, PipelineError> {
        let store = LedgerStore::new(&config.ledger_path);
        let ledger = store.load().await?;
        let mut previous_tail = None;
        if ledger.last_round() > 0 {
            tracing::info!(
                last_round = ledger.last_round(),
                "resuming from existing ledger snapshot"
            );
            // Rehydrate the closing lines of the last committed chapter so
            // the next one picks up where the manuscript left off.
            if let Some(last) = ledger.rounds.last() {
                let page = config
                    .out_dir
                    .join(manuscript::page_file_name(last.round, &last.title));
                match tokio::fs::read_to_string(&page).await {
                    Ok(text) => previous_tail = Some(tail_of(&text, 60)),
                    Err(error) => tracing::warn!(
                        page = %page.display(),
                        %error,
                        "last manuscript page unreadable, drafting without its tail"
                    ),
                }
            }
        }
        Ok(Pipeline {
            generator,
            constraints,
            config,
            ledger,
            store,
            previous_tail,
        })
    }

    pub fn ledger(&self) -> &NarrativeLedger {
        &self.ledger
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    /// The next chapter round to write, based on the ledger.
    pub fn next_round(&self) -> u32 {
        self.ledger.last_round() + 1
    }

    fn repair_config(&self) -> RepairConfig {
        RepairConfig {
            max_attempts: self.config.max_generation_attempts,
            backend_retries: self.config.backend_retries,
            retry_backoff: self.config.retry_backoff,
        }
    }

    // ========================================================
    // Planning
    // ========================================================

    /// Generate a schema-valid book plan from the author's materials,
    /// repairing against `baselines` until it reproduces the ground truth.
    pub async fn plan_book(
        &self,
        materials: &str,
        baselines: &PlanBaselines,
    ) -> Result<BookPlan, PipelineError> {
        let validator = SchemaValidator::new(book_plan_schema())?;
        let engine = RepairEngine::new(&validator, baselines, self.repair_config());
        let prompt = prompts::plan_prompt(materials, validator.schema());

        let outcome = engine
            .run(
                &self.generator,
                Some(prompts::planner_system()),
                prompt,
                ollama::Options::structured(),
            )
            .await
            .map_err(|source| PipelineError::Backend {
                attempts: self.config.max_generation_attempts,
                source,
            })?;

        match outcome {
            EngineOutcome::Accepted { value, attempts } => {
                tracing::info!(attempts, "book plan accepted");
                Ok(serde_json::from_value(value)?)
            }
            EngineOutcome::Exhausted {
                last_value,
                violations,
                attempts,
            } => Err(PipelineError::PlanExhausted {
                attempts,
                violations,
                last_artifact: last_value,
            }),
        }
    }

    /// Expand one outline entry into a full chapter brief, repairing until
    /// the brief's meta reproduces the outline exactly. Exhaustion falls
    /// back to a minimal brief built straight from the outline.
    pub async fn plan_chapter(
        &self,
        plan: &BookPlan,
        outline: &ChapterOutline,
    ) -> Result<ChapterBrief, PipelineError> {
        let validator = SchemaValidator::new(chapter_brief_schema())?;
        let baselines = BriefBaselines {
            chapter_number: outline.number,
            chapter_title: outline.title.clone(),
            target_words: outline.target_words,
        };
        let engine = RepairEngine::new(&validator, &baselines, self.repair_config());
        let story_so_far = self
            .ledger
            .get_contextual_summary(outline.number, self.config.context_budget);
        let prompt =
            prompts::chapter_brief_prompt(plan, outline, &story_so_far, validator.schema());

        let outcome = engine
            .run(
                &self.generator,
                Some(prompts::planner_system()),
                prompt,
                ollama::Options::structured(),
            )
            .await
            .map_err(|source| PipelineError::Backend {
                attempts: self.config.max_generation_attempts,
                source,
            })?;

        match outcome {
            EngineOutcome::Accepted { value, attempts } => {
                tracing::debug!(round = outline.number, attempts, "chapter brief accepted");
                Ok(serde_json::from_value(value)?)
            }
            EngineOutcome::Exhausted {
                last_value,
                violations,
                ..
            } => {
                tracing::warn!(
                    round = outline.number,
                    violations = violations.len(),
                    "chapter brief exhausted, falling back to the outline"
                );
                let mut brief: ChapterBrief = last_value
                    .and_then(|value| serde_json::from_value(value).ok())
                    .unwrap_or_else(|| ChapterBrief::from_outline(outline));
                // The outline stays the source of truth for identity fields.
                brief.meta.chapter_number = outline.number;
                brief.meta.chapter_title = outline.title.clone();
                brief.meta.target_words = outline.target_words;
                Ok(brief)
            }
        }
    }

    // ========================================================
    // Chapters
    // ========================================================

    /// Write every chapter of `plan` that the ledger has not seen yet.
    pub async fn write_book(&mut self, plan: &BookPlan) -> Result<Vec<ChapterReport>, PipelineError> {
        let mut reports = Vec::new();
        for outline in &plan.chapter_outline {
            if outline.number <= self.ledger.last_round() {
                tracing::debug!(round = outline.number, "chapter already in ledger, skipping");
                continue;
            }
            let brief = self.plan_chapter(plan, outline).await?;
            reports.push(self.write_chapter(&brief).await?);
        }
        Ok(reports)
    }

    /// Draft, check, critique, and publish one chapter, then commit its
    /// continuity facts to the ledger.
    pub async fn write_chapter(
        &mut self,
        brief: &ChapterBrief,
    ) -> Result<ChapterReport, PipelineError> {
        let round = brief.meta.chapter_number;
        let title = brief.meta.chapter_title.clone();
        tracing::info!(round, title = %title, "writing chapter");

        let story_so_far = self
            .ledger
            .get_contextual_summary(round, self.config.context_budget);

        let (draft, draft_attempts, remaining_issues) =
            self.draft_with_checks(brief, &story_so_far).await?;

        let critique = CritiqueEngine::new(CritiqueConfig {
            max_passes: self.config.max_critique_passes,
            backend_retries: self.config.backend_retries,
            retry_backoff: self.config.retry_backoff,
            ..CritiqueConfig::default()
        });
        let context = CritiqueContext {
            story_so_far: story_so_far.clone(),
            previous_excerpt: self.previous_tail.clone(),
            constraints_summary: self.constraints.render_for_prompt(),
        };
        let improved = critique
            .improve_up_to(&self.generator, brief, draft, &context, &self.constraints.denylist)
            .await
            .map_err(|source| PipelineError::Backend {
                attempts: self.config.max_critique_passes,
                source,
            })?;
        if !improved.accepted {
            tracing::warn!(
                round,
                reasons = improved.reasons.len(),
                "publishing best rejected text"
            );
        }
        let chapter = improved.text;
        let word_count = count_words(&chapter);

        let (extract, continuity_violations) = self.extract_continuity(round, &chapter).await?;

        self.ledger.apply_update(RoundUpdate::from_extract(
            round,
            title.clone(),
            extract,
            word_count,
        ));
        self.store.save(&self.ledger).await?;

        let path = manuscript::save_page(&self.config.out_dir, round, &title, &chapter).await?;
        self.previous_tail = Some(tail_of(&chapter, 60));
        tracing::info!(round, words = word_count, path = %path.display(), "chapter committed");

        Ok(ChapterReport {
            round,
            title,
            path,
            word_count,
            draft_attempts,
            remaining_issues,
            accepted: improved.accepted,
            rejection_reasons: improved.reasons,
            critique_passes: improved.passes,
            continuity_violations,
        })
    }

    /// The draft-check-redraft loop. Returns the last draft with whatever
    /// issues remain after the attempt budget.
    async fn draft_with_checks(
        &self,
        brief: &ChapterBrief,
        story_so_far: &str,
    ) -> Result<(String, u32, Vec<String>), PipelineError> {
        let checker = QualityChecker::standard(
            brief.meta.target_words as usize,
            self.constraints.denylist.clone(),
            merged_interiority_terms(&self.constraints, brief),
            self.constraints.pov.pov.is_objective(),
        );
        let system = prompts::writer_system(&self.constraints.render_for_prompt());
        let previous_tail = self.previous_tail.as_deref().unwrap_or("");

        let mut prose = String::new();
        let mut issues: Vec<Issue> = Vec::new();
        let mut attempts = 0;

        while attempts < self.config.max_generation_attempts {
            attempts += 1;
            let prompt = if attempts == 1 {
                prompts::chapter_prompt(brief, story_so_far, previous_tail)
            } else {
                let messages: Vec<String> =
                    issues.iter().map(|i| i.message.clone()).collect();
                prompts::quality_revision_prompt(brief, &prose, &messages)
            };
            // Retries escalate the sampler against the issues just seen.
            let options = if attempts == 1 {
                self.config.draft_options.clone()
            } else {
                decoding::adjust(&self.config.draft_options, &issues, attempts - 2)
            };

            let request = GenerationRequest::new(prompt)
                .with_system(system.clone())
                .with_options(options);
            let completion = generate_with_retry(
                &self.generator,
                request,
                self.config.backend_retries,
                self.config.retry_backoff,
            )
            .await
            .map_err(|source| PipelineError::Backend { attempts, source })?;

            prose = split_analysis(&completion.text).prose;
            issues = checker.check(&prose);
            tracing::debug!(
                round = brief.meta.chapter_number,
                attempt = attempts,
                issues = issues.len(),
                "draft checked"
            );
            if issues.is_empty() {
                break;
            }
        }

        let remaining = issues.into_iter().map(|i| i.message).collect();
        Ok((prose, attempts, remaining))
    }

    /// Pull continuity facts out of a finished chapter. Exhaustion falls
    /// back to an empty extract carrying only a summary, and the violations
    /// are reported rather than swallowed.
    async fn extract_continuity(
        &self,
        round: u32,
        chapter: &str,
    ) -> Result<(ContinuityExtract, Vec<String>), PipelineError> {
        let validator = SchemaValidator::new(continuity_extract_schema())?;
        let engine = RepairEngine::new(&validator, &NoDomainRules, self.repair_config());
        let prompt = prompts::continuity_prompt(round, chapter, validator.schema());

        let outcome = engine
            .run(&self.generator, None, prompt, ollama::Options::structured())
            .await
            .map_err(|source| PipelineError::Backend {
                attempts: self.config.max_generation_attempts,
                source,
            })?;

        match outcome {
            EngineOutcome::Accepted { value, .. } => Ok((serde_json::from_value(value)?, Vec::new())),
            EngineOutcome::Exhausted {
                last_value,
                violations,
                ..
            } => {
                tracing::warn!(
                    round,
                    violations = violations.len(),
                    "continuity extraction exhausted, using fallback"
                );
                let extract = last_value
                    .and_then(lenient_extract)
                    .unwrap_or_else(|| ContinuityExtract {
                        summary: format!("Chapter {round} was written."),
                        ..ContinuityExtract::default()
                    });
                Ok((extract, violations))
            }
        }
    }
}

/// Decode an off-schema payload leniently, keeping whatever fields fit.
fn lenient_extract(value: Value) -> Option<ContinuityExtract> {
    serde_json::from_value(value).ok()
}

/// The last `words` words of a text.
fn tail_of(text: &str, words: usize) -> String {
    let all: Vec<&str> = text.split_whitespace().collect();
    let skip = all.len().saturating_sub(words);
    all[skip..].join(" ")
}

fn merged_interiority_terms(constraints: &ProjectConstraints, brief: &ChapterBrief) -> Vec<String> {
    let mut terms = constraints.pov.forbidden_terms.clone();
    for term in &brief.style_checks.forbid_inner_monologue_terms {
        if !terms.contains(term) {
            terms.push(term.clone());
        }
    }
    terms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail_of() {
        assert_eq!(tail_of("a b c d", 2), "c d");
        assert_eq!(tail_of("a b", 10), "a b");
    }

    #[test]
    fn test_config_rooted_at() {
        let config = PipelineConfig::rooted_at("/tmp/project");
        assert_eq!(config.out_dir, PathBuf::from("/tmp/project/manuscript"));
        assert_eq!(config.ledger_path, PathBuf::from("/tmp/project/ledger.json"));
        assert_eq!(config.max_generation_attempts, 3);
    }
}
