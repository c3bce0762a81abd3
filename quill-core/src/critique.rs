//! Model-based critique, acceptance policy, and revision loop.
//!
//! A chapter is scored against its brief on fixed axes; the acceptance
//! policy turns the scores into a verdict with human-readable reasons.
//! Rejected chapters are revised with the critique embedded verbatim, up to
//! a pass budget, and the best-scoring text seen wins even when no pass
//! reaches acceptance.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::artifact::ChapterBrief;
use crate::error::BackendError;
use crate::extract::extract_value;
use crate::generator::{generate_with_retry, GenerationRequest, TextGenerator};
use crate::prompts;
use crate::quality::count_words;

/// The axes the critic scores, in rubric order.
pub const CRITIQUE_AXES: [&str; 10] = [
    "plot",
    "character",
    "prose",
    "continuity",
    "pacing",
    "dialogue",
    "setting",
    "tension",
    "theme",
    "voice",
];

/// One scored axis, 0.0 to 1.0, with the critic's reasoning.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AxisScore {
    pub axis: String,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub rationale: String,
}

impl AxisScore {
    pub fn new(axis: impl Into<String>, score: f64) -> Self {
        AxisScore {
            axis: axis.into(),
            score,
            rationale: String::new(),
        }
    }
}

/// What the critic said about one chapter.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CritiqueFindings {
    #[serde(default)]
    pub scores: Vec<AxisScore>,
    #[serde(default)]
    pub red_flags: Vec<String>,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub fix_list: Vec<String>,
    /// The critic's own verdict that the chapter needs no revision.
    /// Advisory: the policy still decides acceptance, but a rejected
    /// chapter the critic would keep stops the revision loop.
    #[serde(default)]
    pub keep_as_is: bool,
}

impl CritiqueFindings {
    /// Mean of the axis scores; an unscored chapter is a 0.0 chapter.
    pub fn overall(&self) -> f64 {
        if self.scores.is_empty() {
            return 0.0;
        }
        self.scores.iter().map(|s| s.score).sum::<f64>() / self.scores.len() as f64
    }

    /// Zero-score findings carrying only the given red flags. Used when the
    /// critic's reply is unusable: an unscoreable chapter is a rejected one.
    pub fn unscoreable(red_flags: Vec<String>) -> Self {
        CritiqueFindings {
            red_flags,
            ..CritiqueFindings::default()
        }
    }
}

/// Thresholds a chapter must clear to be accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptancePolicy {
    pub min_overall_score: f64,
    pub min_axis_score: f64,
    pub allow_red_flags: bool,
}

impl Default for AcceptancePolicy {
    fn default() -> Self {
        AcceptancePolicy {
            min_overall_score: 0.78,
            min_axis_score: 0.7,
            allow_red_flags: false,
        }
    }
}

impl AcceptancePolicy {
    /// Apply the policy. The reasons list is empty exactly when accepted,
    /// and each reason quotes the failing score or flag verbatim.
    pub fn accept(&self, findings: &CritiqueFindings) -> (bool, Vec<String>) {
        let mut reasons = Vec::new();
        let overall = findings.overall();
        if overall < self.min_overall_score {
            reasons.push(format!(
                "overall score {overall:.2} is below the minimum {:.2}",
                self.min_overall_score
            ));
        }
        for axis in &findings.scores {
            if axis.score < self.min_axis_score {
                reasons.push(format!(
                    "{} score {:.2} is below the minimum {:.2}",
                    axis.axis, axis.score, self.min_axis_score
                ));
            }
        }
        if !self.allow_red_flags {
            for flag in &findings.red_flags {
                reasons.push(format!("red flag: {flag}"));
            }
        }
        (reasons.is_empty(), reasons)
    }
}

/// Result of one critique-revise pass.
#[derive(Debug, Clone)]
pub struct PassResult {
    pub findings: CritiqueFindings,
    pub accepted: bool,
    pub reasons: Vec<String>,
}

/// Story state the critic reads but must not repeat back: where the
/// narrative stands, how the last chapter ended, and what the project
/// constraints demand.
#[derive(Debug, Clone, Default)]
pub struct CritiqueContext {
    pub story_so_far: String,
    pub previous_excerpt: Option<String>,
    pub constraints_summary: String,
}

/// Final result of the improvement loop.
#[derive(Debug, Clone)]
pub struct ImproveOutcome {
    /// The best-scoring text seen across all passes.
    pub text: String,
    pub accepted: bool,
    /// Rejection reasons for the returned text; empty when accepted.
    pub reasons: Vec<String>,
    /// Critique passes actually run.
    pub passes: u32,
    /// Every pass's findings and verdict, in order, for audit.
    pub trace: Vec<PassResult>,
}

/// Knobs for the improvement loop.
#[derive(Debug, Clone)]
pub struct CritiqueConfig {
    pub policy: AcceptancePolicy,
    pub max_passes: u32,
    pub backend_retries: u32,
    pub retry_backoff: Duration,
    /// Word-length tolerance used for the mechanical length red flag.
    pub length_tolerance: f64,
}

impl Default for CritiqueConfig {
    fn default() -> Self {
        CritiqueConfig {
            policy: AcceptancePolicy::default(),
            max_passes: 3,
            backend_retries: 2,
            retry_backoff: Duration::from_secs(2),
            length_tolerance: 0.25,
        }
    }
}

/// Critiques and revises chapters through a [`TextGenerator`].
pub struct CritiqueEngine {
    config: CritiqueConfig,
}

impl CritiqueEngine {
    pub fn new(config: CritiqueConfig) -> Self {
        CritiqueEngine { config }
    }

    pub fn policy(&self) -> &AcceptancePolicy {
        &self.config.policy
    }

    /// Mechanical defects the critic must treat as red flags: gross length
    /// misses, duplicated lines, and denylisted phrases.
    pub fn local_red_flags(
        &self,
        brief: &ChapterBrief,
        text: &str,
        denylist: &[String],
    ) -> Vec<String> {
        let mut flags = Vec::new();

        let words = count_words(text);
        let target = brief.meta.target_words as f64;
        let low = (target * (1.0 - self.config.length_tolerance)) as usize;
        let high = (target * (1.0 + self.config.length_tolerance)) as usize;
        if words < low || words > high {
            flags.push(format!(
                "chapter is {words} words; the acceptable range is {low} to {high}"
            ));
        }

        let mut seen: HashMap<&str, usize> = HashMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.len() >= 25 {
                *seen.entry(line).or_insert(0) += 1;
            }
        }
        let mut duplicates: Vec<(&str, usize)> =
            seen.into_iter().filter(|(_, count)| *count > 1).collect();
        duplicates.sort();
        for (line, count) in duplicates {
            flags.push(format!("the line \"{line}\" appears {count} times"));
        }

        let lowered = text.to_lowercase();
        for phrase in denylist {
            if !phrase.is_empty() && lowered.contains(&phrase.to_lowercase()) {
                flags.push(format!("the banned phrase \"{phrase}\" appears in the chapter"));
            }
        }

        flags
    }

    /// Run one critique pass: score the chapter and apply the policy.
    pub async fn critique_once<G: TextGenerator + ?Sized>(
        &self,
        generator: &G,
        brief: &ChapterBrief,
        text: &str,
        context: &CritiqueContext,
        denylist: &[String],
    ) -> Result<PassResult, BackendError> {
        let local_flags = self.local_red_flags(brief, text, denylist);
        let prompt = prompts::critique_prompt(brief, text, context, &local_flags);
        let findings = self
            .request_findings(generator, prompt, local_flags)
            .await?;
        let (accepted, reasons) = self.config.policy.accept(&findings);
        Ok(PassResult {
            findings,
            accepted,
            reasons,
        })
    }

    /// Critique and revise up to the pass budget, returning the
    /// best-scoring text evaluated, accepted or not.
    pub async fn improve_up_to<G: TextGenerator + ?Sized>(
        &self,
        generator: &G,
        brief: &ChapterBrief,
        initial_text: String,
        context: &CritiqueContext,
        denylist: &[String],
    ) -> Result<ImproveOutcome, BackendError> {
        let mut current = initial_text;
        let mut best: Option<(f64, String, Vec<String>)> = None;
        let mut trace = Vec::new();
        let mut passes = 0;

        while passes < self.config.max_passes {
            passes += 1;
            let result = self
                .critique_once(generator, brief, &current, context, denylist)
                .await?;
            let score = result.findings.overall();
            tracing::debug!(pass = passes, score, accepted = result.accepted, "critique pass");

            if best.as_ref().map(|(s, _, _)| score > *s).unwrap_or(true) {
                best = Some((score, current.clone(), result.reasons.clone()));
            }
            trace.push(result.clone());
            if result.accepted {
                return Ok(ImproveOutcome {
                    text: current,
                    accepted: true,
                    reasons: Vec::new(),
                    passes,
                    trace,
                });
            }
            // A critic that would keep the chapter has nothing for the
            // reviser to act on.
            if result.findings.keep_as_is {
                tracing::debug!(pass = passes, "critic kept the chapter, stopping revision");
                break;
            }
            if passes == self.config.max_passes {
                break;
            }

            let prompt =
                prompts::revision_prompt(brief, &current, &result.findings, &result.reasons);
            let request = GenerationRequest::new(prompt)
                .with_options(revision_options());
            let completion = generate_with_retry(
                generator,
                request,
                self.config.backend_retries,
                self.config.retry_backoff,
            )
            .await?;
            // Revision without markers is discarded; the current text stands.
            if let Some(revised) = prompts::extract_revised(&completion.text) {
                current = revised.to_string();
            } else {
                tracing::warn!(pass = passes, "revision reply missing markers, keeping current text");
            }
        }

        let (_, text, reasons) = best.unwrap_or((0.0, current, Vec::new()));
        Ok(ImproveOutcome {
            text,
            accepted: false,
            reasons,
            passes,
            trace,
        })
    }

    /// Ask the critic for findings, with one corrective retry for a
    /// non-JSON reply. Two unusable replies yield zero-score findings so
    /// the chapter is rejected rather than silently accepted.
    async fn request_findings<G: TextGenerator + ?Sized>(
        &self,
        generator: &G,
        prompt: String,
        local_flags: Vec<String>,
    ) -> Result<CritiqueFindings, BackendError> {
        for corrective in 0..2 {
            let text = if corrective == 0 {
                prompt.clone()
            } else {
                prompts::json_corrective().to_string()
            };
            let request = GenerationRequest::new(text)
                .with_options(critique_options())
                .json();
            let completion = generate_with_retry(
                generator,
                request,
                self.config.backend_retries,
                self.config.retry_backoff,
            )
            .await?;
            if let Ok(value) = extract_value(&completion.text) {
                if let Ok(findings) = serde_json::from_value::<CritiqueFindings>(value) {
                    return Ok(findings);
                }
            }
        }
        let mut flags = vec!["the critique could not be parsed".to_string()];
        flags.extend(local_flags);
        Ok(CritiqueFindings::unscoreable(flags))
    }
}

/// Low-temperature options for scoring.
fn critique_options() -> ollama::Options {
    let mut options = ollama::Options::structured();
    options.temperature = 0.3;
    options
}

/// Mid-temperature options for revision: creative but anchored.
fn revision_options() -> ollama::Options {
    let mut options = ollama::Options::drafting();
    options.temperature = 0.85;
    options
}
