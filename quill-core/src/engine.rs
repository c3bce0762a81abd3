//! Generate-validate-repair loop for structured artifacts.
//!
//! One engine run produces a schema-valid (and domain-valid) JSON value or
//! exhausts its attempt budget. Each failed attempt feeds the next prompt
//! the exact rejected payload and the exact violations, never paraphrases.

use serde_json::Value;
use std::time::Duration;

use crate::error::BackendError;
use crate::extract::extract_value;
use crate::generator::{generate_with_retry, GenerationRequest, TextGenerator};
use crate::prompts;
use crate::schema::{SchemaValidator, ValidationVerdict};

/// Budget and retry knobs for one engine run.
#[derive(Debug, Clone)]
pub struct RepairConfig {
    /// Full generation attempts before giving up.
    pub max_attempts: u32,
    /// Transport-level retries per backend call.
    pub backend_retries: u32,
    /// Backoff between transport retries.
    pub retry_backoff: Duration,
}

impl Default for RepairConfig {
    fn default() -> Self {
        RepairConfig {
            max_attempts: 3,
            backend_retries: 2,
            retry_backoff: Duration::from_secs(2),
        }
    }
}

/// How an engine run ended.
#[derive(Debug, Clone)]
pub enum EngineOutcome {
    /// A payload passed schema and domain validation.
    Accepted { value: Value, attempts: u32 },
    /// The attempt budget ran out. Carries the last payload (if any attempt
    /// produced parseable JSON) and the violations from the final attempt.
    Exhausted {
        last_value: Option<Value>,
        violations: Vec<String>,
        attempts: u32,
    },
}

/// Domain checks applied on top of the schema.
pub trait DomainRules: Send + Sync {
    fn verdict(&self, value: &Value) -> ValidationVerdict;
}

/// Accept anything the schema accepts.
pub struct NoDomainRules;

impl DomainRules for NoDomainRules {
    fn verdict(&self, _value: &Value) -> ValidationVerdict {
        ValidationVerdict::valid()
    }
}

/// Ground-truth facts a generated book plan must reproduce exactly.
#[derive(Debug, Clone, Default)]
pub struct PlanBaselines {
    /// Exact title the plan must carry.
    pub title: Option<String>,
    /// Exact author name the plan must carry.
    pub author: Option<String>,
    /// Acceptable values for `project.genre`; empty allows any.
    pub allowed_genres: Vec<String>,
    /// Genres `project.genre` must not be.
    pub disallowed_genres: Vec<String>,
    /// Names that must appear among the plan's characters, or failing that,
    /// verbatim somewhere in the serialized plan.
    pub required_entities: Vec<String>,
    /// Terms that must not appear anywhere in the serialized plan.
    pub forbidden_terms: Vec<String>,
    /// JSON pointers whose values must be empty (missing, null, `""`,
    /// `[]`, or `{}`).
    pub require_empty: Vec<String>,
    pub min_characters: usize,
    pub min_chapters: usize,
}

impl DomainRules for PlanBaselines {
    fn verdict(&self, value: &Value) -> ValidationVerdict {
        let mut violations = Vec::new();
        let serialized = value.to_string();

        if let Some(expected) = &self.title {
            let found = value
                .pointer("/project/title")
                .and_then(Value::as_str)
                .unwrap_or("");
            if found != expected {
                violations.push(format!(
                    "project.title {found:?} must equal {expected:?}."
                ));
            }
        }
        if let Some(expected) = &self.author {
            let found = value
                .pointer("/project/author")
                .and_then(Value::as_str)
                .unwrap_or("");
            if found != expected {
                violations.push(format!(
                    "project.author {found:?} must equal {expected:?}."
                ));
            }
        }

        let genre = value
            .pointer("/project/genre")
            .and_then(Value::as_str)
            .unwrap_or("");
        if !self.allowed_genres.is_empty()
            && !self
                .allowed_genres
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(genre))
        {
            violations.push(format!(
                "project.genre {genre:?} must be one of {:?}.",
                self.allowed_genres
            ));
        }
        for banned in &self.disallowed_genres {
            if banned.eq_ignore_ascii_case(genre) {
                violations.push(format!("project.genre must not be {banned:?}."));
            }
        }

        let characters = value.get("characters").and_then(Value::as_object);
        for entity in &self.required_entities {
            let named = characters
                .map(|c| c.keys().any(|name| name == entity))
                .unwrap_or(false);
            if !named && !serialized.contains(entity.as_str()) {
                violations.push(format!(
                    "the entity {entity:?} must appear in the plan."
                ));
            }
        }

        for pointer in &self.require_empty {
            let empty = match value.pointer(pointer) {
                None | Some(Value::Null) => true,
                Some(Value::String(s)) => s.is_empty(),
                Some(Value::Array(a)) => a.is_empty(),
                Some(Value::Object(o)) => o.is_empty(),
                Some(_) => false,
            };
            if !empty {
                violations.push(format!("the field at {pointer:?} must be empty."));
            }
        }
        if let Some(characters) = characters {
            if characters.len() < self.min_characters {
                violations.push(format!(
                    "characters has {} entries, at least {} are required.",
                    characters.len(),
                    self.min_characters
                ));
            }
        }

        if let Some(outline) = value.get("chapter_outline").and_then(Value::as_array) {
            if outline.len() < self.min_chapters {
                violations.push(format!(
                    "chapter_outline has {} chapters, at least {} are required.",
                    outline.len(),
                    self.min_chapters
                ));
            }
        }

        if !self.forbidden_terms.is_empty() {
            let lowered = serialized.to_lowercase();
            for term in &self.forbidden_terms {
                if lowered.contains(&term.to_lowercase()) {
                    violations.push(format!(
                        "the forbidden term {term:?} appears in the plan."
                    ));
                }
            }
        }

        ValidationVerdict::invalid(violations)
    }
}

/// Identity fields a generated chapter brief must copy from its outline.
#[derive(Debug, Clone, Default)]
pub struct BriefBaselines {
    pub chapter_number: u32,
    pub chapter_title: String,
    pub target_words: u32,
}

impl DomainRules for BriefBaselines {
    fn verdict(&self, value: &Value) -> ValidationVerdict {
        let mut violations = Vec::new();

        let number = value
            .pointer("/meta/chapter_number")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        if number != u64::from(self.chapter_number) {
            violations.push(format!(
                "meta.chapter_number {number} must equal {}.",
                self.chapter_number
            ));
        }
        let title = value
            .pointer("/meta/chapter_title")
            .and_then(Value::as_str)
            .unwrap_or("");
        if title != self.chapter_title {
            violations.push(format!(
                "meta.chapter_title {title:?} must equal {:?}.",
                self.chapter_title
            ));
        }
        let words = value
            .pointer("/meta/target_words")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        if words != u64::from(self.target_words) {
            violations.push(format!(
                "meta.target_words {words} must equal {}.",
                self.target_words
            ));
        }

        ValidationVerdict::invalid(violations)
    }
}

/// Drives a generator until a payload validates or the budget runs out.
pub struct RepairEngine<'a> {
    schema: &'a SchemaValidator,
    domain: &'a dyn DomainRules,
    config: RepairConfig,
}

impl<'a> RepairEngine<'a> {
    pub fn new(
        schema: &'a SchemaValidator,
        domain: &'a dyn DomainRules,
        config: RepairConfig,
    ) -> Self {
        RepairEngine {
            schema,
            domain,
            config,
        }
    }

    /// Run the loop. `initial_prompt` already carries the coercion block;
    /// repair prompts are built here from each rejected payload.
    pub async fn run<G: TextGenerator + ?Sized>(
        &self,
        generator: &G,
        system: Option<&str>,
        initial_prompt: String,
        options: ollama::Options,
    ) -> Result<EngineOutcome, BackendError> {
        let mut prompt = initial_prompt;
        let mut last_value: Option<Value> = None;
        let mut last_violations: Vec<String> = Vec::new();

        for attempt in 1..=self.config.max_attempts {
            let value = match self
                .generate_json(generator, system, &prompt, options.clone())
                .await?
            {
                Some(value) => value,
                None => {
                    // Two replies in a row with no parseable JSON burn the
                    // whole attempt; the next one re-sends the same prompt.
                    tracing::warn!(attempt, "no parseable JSON after corrective retry");
                    last_violations = vec!["the reply contained no parseable JSON".to_string()];
                    continue;
                }
            };

            let verdict = self.schema.verdict(&value).merge(self.domain.verdict(&value));
            if verdict.is_valid {
                tracing::debug!(attempt, "structured artifact accepted");
                return Ok(EngineOutcome::Accepted { value, attempts: attempt });
            }

            tracing::debug!(
                attempt,
                violations = verdict.violations.len(),
                "structured artifact rejected"
            );
            prompt = prompts::repair_prompt(&value, &verdict.violations, self.schema.schema());
            last_value = Some(value);
            last_violations = verdict.violations;
        }

        Ok(EngineOutcome::Exhausted {
            last_value,
            violations: last_violations,
            attempts: self.config.max_attempts,
        })
    }

    /// One attempt: call the backend, extract JSON, with one corrective
    /// retry if the reply carried no JSON at all.
    async fn generate_json<G: TextGenerator + ?Sized>(
        &self,
        generator: &G,
        system: Option<&str>,
        prompt: &str,
        options: ollama::Options,
    ) -> Result<Option<Value>, BackendError> {
        for corrective in 0..2 {
            let text = if corrective == 0 {
                prompt.to_string()
            } else {
                prompts::json_corrective().to_string()
            };
            let mut request = GenerationRequest::new(text).with_options(options.clone()).json();
            if let Some(system) = system {
                request = request.with_system(system);
            }
            let completion = generate_with_retry(
                generator,
                request,
                self.config.backend_retries,
                self.config.retry_backoff,
            )
            .await?;
            if let Ok(value) = extract_value(&completion.text) {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockGenerator;
    use serde_json::json;

    fn validator() -> SchemaValidator {
        SchemaValidator::new(json!({
            "type": "object",
            "required": ["title"],
            "properties": {"title": {"type": "string", "minLength": 1}}
        }))
        .unwrap()
    }

    fn config() -> RepairConfig {
        RepairConfig {
            max_attempts: 3,
            backend_retries: 0,
            retry_backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_accepts_first_valid_payload() {
        let schema = validator();
        let engine = RepairEngine::new(&schema, &NoDomainRules, config());
        let mock = MockGenerator::new(vec![r#"{"title": "x"}"#.to_string()]);
        let outcome = engine
            .run(&mock, None, "go".to_string(), ollama::Options::structured())
            .await
            .unwrap();
        assert!(matches!(outcome, EngineOutcome::Accepted { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn test_repair_prompt_carries_rejected_payload() {
        let schema = validator();
        let engine = RepairEngine::new(&schema, &NoDomainRules, config());
        let mock = MockGenerator::new(vec![
            r#"{"title": ""}"#.to_string(),
            r#"{"title": "fixed"}"#.to_string(),
        ]);
        let outcome = engine
            .run(&mock, None, "go".to_string(), ollama::Options::structured())
            .await
            .unwrap();
        assert!(matches!(outcome, EngineOutcome::Accepted { attempts: 2, .. }));

        let requests = mock.requests();
        assert!(requests[1].prompt.contains(r#""title": """#));
        assert!(requests[1].prompt.contains("/title"));
    }

    #[tokio::test]
    async fn test_corrective_retry_on_prose_reply() {
        let schema = validator();
        let engine = RepairEngine::new(&schema, &NoDomainRules, config());
        let mock = MockGenerator::new(vec![
            "Sure! Here is your plan.".to_string(),
            r#"{"title": "x"}"#.to_string(),
        ]);
        let outcome = engine
            .run(&mock, None, "go".to_string(), ollama::Options::structured())
            .await
            .unwrap();
        // The corrective retry happens within attempt 1.
        assert!(matches!(outcome, EngineOutcome::Accepted { attempts: 1, .. }));
        assert!(mock.requests()[1].prompt.contains("ONLY the JSON"));
    }

    #[tokio::test]
    async fn test_exhaustion_reports_final_violations() {
        let schema = validator();
        let engine = RepairEngine::new(&schema, &NoDomainRules, config());
        let mock = MockGenerator::new(vec![
            r#"{"title": ""}"#.to_string(),
            r#"{"title": ""}"#.to_string(),
            r#"{"title": ""}"#.to_string(),
        ]);
        let outcome = engine
            .run(&mock, None, "go".to_string(), ollama::Options::structured())
            .await
            .unwrap();
        match outcome {
            EngineOutcome::Exhausted {
                last_value,
                violations,
                attempts,
            } => {
                assert_eq!(attempts, 3);
                assert!(last_value.is_some());
                assert!(violations.iter().any(|v| v.contains("/title")));
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_plan_baselines_exact_title() {
        let baselines = PlanBaselines {
            title: Some("Hearts on Margin".to_string()),
            ..PlanBaselines::default()
        };
        let verdict = baselines.verdict(&json!({
            "project": {"title": "Heart on Margin"}
        }));
        assert!(!verdict.is_valid);
        assert!(verdict.violations[0]
            .contains(r#"project.title "Heart on Margin" must equal "Hearts on Margin"."#));
    }

    #[tokio::test]
    async fn test_plan_baselines_entities_and_terms() {
        let baselines = PlanBaselines {
            required_entities: vec!["Mara Voss".to_string()],
            forbidden_terms: vec!["dragon".to_string()],
            min_chapters: 2,
            ..PlanBaselines::default()
        };
        let verdict = baselines.verdict(&json!({
            "characters": {"Someone Else": {"description": "a Dragon tamer"}},
            "chapter_outline": [{"number": 1}]
        }));
        assert!(!verdict.is_valid);
        assert!(verdict.violations.iter().any(|v| v.contains("Mara Voss")));
        assert!(verdict.violations.iter().any(|v| v.contains("dragon")));
        assert!(verdict
            .violations
            .iter()
            .any(|v| v.contains("at least 2 are required")));
    }

    #[tokio::test]
    async fn test_plan_baselines_entity_in_serialized_text() {
        let baselines = PlanBaselines {
            required_entities: vec!["Mara Voss".to_string()],
            ..PlanBaselines::default()
        };
        // Not a character key, but mentioned verbatim in a description.
        let verdict = baselines.verdict(&json!({
            "characters": {"The Broker": {"description": "owes Mara Voss a favor"}}
        }));
        assert!(verdict.is_valid);
    }

    #[tokio::test]
    async fn test_plan_baselines_genres() {
        let baselines = PlanBaselines {
            allowed_genres: vec!["mystery".to_string(), "thriller".to_string()],
            disallowed_genres: vec!["romance".to_string()],
            ..PlanBaselines::default()
        };
        let verdict = baselines.verdict(&json!({"project": {"genre": "Mystery"}}));
        assert!(verdict.is_valid);

        let verdict = baselines.verdict(&json!({"project": {"genre": "romance"}}));
        assert!(!verdict.is_valid);
        assert!(verdict
            .violations
            .iter()
            .any(|v| v.contains(r#"project.genre must not be "romance""#)));

        let verdict = baselines.verdict(&json!({"project": {"genre": "western"}}));
        assert!(!verdict.is_valid);
        assert!(verdict
            .violations
            .iter()
            .any(|v| v.contains(r#"project.genre "western" must be one of"#)));
    }

    #[tokio::test]
    async fn test_brief_baselines_pin_outline_meta() {
        let baselines = BriefBaselines {
            chapter_number: 3,
            chapter_title: "Margin Call".to_string(),
            target_words: 2000,
        };
        let verdict = baselines.verdict(&json!({
            "meta": {"chapter_number": 3, "chapter_title": "Margin Call", "target_words": 2000}
        }));
        assert!(verdict.is_valid);

        let verdict = baselines.verdict(&json!({
            "meta": {"chapter_number": 4, "chapter_title": "The Margin Call", "target_words": 2000}
        }));
        assert!(!verdict.is_valid);
        assert!(verdict
            .violations
            .iter()
            .any(|v| v.contains("meta.chapter_number 4 must equal 3")));
        assert!(verdict.violations.iter().any(|v| {
            v.contains(r#"meta.chapter_title "The Margin Call" must equal "Margin Call""#)
        }));
    }

    #[tokio::test]
    async fn test_plan_baselines_require_empty() {
        let baselines = PlanBaselines {
            require_empty: vec!["/project/series".to_string(), "/appendix".to_string()],
            ..PlanBaselines::default()
        };
        // Missing, null, "", [], and {} all count as empty.
        let verdict = baselines.verdict(&json!({
            "project": {"series": ""},
        }));
        assert!(verdict.is_valid);

        let verdict = baselines.verdict(&json!({
            "project": {"series": "The Margin Cycle"},
            "appendix": {"maps": 2}
        }));
        assert!(!verdict.is_valid);
        assert!(verdict
            .violations
            .iter()
            .any(|v| v.contains(r#"the field at "/project/series" must be empty"#)));
        assert!(verdict
            .violations
            .iter()
            .any(|v| v.contains(r#"the field at "/appendix" must be empty"#)));
    }
}
