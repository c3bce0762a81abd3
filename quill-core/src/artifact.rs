//! Structured artifacts produced by the planning and continuity stages,
//! with the JSON Schemas they are validated against.
//!
//! Schemas are the source of truth for the wire shape; the Rust types mirror
//! them and are only decoded after a schema-valid payload is in hand.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

// ============================================================
// Book plan
// ============================================================

/// Top-level identity of the book project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub title: String,
    pub author: String,
    pub genre: String,
    #[serde(default)]
    pub sub_genre: String,
}

/// A character entry in the plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanCharacter {
    pub description: String,
    #[serde(default)]
    pub goals: Vec<String>,
}

/// One planned chapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterOutline {
    pub number: u32,
    pub title: String,
    pub description: String,
    pub target_words: u32,
}

/// The full book plan: identity, themes, cast, and chapter outline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookPlan {
    pub project: ProjectInfo,
    pub logline: String,
    #[serde(default)]
    pub themes: Vec<String>,
    #[serde(default)]
    pub characters: BTreeMap<String, PlanCharacter>,
    pub chapter_outline: Vec<ChapterOutline>,
}

impl BookPlan {
    /// The outline entry for a chapter number, if planned.
    pub fn chapter(&self, number: u32) -> Option<&ChapterOutline> {
        self.chapter_outline.iter().find(|c| c.number == number)
    }
}

/// Schema the planner's output must conform to.
pub fn book_plan_schema() -> Value {
    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "type": "object",
        "required": ["project", "logline", "themes", "characters", "chapter_outline"],
        "additionalProperties": false,
        "properties": {
            "project": {
                "type": "object",
                "required": ["title", "author", "genre"],
                "properties": {
                    "title": {"type": "string", "minLength": 1},
                    "author": {"type": "string", "minLength": 1},
                    "genre": {"type": "string", "minLength": 1},
                    "sub_genre": {"type": "string"}
                }
            },
            "logline": {"type": "string", "minLength": 1},
            "themes": {
                "type": "array",
                "minItems": 1,
                "items": {"type": "string", "minLength": 1}
            },
            "characters": {
                "type": "object",
                "minProperties": 1,
                "additionalProperties": {
                    "type": "object",
                    "required": ["description"],
                    "properties": {
                        "description": {"type": "string", "minLength": 1},
                        "goals": {"type": "array", "items": {"type": "string"}}
                    }
                }
            },
            "chapter_outline": {
                "type": "array",
                "minItems": 1,
                "items": {
                    "type": "object",
                    "required": ["number", "title", "description", "target_words"],
                    "properties": {
                        "number": {"type": "integer", "minimum": 1},
                        "title": {"type": "string", "minLength": 1},
                        "description": {"type": "string", "minLength": 1},
                        "target_words": {"type": "integer", "minimum": 100}
                    }
                }
            }
        }
    })
}

// ============================================================
// Chapter brief
// ============================================================

/// Identity and sizing for a chapter brief.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BriefMeta {
    pub chapter_number: u32,
    pub chapter_title: String,
    #[serde(default)]
    pub act: String,
    pub target_words: u32,
}

/// One planned scene within a chapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenePlan {
    pub heading: String,
    pub summary: String,
    #[serde(default)]
    pub characters: Vec<String>,
}

/// Style constraints a brief imposes on the draft.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StyleChecks {
    #[serde(default)]
    pub forbid_inner_monologue_terms: Vec<String>,
}

/// Everything the drafting prompt embeds for one chapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterBrief {
    pub meta: BriefMeta,
    #[serde(default)]
    pub narrative_beats: Vec<String>,
    #[serde(default)]
    pub setups: Vec<String>,
    #[serde(default)]
    pub payoffs: Vec<String>,
    #[serde(default)]
    pub foreshadowing: Vec<String>,
    #[serde(default)]
    pub scenes: Vec<ScenePlan>,
    #[serde(default)]
    pub style_checks: StyleChecks,
}

impl ChapterBrief {
    /// Build a plain brief from an outline entry, with no beat detail.
    pub fn from_outline(outline: &ChapterOutline) -> Self {
        ChapterBrief {
            meta: BriefMeta {
                chapter_number: outline.number,
                chapter_title: outline.title.clone(),
                act: String::new(),
                target_words: outline.target_words,
            },
            narrative_beats: vec![outline.description.clone()],
            setups: Vec::new(),
            payoffs: Vec::new(),
            foreshadowing: Vec::new(),
            scenes: Vec::new(),
            style_checks: StyleChecks::default(),
        }
    }
}

/// Schema a generated chapter brief must conform to.
pub fn chapter_brief_schema() -> Value {
    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "type": "object",
        "required": ["meta", "narrative_beats", "scenes"],
        "properties": {
            "meta": {
                "type": "object",
                "required": ["chapter_number", "chapter_title", "target_words"],
                "properties": {
                    "chapter_number": {"type": "integer", "minimum": 1},
                    "chapter_title": {"type": "string", "minLength": 1},
                    "act": {"type": "string"},
                    "target_words": {"type": "integer", "minimum": 100}
                }
            },
            "narrative_beats": {
                "type": "array",
                "minItems": 1,
                "items": {"type": "string", "minLength": 1}
            },
            "setups": {"type": "array", "items": {"type": "string"}},
            "payoffs": {"type": "array", "items": {"type": "string"}},
            "foreshadowing": {"type": "array", "items": {"type": "string"}},
            "scenes": {
                "type": "array",
                "minItems": 1,
                "items": {
                    "type": "object",
                    "required": ["heading", "summary"],
                    "properties": {
                        "heading": {"type": "string", "minLength": 1},
                        "summary": {"type": "string", "minLength": 1},
                        "characters": {"type": "array", "items": {"type": "string"}}
                    }
                }
            },
            "style_checks": {
                "type": "object",
                "properties": {
                    "forbid_inner_monologue_terms": {
                        "type": "array",
                        "items": {"type": "string"}
                    }
                }
            }
        }
    })
}

// ============================================================
// Continuity extract
// ============================================================

/// Structured continuity facts pulled from a finished chapter.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ContinuityExtract {
    #[serde(default)]
    pub characters_introduced: Vec<String>,
    #[serde(default)]
    pub characters_developed: Vec<String>,
    #[serde(default)]
    pub new_plot_threads: Vec<String>,
    #[serde(default)]
    pub plot_threads_advanced: Vec<String>,
    #[serde(default)]
    pub threads_resolved: Vec<String>,
    #[serde(default)]
    pub key_events: Vec<String>,
    #[serde(default)]
    pub summary: String,
}

/// Schema a continuity extraction must conform to.
pub fn continuity_extract_schema() -> Value {
    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "type": "object",
        "required": ["summary", "key_events"],
        "properties": {
            "characters_introduced": {"type": "array", "items": {"type": "string"}},
            "characters_developed": {"type": "array", "items": {"type": "string"}},
            "new_plot_threads": {"type": "array", "items": {"type": "string"}},
            "plot_threads_advanced": {"type": "array", "items": {"type": "string"}},
            "threads_resolved": {"type": "array", "items": {"type": "string"}},
            "key_events": {"type": "array", "items": {"type": "string"}},
            "summary": {"type": "string", "minLength": 1}
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaValidator;

    pub(crate) fn sample_plan() -> BookPlan {
        BookPlan {
            project: ProjectInfo {
                title: "Hearts on Margin".to_string(),
                author: "R. Calloway".to_string(),
                genre: "Romance".to_string(),
                sub_genre: "Financial thriller".to_string(),
            },
            logline: "Two rival quant traders fall in love during a short squeeze.".to_string(),
            themes: vec!["trust".to_string(), "risk".to_string()],
            characters: BTreeMap::from([(
                "Mara Voss".to_string(),
                PlanCharacter {
                    description: "Lead derivatives trader".to_string(),
                    goals: vec!["Survive the squeeze".to_string()],
                },
            )]),
            chapter_outline: vec![ChapterOutline {
                number: 1,
                title: "Opening Bell".to_string(),
                description: "Mara spots the anomaly.".to_string(),
                target_words: 2000,
            }],
        }
    }

    #[test]
    fn test_sample_plan_passes_schema() {
        let validator = SchemaValidator::new(book_plan_schema()).unwrap();
        let value = serde_json::to_value(sample_plan()).unwrap();
        let verdict = validator.verdict(&value);
        assert!(verdict.is_valid, "violations: {:?}", verdict.violations);
    }

    #[test]
    fn test_plan_round_trips() {
        let plan = sample_plan();
        let value = serde_json::to_value(&plan).unwrap();
        let back: BookPlan = serde_json::from_value(value).unwrap();
        assert_eq!(back, plan);
    }

    #[test]
    fn test_plan_schema_rejects_empty_outline() {
        let validator = SchemaValidator::new(book_plan_schema()).unwrap();
        let mut value = serde_json::to_value(sample_plan()).unwrap();
        value["chapter_outline"] = serde_json::json!([]);
        assert!(!validator.verdict(&value).is_valid);
    }

    #[test]
    fn test_brief_from_outline() {
        let plan = sample_plan();
        let brief = ChapterBrief::from_outline(&plan.chapter_outline[0]);
        assert_eq!(brief.meta.chapter_number, 1);
        assert_eq!(brief.meta.target_words, 2000);
        assert_eq!(brief.narrative_beats, vec!["Mara spots the anomaly."]);
    }

    #[test]
    fn test_extract_defaults_are_lenient() {
        let extract: ContinuityExtract =
            serde_json::from_value(serde_json::json!({"summary": "s", "key_events": ["e"]}))
                .unwrap();
        assert!(extract.characters_introduced.is_empty());
        assert_eq!(extract.summary, "s");
    }

    #[test]
    fn test_extract_schema_requires_summary() {
        let validator = SchemaValidator::new(continuity_extract_schema()).unwrap();
        let verdict = validator.verdict(&serde_json::json!({"key_events": []}));
        assert!(!verdict.is_valid);
        assert!(verdict.violations.iter().any(|v| v.contains("summary")));
    }
}
