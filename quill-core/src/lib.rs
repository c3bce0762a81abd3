//! Long-form fiction engine driven by a local LLM backend.
//!
//! This crate provides:
//! - Structured JSON extraction from noisy model output
//! - Schema-coerced generation with validate-and-repair loops
//! - Local prose quality checks with adaptive decoding escalation
//! - Model-based critique, acceptance policy, and revision
//! - A persistent narrative continuity ledger across chapters
//!
//! # Quick Start
//!
//! ```ignore
//! use quill_core::{Pipeline, PipelineConfig, PlanBaselines, ProjectConstraints};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = ollama::Ollama::from_env();
//!     let config = PipelineConfig::rooted_at("projects/hearts-on-margin");
//!     let mut pipeline =
//!         Pipeline::new(backend, ProjectConstraints::default(), config).await?;
//!
//!     let baselines = PlanBaselines {
//!         title: Some("Hearts on Margin".to_string()),
//!         ..PlanBaselines::default()
//!     };
//!     let plan = pipeline.plan_book("A romance between rival traders...", &baselines).await?;
//!     let reports = pipeline.write_book(&plan).await?;
//!     println!("wrote {} chapters", reports.len());
//!     Ok(())
//! }
//! ```

pub mod artifact;
pub mod constraints;
pub mod critique;
pub mod decoding;
pub mod engine;
pub mod error;
pub mod extract;
pub mod generator;
pub mod ledger;
pub mod manuscript;
pub mod pipeline;
pub mod prompts;
pub mod quality;
pub mod schema;
pub mod skeleton;
pub mod testing;

// Primary public API
pub use artifact::{BookPlan, ChapterBrief, ChapterOutline, ContinuityExtract};
pub use constraints::{PovConstraint, PovType, ProjectConstraints, SafetyProfile};
pub use critique::{
    AcceptancePolicy, AxisScore, CritiqueContext, CritiqueEngine, CritiqueFindings, ImproveOutcome,
};
pub use engine::{BriefBaselines, EngineOutcome, PlanBaselines, RepairConfig, RepairEngine};
pub use error::{BackendError, ExtractionError, LedgerError, PipelineError};
pub use extract::{extract_json, extract_value};
pub use generator::{GenerationRequest, TextGenerator};
pub use ledger::{LedgerStore, NarrativeLedger, RoundUpdate};
pub use pipeline::{ChapterReport, Pipeline, PipelineConfig};
pub use schema::{SchemaValidator, ValidationVerdict};
pub use skeleton::json_skeleton;
pub use testing::MockGenerator;
