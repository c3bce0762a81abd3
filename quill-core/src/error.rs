//! Error taxonomy for the writing pipeline.
//!
//! Expected validation failures are modeled as values (`ValidationVerdict`,
//! `CritiqueFindings`) so the repair loops can act on them; the types here
//! cover the failures that cannot be recovered by asking the generator again.

use thiserror::Error;

/// Errors from the structured extractor.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("no JSON value found in generator output")]
    NoJson,

    #[error("unbalanced brackets in generator output")]
    Unbalanced,

    #[error("mismatched brackets in generator output")]
    Mismatched,

    #[error("JSON value never closed in generator output")]
    Incomplete,

    #[error("extracted text is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Transport-level failures talking to the generative backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend error: {0}")]
    Backend(#[from] ollama::Error),

    #[error("mock generator script exhausted")]
    ScriptExhausted,
}

/// Errors from ledger snapshot persistence.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

/// Terminal errors surfaced by the pipeline.
///
/// Local check failures, schema/domain violations, and critique rejections
/// never show up here on first occurrence; they are recovered through repair
/// and revision requests up to the attempt budget. What remains after the
/// budget is reported verbatim.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The backend failed after the retry budget. The current round does not
    /// complete; prior ledger state is untouched.
    #[error("backend failed after {attempts} attempts: {source}")]
    Backend {
        attempts: u32,
        #[source]
        source: BackendError,
    },

    /// A supplied JSON Schema could not be compiled.
    #[error("invalid schema: {0}")]
    Schema(String),

    /// A schema-valid artifact failed to deserialize into its typed form.
    #[error("artifact decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// Planning exhausted its attempt budget with violations remaining.
    #[error("planning failed after {attempts} attempts; remaining violations: {}", violations.join("; "))]
    PlanExhausted {
        attempts: u32,
        violations: Vec<String>,
        /// Best-effort artifact from the final attempt, if any was parseable.
        last_artifact: Option<serde_json::Value>,
    },

    /// Snapshot read/write failed. Fatal for the whole project: state
    /// integrity can no longer be guaranteed.
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Manuscript page write failed.
    #[error("manuscript IO error: {0}")]
    Manuscript(#[from] std::io::Error),
}
