//! JSON Schema validation with verbatim violation reporting.
//!
//! Every violation string carries the instance path and the validator's own
//! message exactly; repair prompts embed these strings without paraphrasing.

use jsonschema::Validator;
use serde_json::Value;

use crate::error::PipelineError;

/// Outcome of validating a payload against a schema or a set of domain rules.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationVerdict {
    pub is_valid: bool,
    /// Human-readable violations, verbatim from the validator.
    pub violations: Vec<String>,
}

impl ValidationVerdict {
    pub fn valid() -> Self {
        ValidationVerdict {
            is_valid: true,
            violations: Vec::new(),
        }
    }

    pub fn invalid(violations: Vec<String>) -> Self {
        ValidationVerdict {
            is_valid: violations.is_empty(),
            violations,
        }
    }

    /// Combine two verdicts; the result is valid only when both are.
    pub fn merge(mut self, other: ValidationVerdict) -> Self {
        self.is_valid = self.is_valid && other.is_valid;
        self.violations.extend(other.violations);
        self
    }
}

/// A compiled JSON Schema paired with its source document.
pub struct SchemaValidator {
    schema: Value,
    validator: Validator,
}

impl SchemaValidator {
    /// Compile `schema`. Fails on malformed schemas, which is a programming
    /// error in the caller rather than a generation failure.
    pub fn new(schema: Value) -> Result<Self, PipelineError> {
        let validator = jsonschema::validator_for(&schema)
            .map_err(|e| PipelineError::Schema(e.to_string()))?;
        Ok(SchemaValidator { schema, validator })
    }

    /// The schema document this validator was compiled from.
    pub fn schema(&self) -> &Value {
        &self.schema
    }

    /// Validate `instance`, collecting every violation rather than stopping
    /// at the first.
    pub fn verdict(&self, instance: &Value) -> ValidationVerdict {
        let violations: Vec<String> = self
            .validator
            .iter_errors(instance)
            .map(|error| {
                let path = error.instance_path.to_string();
                if path.is_empty() {
                    error.to_string()
                } else {
                    format!("{path}: {error}")
                }
            })
            .collect();
        ValidationVerdict {
            is_valid: violations.is_empty(),
            violations,
        }
    }
}
