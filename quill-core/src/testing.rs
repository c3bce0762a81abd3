//! Testing utilities for the book pipeline.
//!
//! This module provides tools for integration testing:
//! - `MockGenerator` for deterministic testing without a live backend
//! - Assertion helpers for inspecting recorded requests

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use ollama::Completion;

use crate::error::BackendError;
use crate::generator::{GenerationRequest, TextGenerator};

/// A generator that returns scripted responses in order.
///
/// Every incoming request is recorded, so tests can assert on the prompts
/// and decoding options the pipeline actually sent. Once the script runs
/// out, calls fail with [`BackendError::ScriptExhausted`].
pub struct MockGenerator {
    /// Scripted response texts to return in order.
    script: Mutex<VecDeque<String>>,
    /// Every request received, in order.
    requests: Mutex<Vec<GenerationRequest>>,
}

impl MockGenerator {
    /// Create a mock with scripted responses.
    pub fn new(script: Vec<String>) -> Self {
        MockGenerator {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Append a response to the script.
    pub fn queue(&self, response: impl Into<String>) {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(response.into());
    }

    /// All requests received so far.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of scripted responses not yet consumed.
    pub fn remaining(&self) -> usize {
        self.script.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl TextGenerator for MockGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<Completion, BackendError> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request);
        let next = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match next {
            Some(text) => Ok(Completion {
                text,
                total_duration: Some(Duration::from_millis(1)),
                eval_count: None,
            }),
            None => Err(BackendError::ScriptExhausted),
        }
    }
}

/// Assert that the `index`th recorded request's prompt contains `needle`.
#[track_caller]
pub fn assert_prompt_contains(mock: &MockGenerator, index: usize, needle: &str) {
    let requests = mock.requests();
    let request = requests
        .get(index)
        .unwrap_or_else(|| panic!("no request at index {index}, only {} seen", requests.len()));
    assert!(
        request.prompt.contains(needle),
        "request {index} prompt does not contain {needle:?}:\n{}",
        request.prompt
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_plays_in_order() {
        let mock = MockGenerator::new(vec!["one".to_string(), "two".to_string()]);
        let a = mock.generate(GenerationRequest::new("p1")).await.unwrap();
        let b = mock.generate(GenerationRequest::new("p2")).await.unwrap();
        assert_eq!(a.text, "one");
        assert_eq!(b.text, "two");
        assert_eq!(mock.remaining(), 0);

        let exhausted = mock.generate(GenerationRequest::new("p3")).await;
        assert!(matches!(exhausted, Err(BackendError::ScriptExhausted)));
    }

    #[tokio::test]
    async fn test_records_requests() {
        let mock = MockGenerator::new(vec!["ok".to_string()]);
        let request = GenerationRequest::new("the prompt").with_system("the system");
        mock.generate(request).await.unwrap();

        assert_prompt_contains(&mock, 0, "the prompt");
        assert_eq!(mock.requests()[0].system.as_deref(), Some("the system"));
    }
}
