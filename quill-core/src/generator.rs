//! Text generation seam.
//!
//! The pipeline talks to its backend through [`TextGenerator`], implemented
//! for the real [`ollama::Ollama`] client and for the scripted mock in
//! [`crate::testing`].

use async_trait::async_trait;
use ollama::{Completion, Format, GenerateRequest, Ollama, Options};
use std::time::Duration;

use crate::error::BackendError;

/// A backend-agnostic generation request.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub system: Option<String>,
    pub options: Options,
    /// Ask the backend to constrain output to syntactically valid JSON.
    pub json_format: bool,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        GenerationRequest {
            prompt: prompt.into(),
            system: None,
            options: Options::default(),
            json_format: false,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    pub fn json(mut self) -> Self {
        self.json_format = true;
        self
    }
}

/// Anything that can turn a prompt into a completion.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<Completion, BackendError>;
}

#[async_trait]
impl TextGenerator for Ollama {
    async fn generate(&self, request: GenerationRequest) -> Result<Completion, BackendError> {
        let mut api_request = GenerateRequest::new(request.prompt)
            .with_options(request.options);
        if let Some(system) = request.system {
            api_request = api_request.with_system(system);
        }
        if request.json_format {
            api_request = api_request.with_format(Format::Json);
        }
        Ok(Ollama::generate(self, api_request).await?)
    }
}

/// Call the generator, retrying transient backend failures with a fixed
/// backoff. Script exhaustion is not retried: a mock with an empty script
/// will stay empty.
pub async fn generate_with_retry<G: TextGenerator + ?Sized>(
    generator: &G,
    request: GenerationRequest,
    retries: u32,
    backoff: Duration,
) -> Result<Completion, BackendError> {
    let mut attempt = 0;
    loop {
        match generator.generate(request.clone()).await {
            Ok(completion) => return Ok(completion),
            Err(BackendError::ScriptExhausted) => return Err(BackendError::ScriptExhausted),
            Err(error) => {
                if attempt >= retries {
                    return Err(error);
                }
                attempt += 1;
                tracing::warn!(attempt, %error, "backend call failed, retrying");
                tokio::time::sleep(backoff).await;
            }
        }
    }
}
