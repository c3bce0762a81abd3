//! Minimal Ollama API client.
//!
//! This crate provides a focused client for Ollama's generate API with:
//! - Non-streaming completions via `POST /api/generate`
//! - Full control over decoding options (temperature, nucleus, top-k,
//!   repeat penalties) with safe-bound clamping
//! - JSON output mode and schema-constrained output

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_BASE_URL: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "llama3.3:70b";

/// Errors that can occur when using the Ollama client.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Ollama API client.
#[derive(Debug, Clone)]
pub struct Ollama {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl Ollama {
    /// Create a new client pointed at the given base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(240))
                .connect_timeout(Duration::from_secs(30))
                .build()
                .expect("Failed to build HTTP client"),
            base_url: base_url.into(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Create a client from the OLLAMA_URL and OLLAMA_MODEL environment
    /// variables, falling back to localhost defaults.
    pub fn from_env() -> Self {
        let base_url =
            std::env::var("OLLAMA_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let mut client = Self::new(base_url);
        if let Ok(model) = std::env::var("OLLAMA_MODEL") {
            client.model = model;
        }
        client
    }

    /// Set the default model for this client.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// The model used when a request does not name one.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send a generation request and return the full completion.
    pub async fn generate(&self, request: GenerateRequest) -> Result<Completion, Error> {
        let api_request = ApiRequest {
            model: request.model.clone().unwrap_or_else(|| self.model.clone()),
            prompt: request.prompt,
            system: request.system,
            stream: false,
            format: request.format.map(|f| match f {
                Format::Json => serde_json::Value::String("json".to_string()),
                Format::Schema(schema) => schema,
            }),
            options: request.options,
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .headers(Self::build_headers())
            .json(&api_request)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status,
                message: body,
            });
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;

        Ok(Completion {
            text: api_response.response,
            total_duration: api_response.total_duration.map(Duration::from_nanos),
            eval_count: api_response.eval_count,
        })
    }

    fn build_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers
    }
}

// ============================================================================
// Public types
// ============================================================================

/// A generation request to send to the backend.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub model: Option<String>,
    pub prompt: String,
    pub system: Option<String>,
    pub format: Option<Format>,
    pub options: Options,
}

impl GenerateRequest {
    /// Create a new request with the given prompt.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            model: None,
            prompt: prompt.into(),
            system: None,
            format: None,
            options: Options::default(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_format(mut self, format: Format) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }
}

/// Output format constraint.
#[derive(Debug, Clone)]
pub enum Format {
    /// Ask the backend for syntactically valid JSON.
    Json,
    /// Ask the backend to conform to a JSON Schema.
    Schema(serde_json::Value),
}

/// A completed generation from the backend.
#[derive(Debug, Clone)]
pub struct Completion {
    /// The generated text. May be malformed, truncated, or off-schema;
    /// callers must never assume well-formed output.
    pub text: String,
    /// Wall-clock time the backend spent on this request.
    pub total_duration: Option<Duration>,
    /// Number of tokens evaluated, if reported.
    pub eval_count: Option<u64>,
}

// ============================================================================
// Decoding options
// ============================================================================

/// Safe numeric bounds for decoding parameters. Values outside these ranges
/// produce degenerate sampling on most backends.
pub mod bounds {
    pub const TEMPERATURE: (f32, f32) = (0.0, 2.0);
    pub const TOP_P: (f32, f32) = (0.05, 1.0);
    pub const TOP_K: (u32, u32) = (1, 200);
    pub const MIN_P: (f32, f32) = (0.0, 0.5);
    pub const REPEAT_PENALTY: (f32, f32) = (1.0, 2.0);
    pub const REPEAT_LAST_N: (u32, u32) = (0, 4096);
    pub const PENALTY: (f32, f32) = (-2.0, 2.0);
}

/// Decoding options controlling the backend's sampling distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Options {
    /// Sampling temperature.
    pub temperature: f32,
    /// Nucleus-probability cutoff.
    pub top_p: f32,
    /// Top-k truncation.
    pub top_k: u32,
    /// Minimum-probability floor relative to the top token.
    pub min_p: f32,
    /// Multiplicative penalty applied to recently emitted tokens.
    pub repeat_penalty: f32,
    /// Window of recent tokens the repeat penalty looks at.
    pub repeat_last_n: u32,
    /// Additive penalty for tokens that have appeared at all.
    pub presence_penalty: f32,
    /// Additive penalty scaled by how often a token has appeared.
    pub frequency_penalty: f32,
    /// Maximum number of tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<u32>,
    /// Stop sequences.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub stop: Vec<String>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            temperature: 0.8,
            top_p: 0.95,
            top_k: 50,
            min_p: 0.0,
            repeat_penalty: 1.1,
            repeat_last_n: 256,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
            num_predict: None,
            stop: Vec::new(),
        }
    }
}

impl Options {
    /// Deterministic options for schema-constrained structured output.
    pub fn structured() -> Self {
        Self {
            temperature: 0.0,
            top_p: 0.9,
            ..Self::default()
        }
    }

    /// Looser options tuned for first-pass prose drafting.
    pub fn drafting() -> Self {
        Self {
            temperature: 1.3,
            top_p: 0.92,
            top_k: 60,
            repeat_penalty: 1.22,
            repeat_last_n: 300,
            ..Self::default()
        }
    }

    /// Clamp every parameter into its safe bound.
    pub fn clamp(&mut self) {
        self.temperature = self.temperature.clamp(bounds::TEMPERATURE.0, bounds::TEMPERATURE.1);
        self.top_p = self.top_p.clamp(bounds::TOP_P.0, bounds::TOP_P.1);
        self.top_k = self.top_k.clamp(bounds::TOP_K.0, bounds::TOP_K.1);
        self.min_p = self.min_p.clamp(bounds::MIN_P.0, bounds::MIN_P.1);
        self.repeat_penalty = self
            .repeat_penalty
            .clamp(bounds::REPEAT_PENALTY.0, bounds::REPEAT_PENALTY.1);
        self.repeat_last_n = self
            .repeat_last_n
            .clamp(bounds::REPEAT_LAST_N.0, bounds::REPEAT_LAST_N.1);
        self.presence_penalty = self.presence_penalty.clamp(bounds::PENALTY.0, bounds::PENALTY.1);
        self.frequency_penalty = self.frequency_penalty.clamp(bounds::PENALTY.0, bounds::PENALTY.1);
    }

    /// Whether every parameter lies within its safe bound.
    pub fn in_bounds(&self) -> bool {
        let mut clamped = self.clone();
        clamped.clamp();
        clamped == *self
    }
}

// ============================================================================
// Internal API types
// ============================================================================

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<serde_json::Value>,
    options: Options,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    response: String,
    #[serde(default)]
    total_duration: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = Ollama::new("http://localhost:11434");
        assert_eq!(client.model(), DEFAULT_MODEL);
    }

    #[test]
    fn test_client_with_model() {
        let client = Ollama::new("http://localhost:11434").with_model("mistral");
        assert_eq!(client.model(), "mistral");
    }

    #[test]
    fn test_request_builder() {
        let request = GenerateRequest::new("Write a story")
            .with_system("You are a novelist")
            .with_format(Format::Json)
            .with_options(Options::structured());

        assert!(request.system.is_some());
        assert!(matches!(request.format, Some(Format::Json)));
        assert_eq!(request.options.temperature, 0.0);
    }

    #[test]
    fn test_options_clamp() {
        let mut options = Options {
            temperature: 5.0,
            top_p: -0.3,
            top_k: 0,
            min_p: 0.9,
            repeat_penalty: 0.1,
            repeat_last_n: 100_000,
            presence_penalty: 7.0,
            frequency_penalty: -7.0,
            ..Options::default()
        };
        options.clamp();

        assert_eq!(options.temperature, bounds::TEMPERATURE.1);
        assert_eq!(options.top_p, bounds::TOP_P.0);
        assert_eq!(options.top_k, bounds::TOP_K.0);
        assert_eq!(options.min_p, bounds::MIN_P.1);
        assert_eq!(options.repeat_penalty, bounds::REPEAT_PENALTY.0);
        assert_eq!(options.repeat_last_n, bounds::REPEAT_LAST_N.1);
        assert_eq!(options.presence_penalty, bounds::PENALTY.1);
        assert_eq!(options.frequency_penalty, bounds::PENALTY.0);
        assert!(options.in_bounds());
    }

    #[test]
    fn test_default_options_in_bounds() {
        assert!(Options::default().in_bounds());
        assert!(Options::structured().in_bounds());
        assert!(Options::drafting().in_bounds());
    }

    #[test]
    fn test_stop_sequences_skipped_when_empty() {
        let serialized = serde_json::to_value(Options::default()).unwrap();
        assert!(serialized.get("stop").is_none());
        assert!(serialized.get("num_predict").is_none());
    }
}
