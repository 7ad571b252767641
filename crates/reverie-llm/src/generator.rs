//! The text-generation capability trait.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

/// Default sampling temperature for every agent call.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// A finite, non-restartable stream of text fragments.
///
/// Consuming it to exhaustion and concatenating the fragments yields the
/// same text [`TextGenerator::generate`] would have returned.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, GenerateError>> + Send>>;

/// Errors surfaced by a [`TextGenerator`] backend.
///
/// None of these are retried here or by the orchestrator — the only retry in
/// the system is the quality-driven re-analysis, which is a new invocation.
#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    /// Transport-level failure talking to the backend.
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// Backend replied with a non-success status.
    #[error("backend returned {status}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        message: String,
    },

    /// Backend payload did not match the expected shape.
    #[error("malformed backend payload: {0}")]
    Malformed(String),

    /// The backend did not answer within the client timeout.
    #[error("generation timed out")]
    Timeout,
}

/// One generation request: model, prompt, optional system instruction.
#[derive(Clone, Debug)]
pub struct GenerateRequest {
    /// Backend model identifier.
    pub model: String,
    /// User prompt.
    pub prompt: String,
    /// Optional system instruction.
    pub system: Option<String>,
    /// Sampling temperature.
    pub temperature: f32,
}

impl GenerateRequest {
    /// New request with the default temperature and no system instruction.
    #[must_use]
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            system: None,
            temperature: DEFAULT_TEMPERATURE,
        }
    }

    /// Attach a system instruction.
    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

/// The opaque capability: produce text for a prompt, all at once or lazily.
///
/// Implementations must guarantee that a fully-drained
/// [`generate_stream`](Self::generate_stream) concatenates to the text
/// [`generate`](Self::generate) would return for the same request.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Single-shot generation.
    async fn generate(&self, req: &GenerateRequest) -> Result<String, GenerateError>;

    /// Streaming generation. The stream is finite and not restartable.
    async fn generate_stream(&self, req: &GenerateRequest)
    -> Result<FragmentStream, GenerateError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
