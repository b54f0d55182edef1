//! Generation backend port and the Gemini client implementing it.
//!
//! The pipeline only sees [`GenerationBackend`]: a prompt plus optional tool
//! declarations in, text and/or tool calls out. Retries, timeouts and the
//! wire format are the implementation's concern.

mod gemini;

use std::time::Duration;

use async_trait::async_trait;
use postforge_shared::{ToolCall, ToolDeclaration};

pub use gemini::GeminiClient;

/// Upper bound on a single retry delay.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// A single generation call.
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub prompt: String,
    /// Functions the backend may call instead of answering. Empty means
    /// the backend must answer in text.
    pub tools: Vec<ToolDeclaration>,
}

impl GenerationRequest {
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            tools: Vec::new(),
        }
    }
}

/// What the backend answered with.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationResponse {
    /// Concatenated text parts. May be empty when the reply is only tool calls.
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

impl GenerationResponse {
    /// Whether the reply carries neither text nor tool calls.
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.tool_calls.is_empty()
    }
}

/// Failures of a backend call.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    /// Every attempt failed with a retryable error.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<BackendError>,
    },
}

impl BackendError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout | Self::Transport(_) | Self::Malformed(_) => true,
            Self::Http { status, .. } => *status == 429 || (500..600).contains(status),
            Self::Exhausted { .. } => false,
        }
    }
}

/// A text generation service.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResponse, BackendError>;
}

/// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`,
/// capped at `cap`.
pub fn backoff_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    base.checked_mul(1u32 << exponent)
        .map_or(cap, |delay| delay.min(cap))
}
