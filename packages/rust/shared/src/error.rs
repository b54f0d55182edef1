//! Error types for Postforge.
//!
//! Library crates use [`PostforgeError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

use crate::types::StageId;

/// Top-level error type for all Postforge operations.
#[derive(Debug, thiserror::Error)]
pub enum PostforgeError {
    /// Configuration loading or validation error (missing credentials, bad TOML).
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error outside the generation backend's retry loop.
    #[error("network error: {0}")]
    Network(String),

    /// Knowledge index storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Caller-supplied data was rejected (e.g. a blank topic).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Structured extraction from a free-text request failed.
    #[error("format error in field `{field}`: {message}")]
    Format { field: String, message: String },

    /// A generation backend call outside the stage chain failed.
    #[error("backend error: {0}")]
    Backend(String),

    /// A pipeline stage exhausted its backend retry budget.
    #[error("stage `{stage}` failed: {cause}")]
    StageFailed { stage: StageId, cause: String },

    /// The run was cancelled at a stage boundary.
    #[error("run cancelled before stage `{before}`")]
    Cancelled { before: StageId },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PostforgeError>;

/// Coarse classification used by entry points to map errors to responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The request itself was malformed; retrying it unchanged will not help.
    Client,
    /// The pipeline or one of its collaborators failed.
    Server,
}

impl PostforgeError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a format error naming the offending field.
    pub fn format(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Format {
            field: field.into(),
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Client/server classification of this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Format { .. } | Self::Validation { .. } => ErrorClass::Client,
            _ => ErrorClass::Server,
        }
    }

    /// The stage this error is attributed to, if any.
    pub fn stage(&self) -> Option<StageId> {
        match self {
            Self::StageFailed { stage, .. } => Some(*stage),
            Self::Cancelled { before } => Some(*before),
            _ => None,
        }
    }
}
