//! Shared types, error model, and configuration for Postforge.
//!
//! This crate is the foundation depended on by all other Postforge crates.
//! It provides:
//! - [`PostforgeError`], the unified error type
//! - Domain types ([`PipelineRequest`], [`StageId`], [`ContextArtifact`],
//!   [`StructuredOutput`], [`ArticleResult`])
//! - Configuration ([`AppConfig`], resolved runtime configs, config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, GeminiConfig, GeminiSettings, KnowledgeSettings, PipelineSettings,
    RateLimitSettings, SearchSettings, TrendSearchConfig, config_dir, config_file_path,
    expand_home, init_config, load_config, load_config_from, validate_api_key,
};
pub use error::{ErrorClass, PostforgeError, Result};
pub use types::{
    ArticleResult, ContextArtifact, DEFAULT_AUDIENCE, DEFAULT_TONE, OutputKind, PipelineRequest,
    RunId, StageId, StructuredOutput, ToolCall, ToolDeclaration, ToolInvocation,
};
