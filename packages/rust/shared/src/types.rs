//! Core domain types for Postforge generation runs.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PostforgeError, Result};

/// Tone applied when a request does not specify one.
pub const DEFAULT_TONE: &str = "professional";

/// Audience applied when a request does not specify one.
pub const DEFAULT_AUDIENCE: &str = "a general audience";

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper identifying a single pipeline run (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// StageId
// ---------------------------------------------------------------------------

/// One step of the fixed four-step generation chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    Research,
    Draft,
    Edit,
    Package,
}

impl StageId {
    /// All stages in execution order.
    pub const ALL: [StageId; 4] = [Self::Research, Self::Draft, Self::Edit, Self::Package];

    /// Stable name used in logs and error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Research => "research",
            Self::Draft => "draft",
            Self::Edit => "edit",
            Self::Package => "package",
        }
    }

    /// Heading used when this stage's artifact is quoted in a later prompt.
    pub fn title(&self) -> &'static str {
        match self {
            Self::Research => "Research",
            Self::Draft => "Draft",
            Self::Edit => "Edit",
            Self::Package => "Package",
        }
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// PipelineRequest
// ---------------------------------------------------------------------------

/// A validated article request. Defaults are applied here and nowhere else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineRequest {
    topic: String,
    tone: String,
    target_audience: String,
}

impl PipelineRequest {
    /// Build a request, filling in the default tone and audience when the
    /// caller passes `None` or a blank string.
    pub fn new(
        topic: impl Into<String>,
        tone: Option<&str>,
        target_audience: Option<&str>,
    ) -> Result<Self> {
        let topic = topic.into().trim().to_string();
        if topic.is_empty() {
            return Err(PostforgeError::validation("topic must not be empty"));
        }

        Ok(Self {
            topic,
            tone: non_blank(tone).unwrap_or(DEFAULT_TONE).to_string(),
            target_audience: non_blank(target_audience)
                .unwrap_or(DEFAULT_AUDIENCE)
                .to_string(),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn tone(&self) -> &str {
        &self.tone
    }

    pub fn target_audience(&self) -> &str {
        &self.target_audience
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

// ---------------------------------------------------------------------------
// ContextArtifact
// ---------------------------------------------------------------------------

/// The immutable text output of one completed stage.
///
/// Cloning shares the underlying text; dependent stages read it by reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextArtifact {
    stage: StageId,
    text: Arc<str>,
}

impl ContextArtifact {
    pub fn new(stage: StageId, text: impl Into<Arc<str>>) -> Self {
        Self {
            stage,
            text: text.into(),
        }
    }

    pub fn stage(&self) -> StageId {
        self.stage
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

// ---------------------------------------------------------------------------
// Tool calling
// ---------------------------------------------------------------------------

/// A function the generation backend may ask the pipeline to call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    /// JSON schema for the call arguments.
    pub parameters: serde_json::Value,
}

/// A tool call requested by the generation backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

/// One resolved tool call. Lives only as long as the stage that issued it.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInvocation {
    pub tool_name: String,
    pub query: String,
    pub parameters: serde_json::Map<String, serde_json::Value>,
    pub result_text: String,
}

// ---------------------------------------------------------------------------
// StructuredOutput
// ---------------------------------------------------------------------------

/// The final article with its SEO metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredOutput {
    pub title: String,
    pub meta_description: String,
    pub hashtags: Vec<String>,
    pub summary: String,
    pub full_content: String,
}

impl StructuredOutput {
    /// Fallback carrying only the raw generated text.
    pub fn partial(raw: impl Into<String>) -> Self {
        Self {
            full_content: raw.into(),
            ..Default::default()
        }
    }

    /// Whether every metadata field is empty (only `full_content` populated).
    pub fn is_partial(&self) -> bool {
        self.title.is_empty()
            && self.meta_description.is_empty()
            && self.hashtags.is_empty()
            && self.summary.is_empty()
    }
}

/// Whether final-output extraction fully succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    Complete,
    Partial,
}

// ---------------------------------------------------------------------------
// ArticleResult
// ---------------------------------------------------------------------------

/// What a successful run returns.
#[derive(Debug, Clone, Serialize)]
pub struct ArticleResult {
    pub run_id: RunId,
    pub kind: OutputKind,
    pub output: StructuredOutput,
    /// Backend calls made during the run (including tool-loop rounds).
    pub backend_calls: u64,
    #[serde(with = "duration_millis")]
    pub elapsed: Duration,
    pub completed_at: DateTime<Utc>,
}

mod duration_millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_applies_defaults_at_construction() {
        let req = PipelineRequest::new("renewable energy", None, None).unwrap();
        assert_eq!(req.topic(), "renewable energy");
        assert_eq!(req.tone(), DEFAULT_TONE);
        assert_eq!(req.target_audience(), DEFAULT_AUDIENCE);

        let req = PipelineRequest::new("  rust  ", Some("  "), Some("systems programmers")).unwrap();
        assert_eq!(req.topic(), "rust");
        assert_eq!(req.tone(), DEFAULT_TONE);
        assert_eq!(req.target_audience(), "systems programmers");
    }

    #[test]
    fn request_rejects_blank_topic() {
        let err = PipelineRequest::new("   ", Some("casual"), None).unwrap_err();
        assert!(matches!(err, PostforgeError::Validation { .. }));
    }

    #[test]
    fn stage_order_is_fixed() {
        let mut sorted = StageId::ALL.to_vec();
        sorted.sort();
        assert_eq!(sorted, StageId::ALL.to_vec());
        assert_eq!(StageId::Package.to_string(), "package");
    }

    #[test]
    fn artifact_clone_shares_text() {
        let a = ContextArtifact::new(StageId::Draft, "draft body");
        let b = a.clone();
        assert!(std::ptr::eq(a.text(), b.text()));
        assert_eq!(b.stage(), StageId::Draft);
    }

    #[test]
    fn partial_output_only_has_content() {
        let out = StructuredOutput::partial("raw article");
        assert!(out.is_partial());
        assert_eq!(out.full_content, "raw article");
        assert!(out.hashtags.is_empty());
    }

    #[test]
    fn structured_output_serialization() {
        let out = StructuredOutput {
            title: "Solar at Home".into(),
            meta_description: "What homeowners should know".into(),
            hashtags: vec!["#solar".into(), "#energy".into()],
            summary: "A short summary.".into(),
            full_content: "Body".into(),
        };
        let json = serde_json::to_string(&out).expect("serialize");
        let parsed: StructuredOutput = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, out);
        assert!(!parsed.is_partial());
    }
}
