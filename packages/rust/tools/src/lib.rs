//! Capability tools that augment generation stages with external lookups.
//!
//! Every capability shares one contract: `invoke(query, parameters)` returns
//! prompt-ready text and never fails. Upstream problems are reported inside
//! that text so a run can carry on without the lookup.

pub mod knowledge;
pub mod trend_search;

use serde_json::{Map, Value, json};
use tracing::{info, instrument};

use postforge_shared::{ToolCall, ToolDeclaration, ToolInvocation};

pub use knowledge::{KnowledgeIndex, KnowledgeRetrieval};
pub use trend_search::{SearchMode, TrendSearch};

/// Which lookup a stage may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CapabilityKind {
    TrendSearch,
    KnowledgeRetrieval,
}

impl CapabilityKind {
    /// Function name declared to the generation backend.
    pub fn tool_name(&self) -> &'static str {
        match self {
            Self::TrendSearch => "search_trends",
            Self::KnowledgeRetrieval => "search_knowledge_base",
        }
    }

    /// Text folded into a prompt when this capability is not configured.
    pub fn unavailable_notice(&self) -> &'static str {
        match self {
            Self::TrendSearch => {
                "Trend search is not available (no search API key configured). \
                 Rely on general knowledge of recent developments."
            }
            Self::KnowledgeRetrieval => {
                "Knowledge base not available. Proceed using general knowledge of the topic."
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Capability
// ---------------------------------------------------------------------------

/// A configured capability.
#[derive(Debug, Clone)]
pub enum Capability {
    TrendSearch(TrendSearch),
    KnowledgeRetrieval(KnowledgeRetrieval),
}

impl Capability {
    pub fn kind(&self) -> CapabilityKind {
        match self {
            Self::TrendSearch(_) => CapabilityKind::TrendSearch,
            Self::KnowledgeRetrieval(_) => CapabilityKind::KnowledgeRetrieval,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind().tool_name()
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::TrendSearch(_) => {
                "Search Google for trending topics, news, and current information \
                 to identify engaging content angles."
            }
            Self::KnowledgeRetrieval(_) => {
                "Search the reference knowledge base for passages relevant to the topic, \
                 audience, or writing style."
            }
        }
    }

    /// JSON schema of the call arguments.
    pub fn parameters_schema(&self) -> Value {
        match self {
            Self::TrendSearch(_) => json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The search query to find trending information"
                    },
                    "search_type": {
                        "type": "string",
                        "enum": ["search", "news", "trends"],
                        "description": "search (general), news (past week), or trends (past day)"
                    },
                    "location": {
                        "type": "string",
                        "description": "Geographic location for search results"
                    },
                    "num_results": {
                        "type": "integer",
                        "description": "Number of results to return (1-20)"
                    }
                },
                "required": ["query"]
            }),
            Self::KnowledgeRetrieval(_) => json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "What to look up in the knowledge base"
                    },
                    "k": {
                        "type": "integer",
                        "description": "Number of passages to return (1-10)"
                    }
                },
                "required": ["query"]
            }),
        }
    }

    pub fn declaration(&self) -> ToolDeclaration {
        ToolDeclaration {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }

    /// Run the lookup. Always returns non-empty text.
    pub async fn invoke(&self, query: &str, params: &Map<String, Value>) -> String {
        let query = query.trim();
        if query.is_empty() {
            return format!("Tool `{}` needs a non-empty `query` argument.", self.name());
        }

        let text = match self {
            Self::TrendSearch(tool) => tool.search(query, params).await,
            Self::KnowledgeRetrieval(tool) => tool.retrieve(query, params).await,
        };

        if text.trim().is_empty() {
            format!("No results returned by `{}` for: {query}", self.name())
        } else {
            text
        }
    }
}

// ---------------------------------------------------------------------------
// Toolbox
// ---------------------------------------------------------------------------

/// The capabilities available to a pipeline. Shared read-only across runs.
#[derive(Debug, Clone, Default)]
pub struct Toolbox {
    capabilities: Vec<Capability>,
}

impl Toolbox {
    /// Build a toolbox. A later capability of the same kind replaces an earlier one.
    pub fn new(capabilities: impl IntoIterator<Item = Capability>) -> Self {
        let mut toolbox = Self::default();
        for capability in capabilities {
            toolbox
                .capabilities
                .retain(|c| c.kind() != capability.kind());
            toolbox.capabilities.push(capability);
        }
        toolbox
    }

    pub fn get(&self, kind: CapabilityKind) -> Option<&Capability> {
        self.capabilities.iter().find(|c| c.kind() == kind)
    }

    pub fn has(&self, kind: CapabilityKind) -> bool {
        self.get(kind).is_some()
    }

    /// Declarations for the subset of `kinds` this toolbox provides.
    pub fn declarations_for(&self, kinds: &[CapabilityKind]) -> Vec<ToolDeclaration> {
        kinds
            .iter()
            .filter_map(|kind| self.get(*kind))
            .map(Capability::declaration)
            .collect()
    }

    /// Resolve a backend tool call and run it.
    #[instrument(skip_all, fields(tool = %call.name))]
    pub async fn dispatch(&self, call: &ToolCall) -> ToolInvocation {
        let mut parameters = call.args.as_object().cloned().unwrap_or_default();
        let query = match parameters.remove("query") {
            Some(Value::String(q)) => q,
            Some(other) => other.to_string(),
            None => String::new(),
        };

        let capability = self.capabilities.iter().find(|c| c.name() == call.name);
        let result_text = match capability {
            Some(capability) => capability.invoke(&query, &parameters).await,
            None => {
                let available: Vec<&str> = self.capabilities.iter().map(Capability::name).collect();
                format!(
                    "Unknown tool `{}`. Available tools: {}",
                    call.name,
                    if available.is_empty() {
                        "none".to_string()
                    } else {
                        available.join(", ")
                    }
                )
            }
        };

        info!(
            query = %query,
            result_len = result_text.len(),
            "tool invoked"
        );

        ToolInvocation {
            tool_name: call.name.clone(),
            query,
            parameters,
            result_text,
        }
    }
}
