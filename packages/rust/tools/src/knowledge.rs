//! Retrieval of reference passages from a prebuilt knowledge index.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::warn;

use postforge_shared::Result;
use postforge_storage::PassageStore;

const MAX_K: usize = 10;
const PASSAGE_SEPARATOR: &str = "\n\n---\n\n";

/// Query side of a knowledge index.
#[async_trait]
pub trait KnowledgeIndex: Send + Sync {
    /// The `k` passages most relevant to `query`, best first.
    async fn top_k(&self, query: &str, k: usize) -> Result<Vec<String>>;
}

#[async_trait]
impl KnowledgeIndex for PassageStore {
    async fn top_k(&self, query: &str, k: usize) -> Result<Vec<String>> {
        let hits = PassageStore::top_k(self, query, k).await?;
        Ok(hits.into_iter().map(|p| p.content).collect())
    }
}

/// The knowledge retrieval capability. Works without an index, reporting it
/// as unavailable.
#[derive(Clone)]
pub struct KnowledgeRetrieval {
    index: Option<Arc<dyn KnowledgeIndex>>,
    default_k: usize,
}

impl KnowledgeRetrieval {
    pub fn new(index: Option<Arc<dyn KnowledgeIndex>>, default_k: usize) -> Self {
        Self {
            index,
            default_k: default_k.clamp(1, MAX_K),
        }
    }

    pub fn has_index(&self) -> bool {
        self.index.is_some()
    }

    /// Look up passages and join them for inclusion in a prompt.
    pub async fn retrieve(&self, query: &str, params: &Map<String, Value>) -> String {
        let Some(index) = &self.index else {
            return "Knowledge base not available. Proceed using general knowledge of the topic."
                .to_string();
        };

        let k = params
            .get("k")
            .and_then(Value::as_u64)
            .map_or(self.default_k, |k| k as usize)
            .clamp(1, MAX_K);

        match index.top_k(query, k).await {
            Ok(passages) if passages.is_empty() => {
                format!("No relevant passages found for: {query}")
            }
            Ok(passages) => passages.join(PASSAGE_SEPARATOR),
            Err(e) => {
                warn!(query, error = %e, "knowledge retrieval failed");
                format!("Error searching knowledge base: {e}")
            }
        }
    }
}

impl std::fmt::Debug for KnowledgeRetrieval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeRetrieval")
            .field("has_index", &self.has_index())
            .field("default_k", &self.default_k)
            .finish()
    }
}
