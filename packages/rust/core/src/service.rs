//! Entry points: structured and free-text article generation.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use postforge_backend::GeminiClient;
use postforge_shared::{
    AppConfig, ArticleResult, GeminiConfig, PipelineRequest, Result, TrendSearchConfig,
};
use postforge_tools::{Capability, KnowledgeIndex, KnowledgeRetrieval, Toolbox, TrendSearch};

use crate::formatter::PromptFormatter;
use crate::pipeline::{Pipeline, PipelineOptions, ProgressReporter};
use crate::rate::{RatePolicy, RateState};

/// Article generation facade shared by every front end.
pub struct ArticleService {
    pipeline: Pipeline,
    formatter: PromptFormatter,
}

impl ArticleService {
    pub fn new(pipeline: Pipeline) -> Self {
        let formatter = PromptFormatter::new(pipeline.backend());
        Self {
            pipeline,
            formatter,
        }
    }

    /// Wire up the Gemini backend and whichever tools the config enables.
    ///
    /// Trend search is enabled when its API key is set; knowledge retrieval
    /// is always registered and reports itself unavailable without `index`.
    pub fn from_config(
        config: &AppConfig,
        index: Option<Arc<dyn KnowledgeIndex>>,
    ) -> Result<Self> {
        let backend = GeminiClient::new(GeminiConfig::from_app_config(config)?)?;

        let mut capabilities = Vec::new();
        match TrendSearchConfig::from_app_config(config)? {
            Some(search) => capabilities.push(Capability::TrendSearch(TrendSearch::new(search)?)),
            None => warn!("trend search disabled"),
        }
        if index.is_none() {
            warn!("knowledge index not loaded, retrieval will report it unavailable");
        }
        capabilities.push(Capability::KnowledgeRetrieval(KnowledgeRetrieval::new(
            index,
            config.knowledge.top_k,
        )));

        let pipeline = Pipeline::new(
            Arc::new(backend),
            Arc::new(Toolbox::new(capabilities)),
            RatePolicy::from(config),
            PipelineOptions::from(config),
        );
        info!(model = %config.gemini.model, "article service ready");
        Ok(Self::new(pipeline))
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Generate from explicit fields. Blank tone/audience use the defaults.
    pub async fn generate(
        &self,
        topic: &str,
        tone: Option<&str>,
        target_audience: Option<&str>,
        progress: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<ArticleResult> {
        let request = PipelineRequest::new(topic, tone, target_audience)?;
        self.pipeline.run(&request, progress, cancel).await
    }

    /// Generate from a free-text request.
    ///
    /// The formatter's backend call counts against the same pacing state as
    /// the run that follows.
    pub async fn generate_from_prompt(
        &self,
        prompt: &str,
        progress: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<ArticleResult> {
        let mut state = RateState::new();
        let request = self
            .formatter
            .format(prompt, self.pipeline.rate_controller(), &mut state)
            .await?;
        info!(
            topic = %request.topic(),
            tone = %request.tone(),
            audience = %request.target_audience(),
            "request formatted"
        );
        self.pipeline
            .run_with_state(&request, &mut state, progress, cancel)
            .await
    }
}
