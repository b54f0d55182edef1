//! Turns a free-text article request into a [`PipelineRequest`].

use std::sync::Arc;

use tracing::{debug, instrument};

use postforge_backend::{GenerationBackend, GenerationRequest};
use postforge_shared::{DEFAULT_AUDIENCE, DEFAULT_TONE, PipelineRequest, PostforgeError, Result};

use crate::extract;
use crate::rate::{RateController, RateState};

/// Asks the generation backend to structure a user's request.
pub struct PromptFormatter {
    backend: Arc<dyn GenerationBackend>,
}

impl PromptFormatter {
    pub fn new(backend: Arc<dyn GenerationBackend>) -> Self {
        Self { backend }
    }

    /// Extract topic, tone and audience from `user_prompt`.
    ///
    /// The backend call is gated by `rate` against the caller's `state`.
    #[instrument(skip_all, fields(prompt_len = user_prompt.len()))]
    pub async fn format(
        &self,
        user_prompt: &str,
        rate: &RateController,
        state: &mut RateState,
    ) -> Result<PipelineRequest> {
        let user_prompt = user_prompt.trim();
        if user_prompt.is_empty() {
            return Err(PostforgeError::validation("prompt must not be empty"));
        }

        rate.before_call(state).await;
        let response = self
            .backend
            .generate(&GenerationRequest::text(formatter_prompt(user_prompt)))
            .await
            .map_err(|e| PostforgeError::Backend(e.to_string()))?;

        debug!(raw = %response.text, "formatter response");
        extract::parse_request(&response.text)
    }
}

fn formatter_prompt(user_prompt: &str) -> String {
    format!(
        "You are an expert assistant that analyzes a user's request for a blog post and \
         extracts the key parameters.\n\
         Populate a JSON object with the keys \"topic\", \"tone\" and \"target_audience\".\n\n\
         Instructions:\n\
         1. Read the user prompt below.\n\
         2. \"topic\": the main subject, specific and descriptive.\n\
         3. \"tone\": the desired style. Use \"{DEFAULT_TONE}\" if none is given.\n\
         4. \"target_audience\": who the post is for. Use \"{DEFAULT_AUDIENCE}\" if none is given.\n\
         5. Respond with a single valid JSON object and nothing else.\n\n\
         User prompt: \"{user_prompt}\""
    )
}
