//! End-to-end generation run: Research → Draft → Edit → Package → extract.

use std::fmt::Write as _;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Instant;

use chrono::{Datelike, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span, instrument, warn};

use postforge_backend::{GenerationBackend, GenerationRequest};
use postforge_shared::{
    AppConfig, ArticleResult, ContextArtifact, OutputKind, PipelineRequest, PostforgeError,
    Result, RunId, StageId, StructuredOutput, ToolInvocation,
};
use postforge_tools::{CapabilityKind, Toolbox};

use crate::extract;
use crate::rate::{RateController, RatePolicy, RateState};
use crate::stages::{PromptVars, Stage, default_stages};

/// Acceptable hashtag count in the final output.
const HASHTAG_RANGE: RangeInclusive<usize> = 5..=8;

/// Progress callback for reporting run status.
pub trait ProgressReporter: Send + Sync {
    /// Called when a stage is about to dispatch its first backend call.
    fn stage_started(&self, stage: StageId, index: usize, total: usize);
    /// Called after each tool call a stage makes.
    fn tool_invoked(&self, stage: StageId, tool: &str);
    /// Called when a stage has produced its artifact.
    fn stage_completed(&self, stage: StageId, index: usize, total: usize);
    /// Called when the run completes successfully.
    fn done(&self, result: &ArticleResult);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn stage_started(&self, _stage: StageId, _index: usize, _total: usize) {}
    fn tool_invoked(&self, _stage: StageId, _tool: &str) {}
    fn stage_completed(&self, _stage: StageId, _index: usize, _total: usize) {}
    fn done(&self, _result: &ArticleResult) {}
}

/// Run-level knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Tool-call rounds a stage may spend before it must answer in text.
    pub max_tool_rounds: u32,
    /// Soft bounds on the article's word count.
    pub target_words: RangeInclusive<usize>,
    /// Year rendered into prompts. `None` uses the current UTC year.
    pub current_year: Option<i32>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for PipelineOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_tool_rounds: config.pipeline.max_tool_rounds,
            target_words: config.pipeline.target_words_min..=config.pipeline.target_words_max,
            current_year: None,
        }
    }
}

/// The stage chain bound to its collaborators. Cheap to share across runs.
pub struct Pipeline {
    backend: Arc<dyn GenerationBackend>,
    toolbox: Arc<Toolbox>,
    stages: Vec<Stage>,
    rate: RateController,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        toolbox: Arc<Toolbox>,
        rate: RatePolicy,
        options: PipelineOptions,
    ) -> Self {
        Self {
            backend,
            toolbox,
            stages: default_stages(),
            rate: RateController::new(rate),
            options,
        }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn backend(&self) -> Arc<dyn GenerationBackend> {
        Arc::clone(&self.backend)
    }

    pub fn rate_controller(&self) -> &RateController {
        &self.rate
    }

    /// Run the chain with a fresh [`RateState`].
    pub async fn run(
        &self,
        request: &PipelineRequest,
        progress: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<ArticleResult> {
        let mut state = RateState::new();
        self.run_with_state(request, &mut state, progress, cancel)
            .await
    }

    /// Run the chain, gating backend calls with a caller-owned [`RateState`].
    pub async fn run_with_state(
        &self,
        request: &PipelineRequest,
        state: &mut RateState,
        progress: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<ArticleResult> {
        let run_id = RunId::new();
        self.execute(run_id, request, state, progress, cancel).await
    }

    #[instrument(skip_all, fields(run_id = %run_id, topic = %request.topic()))]
    async fn execute(
        &self,
        run_id: RunId,
        request: &PipelineRequest,
        state: &mut RateState,
        progress: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<ArticleResult> {
        let start = Instant::now();
        let calls_before = state.call_count();
        let year = self
            .options
            .current_year
            .unwrap_or_else(|| Utc::now().year());
        let vars = PromptVars::new(request, year);

        info!(
            tone = %request.tone(),
            audience = %request.target_audience(),
            "starting generation run"
        );

        let total = self.stages.len();
        let mut artifacts: Vec<ContextArtifact> = Vec::with_capacity(total);

        for (index, stage) in self.stages.iter().enumerate() {
            if cancel.is_cancelled() {
                warn!(before = %stage.id, "run cancelled");
                return Err(PostforgeError::Cancelled { before: stage.id });
            }

            progress.stage_started(stage.id, index, total);
            let artifact = self
                .run_stage(stage, &vars, &artifacts, state, progress)
                .instrument(info_span!("stage", stage = %stage.id))
                .await?;
            progress.stage_completed(stage.id, index, total);
            artifacts.push(artifact);
        }

        let final_text = artifacts.last().map(ContextArtifact::text).unwrap_or_default();
        let (output, kind) = extract::parse_article(final_text);
        self.soft_checks(&output, kind);

        let result = ArticleResult {
            run_id,
            kind,
            output,
            backend_calls: state.call_count() - calls_before,
            elapsed: start.elapsed(),
            completed_at: Utc::now(),
        };

        info!(
            kind = ?result.kind,
            backend_calls = result.backend_calls,
            elapsed_ms = result.elapsed.as_millis() as u64,
            "generation run complete"
        );
        progress.done(&result);
        Ok(result)
    }

    /// Prompt, tool loop, and artifact for one stage.
    async fn run_stage(
        &self,
        stage: &Stage,
        vars: &PromptVars<'_>,
        artifacts: &[ContextArtifact],
        state: &mut RateState,
        progress: &dyn ProgressReporter,
    ) -> Result<ContextArtifact> {
        let context: Vec<&ContextArtifact> = stage
            .depends_on
            .iter()
            .filter_map(|dep| artifacts.iter().find(|a| a.stage() == *dep))
            .collect();
        let unavailable: Vec<CapabilityKind> = stage
            .capabilities
            .iter()
            .copied()
            .filter(|kind| !self.toolbox.has(*kind))
            .collect();
        let offered = self.toolbox.declarations_for(&stage.capabilities);

        let mut invocations: Vec<ToolInvocation> = Vec::new();
        let mut round = 0u32;

        loop {
            let tools_allowed = !offered.is_empty() && round < self.options.max_tool_rounds;
            let request = GenerationRequest {
                prompt: build_prompt(stage, vars, &context, &unavailable, &invocations),
                tools: if tools_allowed {
                    offered.clone()
                } else {
                    Vec::new()
                },
            };

            self.rate.before_call(state).await;
            let response = self.backend.generate(&request).await.map_err(|e| {
                warn!(stage = %stage.id, error = %e, "backend call failed");
                PostforgeError::StageFailed {
                    stage: stage.id,
                    cause: e.to_string(),
                }
            })?;

            if tools_allowed && !response.tool_calls.is_empty() {
                for call in &response.tool_calls {
                    let invocation = self.toolbox.dispatch(call).await;
                    progress.tool_invoked(stage.id, &invocation.tool_name);
                    invocations.push(invocation);
                }
                round += 1;
                continue;
            }

            if response.text.trim().is_empty() {
                return Err(PostforgeError::StageFailed {
                    stage: stage.id,
                    cause: "backend returned no text".into(),
                });
            }

            info!(
                tool_rounds = round,
                tool_calls = invocations.len(),
                text_len = response.text.len(),
                "stage complete"
            );
            return Ok(ContextArtifact::new(stage.id, response.text));
        }
    }

    /// Log quality warnings. Never fails the run.
    fn soft_checks(&self, output: &StructuredOutput, kind: OutputKind) {
        if kind == OutputKind::Complete && !HASHTAG_RANGE.contains(&output.hashtags.len()) {
            warn!(
                hashtags = output.hashtags.len(),
                "hashtag count outside {}..={}",
                HASHTAG_RANGE.start(),
                HASHTAG_RANGE.end()
            );
        }

        let words = word_count(&output.full_content);
        if !self.options.target_words.contains(&words) {
            warn!(
                words,
                min = *self.options.target_words.start(),
                max = *self.options.target_words.end(),
                "article length outside target range"
            );
        }
    }
}

/// Assemble a stage prompt.
///
/// Dependency artifacts are quoted verbatim in `context` order; tool results
/// and unavailable capabilities follow.
pub fn build_prompt(
    stage: &Stage,
    vars: &PromptVars<'_>,
    context: &[&ContextArtifact],
    unavailable: &[CapabilityKind],
    invocations: &[ToolInvocation],
) -> String {
    let mut prompt = String::new();
    let _ = writeln!(prompt, "You are {}.", vars.render(stage.role_label));
    let _ = writeln!(prompt, "Your goal: {}", vars.render(stage.goal));
    let _ = writeln!(prompt, "Background: {}", vars.render(stage.backstory));
    let _ = write!(prompt, "\n## Task\n{}\n", vars.render(stage.instructions));
    let _ = write!(
        prompt,
        "\n## Expected output\n{}\n",
        vars.render(stage.expected_output)
    );

    for artifact in context {
        let _ = write!(
            prompt,
            "\n## Context from the {} stage\n{}\n",
            artifact.stage().title(),
            artifact.text()
        );
    }

    if !unavailable.is_empty() || !invocations.is_empty() {
        prompt.push_str("\n## Tool results\n");
        for kind in unavailable {
            let _ = writeln!(
                prompt,
                "[{}] (unavailable) → {}",
                kind.tool_name(),
                kind.unavailable_notice()
            );
        }
        for inv in invocations {
            let _ = writeln!(
                prompt,
                "[{}] {} → {}",
                inv.tool_name, inv.query, inv.result_text
            );
        }
    }

    prompt
}

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}
