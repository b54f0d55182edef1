//! Gemini `generateContent` client.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use postforge_shared::{GeminiConfig, PostforgeError, Result, ToolCall, ToolDeclaration};

use crate::{
    BackendError, GenerationBackend, GenerationRequest, GenerationResponse, MAX_RETRY_DELAY,
    backoff_delay,
};

const USER_AGENT: &str = concat!("Postforge/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Tools<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<TextPart<'a>>,
}

#[derive(Debug, Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Tools<'a> {
    function_declarations: &'a [ToolDeclaration],
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f64,
}

impl<'a> GenerateContentRequest<'a> {
    fn new(request: &'a GenerationRequest, temperature: f64) -> Self {
        let tools = if request.tools.is_empty() {
            Vec::new()
        } else {
            vec![Tools {
                function_declarations: &request.tools,
            }]
        };
        Self {
            contents: vec![Content {
                role: "user",
                parts: vec![TextPart {
                    text: &request.prompt,
                }],
            }],
            tools,
            generation_config: GenerationConfig { temperature },
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    function_call: Option<ToolCall>,
}

impl GenerateContentResponse {
    fn into_response(self) -> std::result::Result<GenerationResponse, BackendError> {
        let candidate = self
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::Malformed("response has no candidates".into()))?;

        let mut response = GenerationResponse::default();
        for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
            if let Some(t) = part.text {
                response.text.push_str(&t);
            }
            if let Some(call) = part.function_call {
                response.tool_calls.push(call);
            }
        }

        if response.is_empty() {
            let reason = candidate.finish_reason.as_deref().unwrap_or("unknown");
            return Err(BackendError::Malformed(format!(
                "candidate has no text or function calls (finish reason: {reason})"
            )));
        }
        Ok(response)
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// HTTP client for the Gemini API with bounded retries.
pub struct GeminiClient {
    http: Client,
    endpoint: String,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout)
            .build()
            .map_err(|e| PostforgeError::Network(format!("failed to build HTTP client: {e}")))?;

        let endpoint = format!(
            "{}/models/{}:generateContent",
            config.base_url, config.model
        );

        Ok(Self {
            http,
            endpoint,
            config,
        })
    }

    /// One HTTP round trip, no retries.
    async fn attempt(
        &self,
        body: &GenerateContentRequest<'_>,
    ) -> std::result::Result<GenerationResponse, BackendError> {
        let response = self
            .http
            .post(&self.endpoint)
            .header("x-goog-api-key", &self.config.api_key)
            .json(body)
            .send()
            .await
            .map_err(map_transport)?;

        let status = response.status();
        let text = response.text().await.map_err(map_transport)?;

        if !status.is_success() {
            return Err(BackendError::Http {
                status: status.as_u16(),
                body: truncate(&text, 500),
            });
        }

        let parsed: GenerateContentResponse =
            serde_json::from_str(&text).map_err(|e| BackendError::Malformed(e.to_string()))?;
        parsed.into_response()
    }
}

#[async_trait]
impl GenerationBackend for GeminiClient {
    #[instrument(skip_all, fields(model = %self.config.model, tools = request.tools.len()))]
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> std::result::Result<GenerationResponse, BackendError> {
        let body = GenerateContentRequest::new(request, self.config.temperature);
        let max_attempts = self.config.max_retries + 1;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match self.attempt(&body).await {
                Ok(response) => {
                    debug!(
                        attempt,
                        text_len = response.text.len(),
                        tool_calls = response.tool_calls.len(),
                        "generation succeeded"
                    );
                    return Ok(response);
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempt >= max_attempts => {
                    return Err(BackendError::Exhausted {
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    let delay = backoff_delay(attempt, self.config.retry_base_delay, MAX_RETRY_DELAY);
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "generation attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

fn map_transport(e: reqwest::Error) -> BackendError {
    if e.is_timeout() {
        BackendError::Timeout
    } else {
        BackendError::Transport(e.to_string())
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    const ENDPOINT: &str = "/models/gemini-1.5-flash:generateContent";

    fn test_config(base_url: &str) -> GeminiConfig {
        GeminiConfig {
            api_key: "test-key".into(),
            model: "gemini-1.5-flash".into(),
            base_url: base_url.into(),
            temperature: 0.7,
            max_retries: 3,
            timeout: Duration::from_secs(5),
            retry_base_delay: Duration::ZERO,
        }
    }

    fn text_body(text: &str) -> String {
        serde_json::json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": text}]}
            }]
        })
        .to_string()
    }

    #[test]
    fn request_omits_tools_when_none_offered() {
        let req = GenerationRequest::text("hello");
        let body = serde_json::to_value(GenerateContentRequest::new(&req, 0.7)).unwrap();
        assert!(body.get("tools").is_none());
        assert_eq!(body["contents"][0]["parts"][0]["text"], "hello");
        assert_eq!(body["generationConfig"]["temperature"], 0.7);
    }

    #[test]
    fn request_declares_functions() {
        let req = GenerationRequest {
            prompt: "research".into(),
            tools: vec![ToolDeclaration {
                name: "search_trends".into(),
                description: "Search".into(),
                parameters: serde_json::json!({"type": "object"}),
            }],
        };
        let body = serde_json::to_value(GenerateContentRequest::new(&req, 0.2)).unwrap();
        assert_eq!(
            body["tools"][0]["functionDeclarations"][0]["name"],
            "search_trends"
        );
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé...");
        assert_eq!(truncate("short", 10), "short");
    }

    #[tokio::test]
    async fn returns_text_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ENDPOINT))
            .and(header("x-goog-api-key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_string(text_body("Hello there")))
            .expect(1)
            .mount(&server)
            .await;

        let client = GeminiClient::new(test_config(&server.uri())).unwrap();
        let resp = client
            .generate(&GenerationRequest::text("Say hello"))
            .await
            .expect("generate");
        assert_eq!(resp.text, "Hello there");
        assert!(resp.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn parses_function_calls() {
        let server = MockServer::start().await;
        let body = serde_json::json!({
            "candidates": [{
                "content": {"role": "model", "parts": [
                    {"functionCall": {"name": "search_trends", "args": {"query": "solar 2026", "search_type": "news"}}}
                ]}
            }]
        });
        Mock::given(method("POST"))
            .and(path(ENDPOINT))
            .respond_with(ResponseTemplate::new(200).set_body_string(body.to_string()))
            .mount(&server)
            .await;

        let client = GeminiClient::new(test_config(&server.uri())).unwrap();
        let resp = client
            .generate(&GenerationRequest::text("research"))
            .await
            .expect("generate");
        assert!(resp.text.is_empty());
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].name, "search_trends");
        assert_eq!(resp.tool_calls[0].args["query"], "solar 2026");
    }

    #[tokio::test]
    async fn retries_server_errors_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ENDPOINT))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(ENDPOINT))
            .respond_with(ResponseTemplate::new(200).set_body_string(text_body("recovered")))
            .expect(1)
            .mount(&server)
            .await;

        let client = GeminiClient::new(test_config(&server.uri())).unwrap();
        let resp = client
            .generate(&GenerationRequest::text("retry me"))
            .await
            .expect("generate");
        assert_eq!(resp.text, "recovered");
    }

    #[tokio::test]
    async fn exhausts_after_max_retries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ENDPOINT))
            .respond_with(ResponseTemplate::new(429).set_body_string("quota"))
            .expect(4)
            .mount(&server)
            .await;

        let client = GeminiClient::new(test_config(&server.uri())).unwrap();
        let err = client
            .generate(&GenerationRequest::text("too many"))
            .await
            .unwrap_err();
        match err {
            BackendError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 4);
                assert!(matches!(*last, BackendError::Http { status: 429, .. }));
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ENDPOINT))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
            .expect(1)
            .mount(&server)
            .await;

        let client = GeminiClient::new(test_config(&server.uri())).unwrap();
        let err = client
            .generate(&GenerationRequest::text("bad"))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Http { status: 400, .. }));
    }

    #[tokio::test]
    async fn malformed_body_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ENDPOINT))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(ENDPOINT))
            .respond_with(ResponseTemplate::new(200).set_body_string(text_body("ok")))
            .mount(&server)
            .await;

        let client = GeminiClient::new(test_config(&server.uri())).unwrap();
        let resp = client
            .generate(&GenerationRequest::text("x"))
            .await
            .expect("generate");
        assert_eq!(resp.text, "ok");
    }

    #[tokio::test]
    async fn unreachable_host_exhausts_with_transport_error() {
        let mut config = test_config("http://127.0.0.1:9");
        config.max_retries = 1;
        let client = GeminiClient::new(config).unwrap();
        let err = client
            .generate(&GenerationRequest::text("x"))
            .await
            .unwrap_err();
        match err {
            BackendError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 2);
                assert!(matches!(*last, BackendError::Transport(_) | BackendError::Timeout));
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_candidate_is_retried_then_exhausts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ENDPOINT))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                serde_json::json!({"candidates": [{"finishReason": "SAFETY"}]}).to_string(),
            ))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(ENDPOINT))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                serde_json::json!({"candidates": [{"content": {"parts": []}}]}).to_string(),
            ))
            .expect(3)
            .mount(&server)
            .await;

        let client = GeminiClient::new(test_config(&server.uri())).unwrap();
        let err = client
            .generate(&GenerationRequest::text("x"))
            .await
            .unwrap_err();
        match err {
            BackendError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 4);
                assert!(matches!(*last, BackendError::Malformed(_)));
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn blocked_candidate_then_text_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ENDPOINT))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                serde_json::json!({"candidates": [{"finishReason": "SAFETY"}]}).to_string(),
            ))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(ENDPOINT))
            .respond_with(ResponseTemplate::new(200).set_body_string(text_body("ok")))
            .expect(1)
            .mount(&server)
            .await;

        let client = GeminiClient::new(test_config(&server.uri())).unwrap();
        let resp = client
            .generate(&GenerationRequest::text("x"))
            .await
            .expect("generate");
        assert_eq!(resp.text, "ok");
    }
}
