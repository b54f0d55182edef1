//! Live web/news search through a SerpAPI-compatible endpoint.

use std::fmt::Write as _;

use reqwest::Client;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use postforge_shared::{PostforgeError, Result, TrendSearchConfig};

const USER_AGENT: &str = concat!("Postforge/", env!("CARGO_PKG_VERSION"));

const DEFAULT_NUM_RESULTS: u64 = 10;
const MAX_NUM_RESULTS: u64 = 20;
const MAX_LISTED_RESULTS: usize = 10;
const MAX_RELATED_SEARCHES: usize = 5;
const MAX_PEOPLE_ALSO_ASK: usize = 3;

/// Recency/vertical filter applied to a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    General,
    /// News vertical, past week.
    News,
    /// Any result, past day.
    Trending,
}

impl SearchMode {
    /// Parse the `search_type` argument. Unknown values fall back to general.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "news" => Self::News,
            "trending" | "trends" => Self::Trending,
            _ => Self::General,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "search",
            Self::News => "news",
            Self::Trending => "trends",
        }
    }

    /// Extra query parameters for this mode.
    fn params(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::General => &[],
            Self::News => &[("tbm", "nws"), ("tbs", "qdr:w")],
            Self::Trending => &[("tbs", "qdr:d")],
        }
    }
}

/// Per-call options resolved from tool-call arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SearchOptions {
    mode: SearchMode,
    location: String,
    num_results: u64,
}

impl SearchOptions {
    fn from_params(params: &Map<String, Value>, default_location: &str) -> Self {
        let mode = params
            .get("search_type")
            .and_then(Value::as_str)
            .map_or(SearchMode::General, SearchMode::parse);

        let location = params
            .get("location")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .unwrap_or(default_location)
            .to_string();

        let num_results = params
            .get("num_results")
            .and_then(|v| v.as_u64().or_else(|| v.as_f64().map(|f| f.max(0.0) as u64)))
            .unwrap_or(DEFAULT_NUM_RESULTS)
            .clamp(1, MAX_NUM_RESULTS);

        Self {
            mode,
            location,
            num_results,
        }
    }
}

/// The trend search capability.
#[derive(Debug, Clone)]
pub struct TrendSearch {
    http: Client,
    config: TrendSearchConfig,
}

impl TrendSearch {
    pub fn new(config: TrendSearchConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout)
            .build()
            .map_err(|e| PostforgeError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, config })
    }

    /// Run a search and render the results as prompt-ready text.
    ///
    /// Never fails: upstream errors become an `Error performing search` line.
    pub async fn search(&self, query: &str, params: &Map<String, Value>) -> String {
        let opts = SearchOptions::from_params(params, &self.config.location);
        match self.fetch(query, &opts).await {
            Ok(body) => format_results(&body, query, opts.mode),
            Err(e) => {
                warn!(query, error = %e, "trend search failed");
                format!("Error performing search: {e}")
            }
        }
    }

    async fn fetch(&self, query: &str, opts: &SearchOptions) -> Result<Value> {
        let url = format!("{}/search.json", self.config.base_url);
        let num = opts.num_results.to_string();
        let mut query_params: Vec<(&str, &str)> = vec![
            ("q", query),
            ("api_key", self.config.api_key.as_str()),
            ("engine", "google"),
            ("location", opts.location.as_str()),
            ("num", num.as_str()),
            ("safe", "active"),
        ];
        query_params.extend_from_slice(opts.mode.params());

        debug!(query, mode = opts.mode.as_str(), num = opts.num_results, "searching");

        let response = self
            .http
            .get(&url)
            .query(&query_params)
            .send()
            .await
            .map_err(|e| PostforgeError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PostforgeError::Network(format!("HTTP {status}")));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| PostforgeError::Network(format!("failed to decode response: {e}")))?;

        if let Some(err) = body.get("error").and_then(Value::as_str) {
            return Err(PostforgeError::Network(err.to_string()));
        }
        Ok(body)
    }
}

/// Render a SerpAPI response body.
fn format_results(body: &Value, query: &str, mode: SearchMode) -> String {
    let news = array(body, "news_results");
    let results = if news.is_empty() {
        array(body, "organic_results")
    } else {
        news
    };

    if results.is_empty() {
        return format!("No relevant results found for: {query}");
    }

    let mut out = format!("Search Results for '{query}' ({}):\n\n", mode.as_str());
    for (i, result) in results.iter().take(MAX_LISTED_RESULTS).enumerate() {
        let title = str_field(result, "title").unwrap_or("No title");
        let snippet = str_field(result, "snippet")
            .or_else(|| str_field(result, "summary"))
            .unwrap_or("No description");
        let link = str_field(result, "link").unwrap_or("No link");

        let _ = writeln!(out, "{}. **{title}**", i + 1);
        if let Some(date) = str_field(result, "date") {
            let _ = writeln!(out, "  {date}");
        }
        let _ = writeln!(out, "  {snippet}");
        let _ = writeln!(out, "  {link}\n");
    }

    let related = array(body, "related_searches");
    if !related.is_empty() {
        out.push_str("\nRelated Trending Searches:\n");
        for item in related.iter().take(MAX_RELATED_SEARCHES) {
            if let Some(q) = str_field(item, "query").or_else(|| item.as_str()) {
                let _ = writeln!(out, "• {q}");
            }
        }
    }

    let questions = array(body, "people_also_ask");
    if !questions.is_empty() {
        out.push_str("\nPeople Also Ask:\n");
        for item in questions.iter().take(MAX_PEOPLE_ALSO_ASK) {
            if let Some(q) = str_field(item, "question").or_else(|| item.as_str()) {
                let _ = writeln!(out, "• {q}");
            }
        }
    }

    out
}

fn array<'a>(body: &'a Value, key: &str) -> &'a [Value] {
    body.get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

/// A non-empty string field.
fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn tool(base_url: &str) -> TrendSearch {
        TrendSearch::new(TrendSearchConfig {
            api_key: "serp-key".into(),
            base_url: base_url.into(),
            location: "United States".into(),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn options_clamp_and_default() {
        let opts = SearchOptions::from_params(&Map::new(), "United States");
        assert_eq!(opts.mode, SearchMode::General);
        assert_eq!(opts.num_results, 10);
        assert_eq!(opts.location, "United States");

        let opts = SearchOptions::from_params(
            &params(json!({"num_results": 50, "search_type": "trending", "location": "Canada"})),
            "United States",
        );
        assert_eq!(opts.num_results, 20);
        assert_eq!(opts.mode, SearchMode::Trending);
        assert_eq!(opts.location, "Canada");

        let opts = SearchOptions::from_params(&params(json!({"num_results": 0})), "US");
        assert_eq!(opts.num_results, 1);
    }

    #[test]
    fn mode_parsing() {
        assert_eq!(SearchMode::parse("news"), SearchMode::News);
        assert_eq!(SearchMode::parse("Trends"), SearchMode::Trending);
        assert_eq!(SearchMode::parse("search"), SearchMode::General);
        assert_eq!(SearchMode::parse("shopping"), SearchMode::General);
    }

    #[test]
    fn formats_news_before_organic() {
        let body = json!({
            "organic_results": [{"title": "Organic", "snippet": "o", "link": "https://o"}],
            "news_results": [
                {"title": "Solar boom", "date": "2 days ago", "snippet": "Installs up", "link": "https://n/1"},
                {"title": "Grid news", "summary": "Summary only", "link": "https://n/2"},
                {"title": "Bare"}
            ],
            "related_searches": [{"query": "solar tax credit"}, {"query": "heat pumps"}],
            "people_also_ask": [{"question": "Is solar worth it?"}]
        });
        let out = format_results(&body, "solar", SearchMode::News);
        assert!(out.starts_with("Search Results for 'solar' (news):\n\n"));
        assert!(out.contains("1. **Solar boom**\n  2 days ago\n  Installs up\n  https://n/1\n"));
        assert!(out.contains("2. **Grid news**\n  Summary only\n"));
        assert!(out.contains("3. **Bare**\n  No description\n  No link\n"));
        assert!(!out.contains("Organic"));
        assert!(out.contains("Related Trending Searches:\n• solar tax credit\n• heat pumps\n"));
        assert!(out.contains("People Also Ask:\n• Is solar worth it?\n"));
    }

    #[test]
    fn caps_listed_results() {
        let items: Vec<Value> = (0..15)
            .map(|i| json!({"title": format!("r{i}"), "snippet": "s", "link": "l"}))
            .collect();
        let related: Vec<Value> = (0..8).map(|i| json!({"query": format!("q{i}")})).collect();
        let body = json!({"organic_results": items, "related_searches": related});
        let out = format_results(&body, "x", SearchMode::General);
        assert!(out.contains("10. **r9**"));
        assert!(!out.contains("11. **"));
        assert!(out.contains("• q4"));
        assert!(!out.contains("• q5"));
    }

    #[test]
    fn empty_results_message() {
        let out = format_results(&json!({"organic_results": []}), "nothing", SearchMode::General);
        assert_eq!(out, "No relevant results found for: nothing");
    }

    #[tokio::test]
    async fn sends_news_parameters() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search.json"))
            .and(query_param("q", "renewable energy"))
            .and(query_param("engine", "google"))
            .and(query_param("safe", "active"))
            .and(query_param("tbm", "nws"))
            .and(query_param("tbs", "qdr:w"))
            .and(query_param("num", "5"))
            .and(query_param("location", "United States"))
            .and(query_param("api_key", "serp-key"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                json!({"news_results": [{"title": "Wind", "snippet": "up", "link": "https://w"}]})
                    .to_string(),
            ))
            .expect(1)
            .mount(&server)
            .await;

        let out = tool(&server.uri())
            .search(
                "renewable energy",
                &params(json!({"search_type": "news", "num_results": 5})),
            )
            .await;
        assert!(out.contains("1. **Wind**"), "got: {out}");
    }

    #[tokio::test]
    async fn upstream_error_field_soft_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search.json"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(json!({"error": "Invalid API key."}).to_string()),
            )
            .mount(&server)
            .await;

        let out = tool(&server.uri()).search("x", &Map::new()).await;
        assert!(out.starts_with("Error performing search:"));
        assert!(out.contains("Invalid API key."));
    }

    #[tokio::test]
    async fn http_failure_soft_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search.json"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let out = tool(&server.uri()).search("x", &Map::new()).await;
        assert!(out.starts_with("Error performing search:"));
        assert!(out.contains("500"));

        let out = tool("http://127.0.0.1:9").search("x", &Map::new()).await;
        assert!(out.starts_with("Error performing search:"));
    }
}
