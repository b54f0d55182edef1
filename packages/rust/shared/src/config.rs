//! Application configuration for Postforge.
//!
//! User config lives at `~/.postforge/postforge.toml`.
//! CLI flags override config file values, which override defaults.
//! Secrets are never stored in the file, only the names of the env vars
//! holding them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PostforgeError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "postforge.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".postforge";

// ---------------------------------------------------------------------------
// Config structs (matching postforge.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Generation backend settings.
    #[serde(default)]
    pub gemini: GeminiSettings,

    /// Trend search settings.
    #[serde(default)]
    pub search: SearchSettings,

    /// Knowledge index settings.
    #[serde(default)]
    pub knowledge: KnowledgeSettings,

    /// Outbound call cadence.
    #[serde(default)]
    pub rate_limit: RateLimitSettings,

    /// Stage chain behavior.
    #[serde(default)]
    pub pipeline: PipelineSettings,
}

/// `[gemini]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiSettings {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_gemini_key_env")]
    pub api_key_env: String,

    /// Model used for every stage.
    #[serde(default = "default_model")]
    pub model: String,

    /// API root, without the `/models/...` suffix.
    #[serde(default = "default_gemini_base_url")]
    pub base_url: String,

    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Per-attempt timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GeminiSettings {
    fn default() -> Self {
        Self {
            api_key_env: default_gemini_key_env(),
            model: default_model(),
            base_url: default_gemini_base_url(),
            temperature: default_temperature(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_gemini_key_env() -> String {
    "GOOGLE_API_KEY".into()
}
fn default_model() -> String {
    "gemini-1.5-flash".into()
}
fn default_gemini_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".into()
}
fn default_temperature() -> f64 {
    0.7
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    120
}

/// `[search]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSettings {
    /// Name of the env var holding the SerpAPI key. Unset disables trend search.
    #[serde(default = "default_search_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_search_base_url")]
    pub base_url: String,

    /// Geographic location sent with every query unless overridden per call.
    #[serde(default = "default_location")]
    pub location: String,

    #[serde(default = "default_search_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            api_key_env: default_search_key_env(),
            base_url: default_search_base_url(),
            location: default_location(),
            timeout_secs: default_search_timeout_secs(),
        }
    }
}

fn default_search_key_env() -> String {
    "SERPAPI_API_KEY".into()
}
fn default_search_base_url() -> String {
    "https://serpapi.com".into()
}
fn default_location() -> String {
    "United States".into()
}
fn default_search_timeout_secs() -> u64 {
    30
}

/// `[knowledge]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeSettings {
    /// Path to the prebuilt passage index. `~` expands to the home directory.
    #[serde(default = "default_index_path")]
    pub index_path: String,

    /// Passages returned per query.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for KnowledgeSettings {
    fn default() -> Self {
        Self {
            index_path: default_index_path(),
            top_k: default_top_k(),
        }
    }
}

fn default_index_path() -> String {
    "~/.postforge/knowledge.db".into()
}
fn default_top_k() -> usize {
    2
}

/// `[rate_limit]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    /// Minimum spacing between backend calls.
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,

    /// Apply progressive backoff on every Nth call. 0 disables it.
    #[serde(default = "default_backoff_every")]
    pub backoff_every: u64,

    #[serde(default = "default_backoff_step_ms")]
    pub backoff_step_ms: u64,

    #[serde(default = "default_backoff_ceiling_ms")]
    pub backoff_ceiling_ms: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            min_interval_ms: default_min_interval_ms(),
            backoff_every: default_backoff_every(),
            backoff_step_ms: default_backoff_step_ms(),
            backoff_ceiling_ms: default_backoff_ceiling_ms(),
        }
    }
}

fn default_min_interval_ms() -> u64 {
    2_000
}
fn default_backoff_every() -> u64 {
    5
}
fn default_backoff_step_ms() -> u64 {
    500
}
fn default_backoff_ceiling_ms() -> u64 {
    10_000
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Tool-call rounds a stage may spend before it must answer in text.
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,

    /// Soft lower bound on article length, in words.
    #[serde(default = "default_target_words_min")]
    pub target_words_min: usize,

    /// Soft upper bound on article length, in words.
    #[serde(default = "default_target_words_max")]
    pub target_words_max: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_tool_rounds: default_max_tool_rounds(),
            target_words_min: default_target_words_min(),
            target_words_max: default_target_words_max(),
        }
    }
}

fn default_max_tool_rounds() -> u32 {
    3
}
fn default_target_words_min() -> usize {
    800
}
fn default_target_words_max() -> usize {
    1_200
}

// ---------------------------------------------------------------------------
// Runtime configs (merged from config file + environment)
// ---------------------------------------------------------------------------

/// Resolved generation backend configuration, injected into the client.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub temperature: f64,
    pub max_retries: u32,
    pub timeout: Duration,
    /// Base delay of the exponential retry schedule.
    pub retry_base_delay: Duration,
}

impl GeminiConfig {
    /// Resolve from config, reading the API key from the configured env var.
    pub fn from_app_config(config: &AppConfig) -> Result<Self> {
        let api_key = read_key(&config.gemini.api_key_env).ok_or_else(|| {
            PostforgeError::config(format!(
                "Gemini API key not found. Set the {} environment variable.",
                config.gemini.api_key_env
            ))
        })?;
        validate_base_url(&config.gemini.base_url)?;

        Ok(Self {
            api_key,
            model: config.gemini.model.clone(),
            base_url: config.gemini.base_url.trim_end_matches('/').to_string(),
            temperature: config.gemini.temperature,
            max_retries: config.gemini.max_retries,
            timeout: Duration::from_secs(config.gemini.timeout_secs),
            retry_base_delay: Duration::from_secs(1),
        })
    }
}

/// Resolved trend search configuration.
#[derive(Debug, Clone)]
pub struct TrendSearchConfig {
    pub api_key: String,
    pub base_url: String,
    pub location: String,
    pub timeout: Duration,
}

impl TrendSearchConfig {
    /// Resolve from config. `Ok(None)` when the key is unset: trend search is
    /// optional and the pipeline runs without it.
    pub fn from_app_config(config: &AppConfig) -> Result<Option<Self>> {
        let Some(api_key) = read_key(&config.search.api_key_env) else {
            tracing::warn!(
                env = %config.search.api_key_env,
                "search API key not set, trend research will be limited"
            );
            return Ok(None);
        };
        validate_base_url(&config.search.base_url)?;

        Ok(Some(Self {
            api_key,
            base_url: config.search.base_url.trim_end_matches('/').to_string(),
            location: config.search.location.clone(),
            timeout: Duration::from_secs(config.search.timeout_secs),
        }))
    }
}

fn read_key(var_name: &str) -> Option<String> {
    std::env::var(var_name).ok().filter(|v| !v.trim().is_empty())
}

fn validate_base_url(raw: &str) -> Result<()> {
    let parsed = url::Url::parse(raw)
        .map_err(|e| PostforgeError::config(format!("invalid base URL '{raw}': {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(PostforgeError::config(format!(
            "invalid base URL '{raw}': unsupported scheme '{other}'"
        ))),
    }
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.postforge/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| PostforgeError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.postforge/postforge.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| PostforgeError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| PostforgeError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| PostforgeError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| PostforgeError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| PostforgeError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that the Gemini API key env var is set and non-empty.
pub fn validate_api_key(config: &AppConfig) -> Result<()> {
    let var_name = &config.gemini.api_key_env;
    match read_key(var_name) {
        Some(_) => Ok(()),
        None => Err(PostforgeError::config(format!(
            "Gemini API key not found. Set the {var_name} environment variable.\n\
             Get a key at https://aistudio.google.com/app/apikey"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("GOOGLE_API_KEY"));
        assert!(toml_str.contains("SERPAPI_API_KEY"));
        assert!(toml_str.contains("min_interval_ms"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.gemini.max_retries, 3);
        assert_eq!(parsed.rate_limit.backoff_every, 5);
        assert_eq!(parsed.knowledge.top_k, 2);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[gemini]
model = "gemini-1.5-pro"

[rate_limit]
min_interval_ms = 500
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.gemini.model, "gemini-1.5-pro");
        assert_eq!(config.gemini.timeout_secs, 120);
        assert_eq!(config.rate_limit.min_interval_ms, 500);
        assert_eq!(config.rate_limit.backoff_ceiling_ms, 10_000);
        assert_eq!(config.pipeline.target_words_max, 1_200);
    }

    #[test]
    fn api_key_validation() {
        let mut config = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.gemini.api_key_env = "PF_TEST_NONEXISTENT_KEY_12345".into();
        let result = validate_api_key(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));

        let err = GeminiConfig::from_app_config(&config).unwrap_err();
        assert!(matches!(err, PostforgeError::Config { .. }));
    }

    #[test]
    fn missing_search_key_disables_search() {
        let mut config = AppConfig::default();
        config.search.api_key_env = "PF_TEST_NONEXISTENT_SEARCH_KEY_67890".into();
        let resolved = TrendSearchConfig::from_app_config(&config).expect("resolve");
        assert!(resolved.is_none());
    }

    #[test]
    fn base_url_validation() {
        assert!(validate_base_url("https://serpapi.com").is_ok());
        assert!(validate_base_url("ftp://serpapi.com").is_err());
        assert!(validate_base_url("not a url").is_err());
    }

    #[test]
    fn expand_home_leaves_absolute_paths() {
        assert_eq!(expand_home("/tmp/index.db"), PathBuf::from("/tmp/index.db"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/x.db"), home.join("x.db"));
        }
    }
}
