//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Report, Result};
use indicatif::{ProgressBar, ProgressStyle};
use postforge_core::{ArticleService, ProgressReporter};
use postforge_shared::{
    AppConfig, ArticleResult, ErrorClass, OutputKind, PostforgeError, StageId, expand_home,
    init_config, load_config, load_config_from, validate_api_key,
};
use postforge_storage::PassageStore;
use postforge_tools::KnowledgeIndex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Postforge: research, draft, edit and package articles with Gemini.
#[derive(Parser)]
#[command(
    name = "postforge",
    version,
    about = "Generate researched, edited, SEO-packaged blog articles.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.postforge/postforge.toml).
    #[arg(long, global = true, env = "POSTFORGE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Generate an article from explicit fields.
    Generate {
        /// What the article is about.
        #[arg(short, long)]
        topic: String,

        /// Writing tone (defaults to "professional").
        #[arg(long)]
        tone: Option<String>,

        /// Intended readers (defaults to "a general audience").
        #[arg(short, long)]
        audience: Option<String>,

        /// Print the result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Generate an article from a free-text request.
    Prompt {
        /// The request, e.g. "a casual post on home solar for homeowners".
        text: String,

        /// Print the result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "postforge=info",
        1 => "postforge=debug",
        _ => "postforge=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

/// Process exit code for a failed command: 2 for bad requests, 1 otherwise.
pub(crate) fn exit_code(report: &Report) -> i32 {
    match report.downcast_ref::<PostforgeError>().map(PostforgeError::class) {
        Some(ErrorClass::Client) => 2,
        _ => 1,
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config;
    match cli.command {
        Command::Generate {
            topic,
            tone,
            audience,
            json,
        } => {
            cmd_generate(
                config_path,
                &topic,
                tone.as_deref(),
                audience.as_deref(),
                json,
            )
            .await
        }
        Command::Prompt { text, json } => cmd_prompt(config_path, &text, json).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config_path).await,
        },
    }
}

fn resolve_config(path: Option<PathBuf>) -> Result<AppConfig> {
    Ok(match path {
        Some(p) => load_config_from(&p)?,
        None => load_config()?,
    })
}

/// Load config, open the knowledge index if present, and build the service.
async fn build_service(config_path: Option<PathBuf>) -> Result<ArticleService> {
    let config = resolve_config(config_path)?;
    validate_api_key(&config)?;

    let index_path = expand_home(&config.knowledge.index_path);
    let index: Option<Arc<dyn KnowledgeIndex>> = if index_path.exists() {
        match PassageStore::open_readonly(&index_path).await {
            Ok(store) => {
                info!(path = %index_path.display(), "knowledge index opened");
                Some(Arc::new(store))
            }
            Err(e) => {
                warn!(path = %index_path.display(), error = %e, "failed to open knowledge index");
                None
            }
        }
    } else {
        info!(path = %index_path.display(), "no knowledge index found");
        None
    };

    Ok(ArticleService::from_config(&config, index)?)
}

/// Cancel `token` on Ctrl-C. In-flight calls finish; the run stops at the next stage.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current stage");
            token.cancel();
        }
    });
}

async fn cmd_generate(
    config_path: Option<PathBuf>,
    topic: &str,
    tone: Option<&str>,
    audience: Option<&str>,
    json: bool,
) -> Result<()> {
    let service = build_service(config_path).await?;
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    info!(topic, "generating article");
    let reporter = CliProgress::new();
    let result = service
        .generate(topic, tone, audience, &reporter, &cancel)
        .await;
    reporter.clear();

    print_result(&result?, json)
}

async fn cmd_prompt(config_path: Option<PathBuf>, text: &str, json: bool) -> Result<()> {
    let service = build_service(config_path).await?;
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let reporter = CliProgress::new();
    reporter.spinner.set_message("Understanding request");
    let result = service.generate_from_prompt(text, &reporter, &cancel).await;
    reporter.clear();

    print_result(&result?, json)
}

fn print_result(result: &ArticleResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    let out = &result.output;
    println!();
    if result.kind == OutputKind::Partial {
        println!("  Note: structured metadata could not be extracted; showing raw article.");
        println!();
    } else {
        println!("  Title:       {}", out.title);
        println!("  Description: {}", out.meta_description);
        println!("  Hashtags:    {}", out.hashtags.join(" "));
        println!("  Summary:     {}", out.summary);
        println!();
    }
    println!("{}", out.full_content);
    println!();
    println!(
        "  Run {} · {} backend calls · {:.1}s",
        result.run_id,
        result.backend_calls,
        result.elapsed.as_secs_f64()
    );
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn clear(&self) {
        if !self.spinner.is_finished() {
            self.spinner.finish_and_clear();
        }
    }
}

fn stage_message(stage: StageId) -> &'static str {
    match stage {
        StageId::Research => "Researching trends",
        StageId::Draft => "Drafting article",
        StageId::Edit => "Editing draft",
        StageId::Package => "Packaging for publication",
    }
}

impl ProgressReporter for CliProgress {
    fn stage_started(&self, stage: StageId, index: usize, total: usize) {
        self.spinner
            .set_message(format!("[{}/{total}] {}", index + 1, stage_message(stage)));
    }

    fn tool_invoked(&self, stage: StageId, tool: &str) {
        self.spinner
            .set_message(format!("{} (used {tool})", stage_message(stage)));
    }

    fn stage_completed(&self, _stage: StageId, _index: usize, _total: usize) {}

    fn done(&self, _result: &ArticleResult) {
        self.spinner.finish_and_clear();
    }
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config_path: Option<PathBuf>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_generate_flags() {
        let cli = Cli::try_parse_from([
            "postforge",
            "-v",
            "generate",
            "--topic",
            "renewable energy",
            "--tone",
            "casual",
            "--audience",
            "homeowners",
            "--json",
        ])
        .expect("parse");
        assert_eq!(cli.verbose, 1);
        match cli.command {
            Command::Generate {
                topic,
                tone,
                audience,
                json,
            } => {
                assert_eq!(topic, "renewable energy");
                assert_eq!(tone.as_deref(), Some("casual"));
                assert_eq!(audience.as_deref(), Some("homeowners"));
                assert!(json);
            }
            _ => panic!("expected generate"),
        }
    }

    #[test]
    fn parses_prompt_with_global_flags() {
        let cli = Cli::try_parse_from([
            "postforge",
            "prompt",
            "a post on solar",
            "--log-format",
            "json",
            "--config",
            "/tmp/pf.toml",
        ])
        .expect("parse");
        assert!(matches!(cli.log_format, LogFormat::Json));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/pf.toml")));
        assert!(matches!(cli.command, Command::Prompt { json: false, .. }));
    }

    #[test]
    fn generate_requires_topic() {
        assert!(Cli::try_parse_from(["postforge", "generate"]).is_err());
    }

    #[test]
    fn exit_codes_follow_error_class() {
        let client: Report = PostforgeError::format("topic", "missing").into();
        assert_eq!(exit_code(&client), 2);

        let server: Report = PostforgeError::StageFailed {
            stage: StageId::Draft,
            cause: "HTTP 503".into(),
        }
        .into();
        assert_eq!(exit_code(&server), 1);

        let other = color_eyre::eyre::eyre!("something else");
        assert_eq!(exit_code(&other), 1);
    }
}
