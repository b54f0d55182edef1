//! Postforge CLI: topic in, researched and packaged article out.
//!
//! Runs the Research → Draft → Edit → Package chain against Gemini, with
//! optional live trend search and a local knowledge index.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);

    if let Err(report) = commands::run(cli).await {
        eprintln!("Error: {report:?}");
        std::process::exit(commands::exit_code(&report));
    }
    Ok(())
}
