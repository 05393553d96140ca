//! Keel CLI
//!
//! Runs builds on the local machine and inspects build definitions and the
//! image registry.

mod commands;
mod config;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "keel")]
#[command(about = "Keel container build runner", long_about = None)]
struct Cli {
    /// Container runtime binary
    #[arg(long, env = "KEEL_RUNTIME", default_value = "docker")]
    runtime: String,

    /// Registry file layered over the built-in image registry
    #[arg(long, env = "KEEL_REGISTRY")]
    registry: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    // build output owns stdout, logs go to stderr
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keel_runner=info,keel_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.runtime, cli.registry)?;

    let code = handle_command(cli.command, &config).await?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
