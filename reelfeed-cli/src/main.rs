//! Reelfeed CLI - Command-line interface
//!
//! Provides command-line access to the feed pipeline: fetching pages,
//! running a simulated scroll session and maintaining the offline cache.

mod commands;

use std::path::PathBuf;

use clap::Parser;
use reelfeed_core::RuntimeMode;
use reelfeed_core::tracing_setup::{CliLogLevel, TracingSettings, init_tracing};

#[derive(Parser)]
#[command(name = "reelfeed")]
#[command(about = "Short-video feed pipeline with offline cache and bounded decoder pool")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: commands::Commands,

    /// Console log level (RUST_LOG takes precedence)
    #[arg(long, value_enum, default_value = "info", global = true)]
    log_level: CliLogLevel,

    /// Runtime mode (production or development)
    #[arg(long, default_value = "development", global = true)]
    mode: RuntimeMode,

    /// Directory receiving the full trace of the run
    #[arg(long, global = true)]
    logs_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = TracingSettings {
        console_level: cli.log_level.into(),
        logs_dir: cli.logs_dir,
    };
    init_tracing(&settings).map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    commands::handle_command(cli.command, cli.mode).await
}
