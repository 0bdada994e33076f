//! JitFlow entry point.

use anyhow::Result;
use clap::{Parser, Subcommand};
use jitflow_config::JitConfig;
use jitflow_strategy::{metrics, JitEngine};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "jitflow", about = "JIT liquidity opportunity pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the pipeline until interrupted.
    Start,
    /// Print configuration and connectivity, then exit.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = JitConfig::from_env()?;

    match cli.command {
        Command::Start => {
            metrics::init(config.metrics_port)?;
            JitEngine::new(config).run().await
        }
        Command::Status => JitEngine::status(config).await,
    }
}
