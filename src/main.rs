//! Binary entry point: parses CLI arguments, wires up tracing, and
//! dispatches to the `run` / `replay` / `stats` subcommands (SPEC_FULL.md
//! §10.1, §10.4).

use clap::Parser;
use tracing_subscriber::EnvFilter;

use concolic_engine::cli::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Run => concolic_engine::cli::run::run(&cli.config).await,
        Command::Replay { id } => concolic_engine::cli::replay::replay(&cli.config, id).await,
        Command::Stats => concolic_engine::cli::stats::stats(&cli.config).await,
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
