//! CLI wiring (SPEC_FULL.md §10.4): argument parsing and subcommand
//! dispatch for the `concolic` binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub mod replay;
pub mod run;
pub mod stats;

#[derive(Debug, Parser)]
#[command(name = "concolic", about = "LLM-driven concolic execution engine")]
pub struct Cli {
    /// Path to the engine's TOML/JSON/YAML configuration file.
    #[arg(short, long, default_value = "concolic.toml")]
    pub config: PathBuf,

    /// Enable debug-level logging regardless of RUST_LOG.
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run generation iterations until the corpus has nothing left to branch from.
    Run,
    /// Re-execute a persisted test case's exec_code and diff its coverage summary.
    Replay {
        /// Test case id, as it appears in `queue/id:NNNNNN...`.
        id: u64,
    },
    /// Print aggregate corpus statistics.
    Stats,
}
