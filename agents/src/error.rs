//! Aggregate error enum for the agents crate (SPEC_FULL.md §10.2), unifying
//! the per-agent-role error enums so the orchestrator can convert with `?`
//! and attach iteration/test-case context via `anyhow`.

use thiserror::Error;

use crate::reviewer::ReviewError;
use crate::scheduler::SchedulerError;
use crate::solver::SolverError;
use crate::summarizer::SummarizerError;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("scheduler: {0}")]
    Scheduler(#[from] SchedulerError),
    #[error("summarizer: {0}")]
    Summarizer(#[from] SummarizerError),
    #[error("solver: {0}")]
    Solver(#[from] SolverError),
    #[error("reviewer: {0}")]
    Review(#[from] ReviewError),
}
