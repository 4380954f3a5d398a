//! Tool-protocol error taxonomy (SPEC_FULL.md §7).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Error: {0}")]
    Protocol(String),

    #[error("Error: code request cap exceeded ({attempted}/{max})")]
    CodeRequestCapExceeded { attempted: u32, max: u32 },

    #[error("smt solver timed out after {0}s")]
    SmtTimeout(u64),

    #[error("smt solver returned unknown: {0}")]
    SmtUnknown(String),

    #[error("python execution timed out after {0}s")]
    PythonTimeout(u64),

    #[error("subprocess failed to launch: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("smoke-test run failed: {0}")]
    SmokeTestFailed(String),
}

pub type Result<T> = std::result::Result<T, ToolError>;
