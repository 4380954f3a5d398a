//! Domain error taxonomy for the corpus/config layer.
//!
//! Library code returns [`Error`]; the orchestrator and CLI binary wrap these
//! into `anyhow::Result` with iteration/test-case context attached at the
//! call site.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("test case {0} not found in corpus")]
    UnknownTestCase(u64),

    #[error("test case {child} references src_id {src} which does not exist or is not smaller")]
    InvalidLineage { child: u64, src: u64 },

    #[error("persistence failed after {retries} retries: {reason}")]
    PersistenceExhausted { retries: u32, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("malformed on-disk case file {path}: {reason}")]
    MalformedCaseFile { path: String, reason: String },

    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path} as {format}: {reason}")]
    Parse {
        path: String,
        format: String,
        reason: String,
    },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unknown config format for {path}")]
    UnknownFormat { path: String },
}
