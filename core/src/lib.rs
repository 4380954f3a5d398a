//! Core data model: test-case entity, corpus manager, state machines, cost
//! accounting, and configuration — the persistent substrate the rest of the
//! concolic execution engine is built on.

pub mod config;
pub mod corpus;
pub mod error;
pub mod state;
pub mod testcase;
pub mod usage;

pub use config::{Config, ConfigManager};
pub use corpus::{afl_filename, parse_afl_filename, CorpusManager, CorpusStatistics, SchedulingInfo};
pub use error::{ConfigError, Error, Result};
pub use state::{ConcolicExecutionState, TestcaseState};
pub use testcase::{TargetFileLines, TestCase};
pub use usage::{Usage, UsageMap, TOTAL_BUCKET};
