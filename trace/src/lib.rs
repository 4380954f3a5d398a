//! Coverage and trace engine: block-level coverage accounting over
//! instrumented source, and the process-wide coverage registry.

pub mod block;
pub mod collector;
pub mod common;
pub mod compress;
pub mod registry;

pub use block::Block;
pub use collector::{TraceCollector, TraceIngestResult};
pub use compress::{get_executed_blocks, render_call_chain_capped, trace_compress, CompressedCall};
pub use registry::{CollectTraceOutcome, CoverageRegistry, RegistryError};
