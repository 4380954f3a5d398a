//! Block bookkeeping for the trace collector (SPEC_FULL.md §3, §4.1).

/// A lexical instrumentation unit delimited by matching `enter`/`exit`
/// markers for a function and numeric id. Blocks nest; every block except
/// the synthetic root has a parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub function: String,
    pub block_id: u64,
    /// 1-indexed line range in the instrumented file.
    pub start: u32,
    pub end: u32,
    /// 1-indexed line range in the de-instrumented (real) view.
    pub real_start: u32,
    pub real_end: u32,
    pub parent: Option<usize>,
}

pub const GLOBAL_FUNCTION: &str = "Global";
pub const GLOBAL_BLOCK_ID: u64 = 0;

impl Block {
    pub fn key(&self) -> (String, u64) {
        (self.function.clone(), self.block_id)
    }

    pub fn is_global(&self) -> bool {
        self.function == GLOBAL_FUNCTION && self.block_id == GLOBAL_BLOCK_ID
    }
}
