//! Tool-dispatch protocol: handlers, schemas, and the error taxonomy
//! shared by every agent (SPEC_FULL.md §4.3, §4.3.1).

pub mod codeview;
pub mod error;
pub mod smt;
pub mod subprocess;
pub mod tool_defs;

pub use codeview::{render_code_view, CodeRequestBudget, MAX_CODE_REQUEST_ATTEMPTS};
pub use error::{Result, ToolError};
pub use smt::{solve_with_smt, SolveOutcome};
pub use subprocess::{execute_python, execute_target_program, ExecutionOutcome, PythonExecutionOutcome};
pub use tool_defs::{tool_schemas_for, AgentRole, BatchTool, FileRequest, ToolCall};
