//! Tool catalogue: JSON schemas and the typed call/observation surface
//! every agent dispatch loop shares (SPEC_FULL.md §4.3, §4.3.1).

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A single decoded tool invocation from a model turn.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "name", content = "arguments", rename_all = "snake_case")]
pub enum ToolCall {
    Think {
        reasoning: String,
    },
    RequestCode {
        file_requests: Vec<FileRequest>,
    },
    SelectTargetBranch {
        target_branch: String,
        justification: String,
        expected_covered_lines: Option<Vec<u32>>,
    },
    GeneratePathConstraint {
        path_constraint: String,
    },
    SolveWithSmt {
        smt_constraints: String,
    },
    ExecutePython {
        python_code: String,
    },
    ProvideSolution {
        is_satisfiable: bool,
        python_execution: Option<String>,
    },
    ReviewSolveAnswer {
        need_adjust: bool,
        corrected_exec_code: Option<String>,
    },
    ReviewSummaryAnswer {
        need_adjust: bool,
        corrected_target_branch: Option<String>,
        corrected_path_constraint: Option<String>,
    },
    ProvideSelection {
        test_case_id: u64,
        justification: String,
    },
    DetectFuncFinish {
        reasoning: String,
    },
    Finish {
        reasoning: String,
    },
}

impl ToolCall {
    /// The label this call is attributed to for cost accounting and for
    /// the "previous tool(s)" bookkeeping in SPEC_FULL.md §4.6.
    pub fn label(&self) -> &'static str {
        match self {
            ToolCall::Think { .. } => "think",
            ToolCall::RequestCode { .. } => "request_code",
            ToolCall::SelectTargetBranch { .. } => "select_target_branch",
            ToolCall::GeneratePathConstraint { .. } => "generate_path_constraint",
            ToolCall::SolveWithSmt { .. } => "solve_with_smt",
            ToolCall::ExecutePython { .. } => "execute_python",
            ToolCall::ProvideSolution { .. } => "provide_solution",
            ToolCall::ReviewSolveAnswer { .. } => "review_solve_answer",
            ToolCall::ReviewSummaryAnswer { .. } => "review_summary_answer",
            ToolCall::ProvideSelection { .. } => "provide_selection",
            ToolCall::DetectFuncFinish { .. } => "detect_func_finish",
            ToolCall::Finish { .. } => "finish",
        }
    }

    /// Whether this call, if accepted, ends the agent's dispatch session.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ToolCall::SelectTargetBranch { .. }
                | ToolCall::GeneratePathConstraint { .. }
                | ToolCall::ProvideSolution { .. }
                | ToolCall::ReviewSolveAnswer { .. }
                | ToolCall::ReviewSummaryAnswer { .. }
                | ToolCall::ProvideSelection { .. }
                | ToolCall::DetectFuncFinish { .. }
                | ToolCall::Finish { .. }
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRequest {
    pub file: String,
    pub start: u32,
    pub end: u32,
}

/// A batch envelope wrapping one or more tool calls from a single model
/// turn, expressing parallel intent (SPEC_FULL.md §4.3.1).
#[derive(Debug, Clone)]
pub struct BatchTool {
    pub calls: Vec<ToolCall>,
}

impl BatchTool {
    pub fn single(call: ToolCall) -> Self {
        Self { calls: vec![call] }
    }

    /// Returns the index of the first terminal call, if any. Per spec,
    /// only the first terminal call in a batch closes the session;
    /// subsequent terminal calls are still evaluated but their
    /// termination effect is discarded with a warning observation.
    pub fn first_terminal_index(&self) -> Option<usize> {
        self.calls.iter().position(|c| c.is_terminal())
    }
}

/// The agent roles that constrain which tools are offered in a given
/// dispatch loop (SPEC_FULL.md §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentRole {
    Scheduler,
    Summarizer,
    Solver,
    SolverReviewer,
    SummaryReviewer,
}

impl AgentRole {
    /// Whether `call` is in this role's allowed tool set.
    pub fn allows(&self, call: &ToolCall) -> bool {
        use ToolCall::*;
        match self {
            AgentRole::Scheduler => matches!(call, Think { .. } | ProvideSelection { .. }),
            AgentRole::Summarizer => matches!(
                call,
                Think { .. }
                    | RequestCode { .. }
                    | SelectTargetBranch { .. }
                    | GeneratePathConstraint { .. }
                    | Finish { .. }
                    | DetectFuncFinish { .. }
            ),
            AgentRole::Solver => matches!(
                call,
                Think { .. } | SolveWithSmt { .. } | ExecutePython { .. } | ProvideSolution { .. }
            ),
            AgentRole::SolverReviewer => matches!(call, Think { .. } | ReviewSolveAnswer { .. }),
            AgentRole::SummaryReviewer => matches!(call, Think { .. } | ReviewSummaryAnswer { .. }),
        }
    }
}

/// JSON-schema tool definitions offered to the model for a given role,
/// in the shape an OpenAI/Anthropic-style function-calling request
/// expects.
pub fn tool_schemas_for(role: AgentRole) -> Vec<Value> {
    let mut defs = vec![think_schema()];
    match role {
        AgentRole::Scheduler => defs.push(provide_selection_schema()),
        AgentRole::Summarizer => {
            defs.push(request_code_schema());
            defs.push(select_target_branch_schema());
            defs.push(generate_path_constraint_schema());
            defs.push(finish_schema());
            defs.push(detect_func_finish_schema());
        }
        AgentRole::Solver => {
            defs.push(solve_with_smt_schema());
            defs.push(execute_python_schema());
            defs.push(provide_solution_schema());
        }
        AgentRole::SolverReviewer => defs.push(review_solve_answer_schema()),
        AgentRole::SummaryReviewer => defs.push(review_summary_answer_schema()),
    }
    defs
}

fn think_schema() -> Value {
    json!({
        "name": "think",
        "description": "Record scratchpad reasoning without taking any action.",
        "parameters": {
            "type": "object",
            "properties": { "reasoning": { "type": "string" } },
            "required": ["reasoning"]
        }
    })
}

fn request_code_schema() -> Value {
    json!({
        "name": "request_code",
        "description": format!(
            "Request annotated source slices for (file, line-range) pairs. Capped at {} calls per session.",
            crate::codeview::MAX_CODE_REQUEST_ATTEMPTS
        ),
        "parameters": {
            "type": "object",
            "properties": {
                "file_requests": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "file": { "type": "string" },
                            "start": { "type": "integer" },
                            "end": { "type": "integer" }
                        },
                        "required": ["file", "start", "end"]
                    }
                }
            },
            "required": ["file_requests"]
        }
    })
}

fn select_target_branch_schema() -> Value {
    json!({
        "name": "select_target_branch",
        "description": "Record the next branch to attempt reaching.",
        "parameters": {
            "type": "object",
            "properties": {
                "target_branch": { "type": "string", "description": "file:start-end" },
                "justification": { "type": "string" },
                "expected_covered_lines": { "type": "array", "items": { "type": "integer" } }
            },
            "required": ["target_branch", "justification"]
        }
    })
}

fn generate_path_constraint_schema() -> Value {
    json!({
        "name": "generate_path_constraint",
        "description": "Record the path constraint for the currently selected branch.",
        "parameters": {
            "type": "object",
            "properties": { "path_constraint": { "type": "string" } },
            "required": ["path_constraint"]
        }
    })
}

fn solve_with_smt_schema() -> Value {
    json!({
        "name": "solve_with_smt",
        "description": "Check satisfiability of a constraint with Z3 under a 10s timeout.",
        "parameters": {
            "type": "object",
            "properties": { "smt_constraints": { "type": "string" } },
            "required": ["smt_constraints"]
        }
    })
}

fn execute_python_schema() -> Value {
    json!({
        "name": "execute_python",
        "description": "Run an auxiliary script in an isolated subprocess with a 10s timeout.",
        "parameters": {
            "type": "object",
            "properties": { "python_code": { "type": "string" } },
            "required": ["python_code"]
        }
    })
}

fn provide_solution_schema() -> Value {
    json!({
        "name": "provide_solution",
        "description": "Record the final satisfiability verdict and, if satisfiable, the candidate input generator.",
        "parameters": {
            "type": "object",
            "properties": {
                "is_satisfiable": { "type": "boolean" },
                "python_execution": {
                    "type": "string",
                    "description": "Must contain `def execute_program` and survive a 2s smoke run."
                }
            },
            "required": ["is_satisfiable"]
        }
    })
}

fn review_solve_answer_schema() -> Value {
    json!({
        "name": "review_solve_answer",
        "description": "Review a solver's answer; optionally correct the exec_code.",
        "parameters": {
            "type": "object",
            "properties": {
                "need_adjust": { "type": "boolean" },
                "corrected_exec_code": { "type": "string" }
            },
            "required": ["need_adjust"]
        }
    })
}

fn review_summary_answer_schema() -> Value {
    json!({
        "name": "review_summary_answer",
        "description": "Review a summarizer's branch/constraint; optionally correct either.",
        "parameters": {
            "type": "object",
            "properties": {
                "need_adjust": { "type": "boolean" },
                "corrected_target_branch": { "type": "string" },
                "corrected_path_constraint": { "type": "string" }
            },
            "required": ["need_adjust"]
        }
    })
}

fn provide_selection_schema() -> Value {
    json!({
        "name": "provide_selection",
        "description": "Select a test case id from the scheduling view to work on next.",
        "parameters": {
            "type": "object",
            "properties": {
                "test_case_id": { "type": "integer" },
                "justification": { "type": "string" }
            },
            "required": ["test_case_id", "justification"]
        }
    })
}

fn detect_func_finish_schema() -> Value {
    json!({
        "name": "detect_func_finish",
        "description": "Declare, without having selected any branch, that no branch on this parent is worth targeting.",
        "parameters": {
            "type": "object",
            "properties": { "reasoning": { "type": "string" } },
            "required": ["reasoning"]
        }
    })
}

fn finish_schema() -> Value {
    json!({
        "name": "finish",
        "description": "End the summarizer session after at least one branch has been selected.",
        "parameters": {
            "type": "object",
            "properties": { "reasoning": { "type": "string" } },
            "required": ["reasoning"]
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduler_role_rejects_non_scheduler_tools() {
        let call = ToolCall::ExecutePython { python_code: String::new() };
        assert!(!AgentRole::Scheduler.allows(&call));
    }

    #[test]
    fn summarizer_allows_finish_and_detect_func_finish() {
        assert!(AgentRole::Summarizer.allows(&ToolCall::Finish { reasoning: String::new() }));
        assert!(AgentRole::Summarizer.allows(&ToolCall::DetectFuncFinish { reasoning: String::new() }));
    }

    #[test]
    fn batch_reports_first_terminal_index() {
        let batch = BatchTool {
            calls: vec![
                ToolCall::Think { reasoning: "x".to_string() },
                ToolCall::Finish { reasoning: "y".to_string() },
                ToolCall::Finish { reasoning: "z".to_string() },
            ],
        };
        assert_eq!(batch.first_terminal_index(), Some(1));
    }

    #[test]
    fn provide_selection_is_terminal() {
        let call = ToolCall::ProvideSelection { test_case_id: 1, justification: "x".to_string() };
        assert!(call.is_terminal());
    }
}
