//! Solver agent (SPEC_FULL.md §4.5 step 4): given a path constraint, finds
//! a satisfying input and the Python generator that produces it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use concolic_core::UsageMap;
use concolic_tools::{solve_with_smt, AgentRole, SolveOutcome, ToolCall};

use crate::dispatch::run_dispatch_loop;
use crate::llm_client::LlmClient;
use crate::message::Message;

const SMOKE_TEST_TIMEOUT: Duration = Duration::from_secs(2);

const SYSTEM_PROMPT: &str = "You are the solver for a concolic execution engine. Given a path \
constraint, determine satisfiability with `solve_with_smt`, optionally sanity-check your reasoning \
with `execute_python`, and call `provide_solution` with the final verdict and, if satisfiable, a \
Python generator defining `def execute_program(timeout)`.";

#[derive(Debug, thiserror::Error)]
pub enum SolverError {
    #[error("smoke-test run failed: {0}")]
    SmokeTestFailed(String),
    #[error("llm error: {0}")]
    Llm(String),
}

pub struct SolverOutcome {
    pub is_satisfiable: bool,
    pub exec_code: Option<String>,
}

pub async fn run_solver(
    path_constraint: &str,
    project_dir: &Path,
    client: &LlmClient,
    usage: &mut UsageMap,
) -> Result<SolverOutcome, SolverError> {
    let project_dir = project_dir.to_path_buf();
    let initial = Message::user(format!("Path constraint:\n```\n{path_constraint}\n```"));

    run_dispatch_loop(
        AgentRole::Solver,
        client,
        SYSTEM_PROMPT,
        initial,
        0.7,
        usage,
        |call| {
            let project_dir = project_dir.clone();
            async move { handle_solver_call(call, &project_dir).await }
        },
    )
    .await
    .map_err(|e| match e {
        crate::dispatch::DispatchError::Handler(inner) => inner,
        crate::dispatch::DispatchError::Llm(msg) => SolverError::Llm(msg),
    })
}

async fn handle_solver_call(
    call: ToolCall,
    project_dir: &PathBuf,
) -> Result<(Option<SolverOutcome>, String), SolverError> {
    match call {
        ToolCall::Think { .. } => Ok((None, "Noted.".to_string())),

        ToolCall::SolveWithSmt { smt_constraints } => {
            let observation = match solve_with_smt(&smt_constraints) {
                Ok(SolveOutcome::Satisfiable(assignment)) => assignment,
                Ok(SolveOutcome::Unsatisfiable) => "Constraints unsatisfiable.".to_string(),
                Err(e) => format!("{e}"),
            };
            Ok((None, observation))
        }

        ToolCall::ExecutePython { python_code } => {
            let observation = match concolic_tools::execute_python(&python_code, project_dir).await {
                Ok(outcome) => format!(
                    "stdout:\n{}\nstderr:\n{}\nreturn_code: {:?}\ntimed_out: {}",
                    outcome.stdout, outcome.stderr, outcome.return_code, outcome.timed_out
                ),
                Err(e) => format!("Error: {e}"),
            };
            Ok((None, observation))
        }

        ToolCall::ProvideSolution { is_satisfiable, python_execution } => {
            if !is_satisfiable {
                return Ok((
                    Some(SolverOutcome { is_satisfiable: false, exec_code: None }),
                    "Recorded unsatisfiable verdict.".to_string(),
                ));
            }

            let Some(code) = python_execution else {
                return Ok((
                    None,
                    "Error: is_satisfiable is true but no python_execution was supplied.".to_string(),
                ));
            };
            if !code.contains("def execute_program") {
                return Ok((
                    None,
                    "Error: python_execution must define `def execute_program(timeout)`.".to_string(),
                ));
            }
            if let Err(e) = smoke_test(&code, project_dir).await {
                return Ok((None, format!("Error: smoke test failed: {e}. Try again.")));
            }

            Ok((
                Some(SolverOutcome { is_satisfiable: true, exec_code: Some(code) }),
                "Recorded satisfiable solution; smoke test passed.".to_string(),
            ))
        }

        _ => Ok((None, "Error: tool not permitted for the solver.".to_string())),
    }
}

/// Runs `def execute_program` once under a 2-second budget, to catch a
/// candidate that throws immediately, before it's ever fed to the real
/// target-program execution step.
async fn smoke_test(code: &str, project_dir: &Path) -> Result<(), SolverError> {
    let harness = format!("{code}\n\nexecute_program(1)\n");
    let result = tokio::time::timeout(
        SMOKE_TEST_TIMEOUT,
        concolic_tools::execute_python(&harness, project_dir),
    )
    .await;

    match result {
        Err(_) => Err(SolverError::SmokeTestFailed("smoke run exceeded 2s".to_string())),
        Ok(Err(e)) => Err(SolverError::SmokeTestFailed(e.to_string())),
        Ok(Ok(outcome)) if outcome.timed_out => {
            Err(SolverError::SmokeTestFailed("smoke run timed out".to_string()))
        }
        Ok(Ok(outcome)) if outcome.return_code != Some(0) => Err(SolverError::SmokeTestFailed(
            format!("exited {:?}: {}", outcome.return_code, outcome.stderr),
        )),
        Ok(Ok(_)) => Ok(()),
    }
}
