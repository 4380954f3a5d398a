//! Reviewer agents (SPEC_FULL.md §4.5 step 6): invoked only when a child's
//! execution didn't succeed outright. Each gets a single correction
//! chance and then finalizes the case.

use concolic_core::UsageMap;
use concolic_tools::{AgentRole, ToolCall};

use crate::dispatch::run_dispatch_loop;
use crate::llm_client::LlmClient;
use crate::message::Message;

const SOLVER_REVIEWER_PROMPT: &str = "You are reviewing a solver's answer that ran but did not reach \
its target branch or yield new coverage. Decide whether the exec_code needs adjustment, or whether \
the constraint itself is wrong (in which case the summary needs to be revisited instead). Call \
`review_solve_answer`.";

const SUMMARY_REVIEWER_PROMPT: &str = "You are reviewing a summarizer's branch selection and path \
constraint after the solver reported the constraint itself is wrong. Decide whether to correct the \
target branch and/or path constraint. Call `review_summary_answer`.";

#[derive(Debug, thiserror::Error)]
pub enum ReviewError {
    #[error("need_adjust is true but no corrected artifact was supplied")]
    MissingCorrection,
    #[error("need_adjust is false but a correction was supplied anyway")]
    SpuriousCorrection,
    #[error("llm error: {0}")]
    Llm(String),
}

pub struct SolverReviewOutcome {
    pub need_adjust: bool,
    pub corrected_exec_code: Option<String>,
}

pub struct SummaryReviewOutcome {
    pub need_adjust: bool,
    pub corrected_target_branch: Option<String>,
    pub corrected_path_constraint: Option<String>,
}

pub async fn run_solver_reviewer(
    exec_code: &str,
    execution_summary: &str,
    client: &LlmClient,
    usage: &mut UsageMap,
) -> Result<SolverReviewOutcome, ReviewError> {
    let initial = Message::user(format!(
        "Candidate exec_code:\n```\n{exec_code}\n```\nExecution summary:\n```\n{execution_summary}\n```"
    ));

    run_dispatch_loop(
        AgentRole::SolverReviewer,
        client,
        SOLVER_REVIEWER_PROMPT,
        initial,
        0.2,
        usage,
        |call| async move {
            match call {
                ToolCall::Think { .. } => Ok((None, "Noted.".to_string())),
                ToolCall::ReviewSolveAnswer { need_adjust, corrected_exec_code } => {
                    validate_correction(need_adjust, corrected_exec_code.is_some())?;
                    Ok((
                        Some(SolverReviewOutcome { need_adjust, corrected_exec_code }),
                        "Review recorded.".to_string(),
                    ))
                }
                _ => Ok((None, "Error: tool not permitted for the solver reviewer.".to_string())),
            }
        },
    )
    .await
    .map_err(|e| match e {
        crate::dispatch::DispatchError::Handler(inner) => inner,
        crate::dispatch::DispatchError::Llm(msg) => ReviewError::Llm(msg),
    })
}

pub async fn run_summary_reviewer(
    target_branch: &str,
    path_constraint: &str,
    client: &LlmClient,
    usage: &mut UsageMap,
) -> Result<SummaryReviewOutcome, ReviewError> {
    let initial = Message::user(format!(
        "Target branch: {target_branch}\nPath constraint:\n```\n{path_constraint}\n```"
    ));

    run_dispatch_loop(
        AgentRole::SummaryReviewer,
        client,
        SUMMARY_REVIEWER_PROMPT,
        initial,
        0.2,
        usage,
        |call| async move {
            match call {
                ToolCall::Think { .. } => Ok((None, "Noted.".to_string())),
                ToolCall::ReviewSummaryAnswer {
                    need_adjust,
                    corrected_target_branch,
                    corrected_path_constraint,
                } => {
                    let has_correction =
                        corrected_target_branch.is_some() || corrected_path_constraint.is_some();
                    validate_correction(need_adjust, has_correction)?;
                    Ok((
                        Some(SummaryReviewOutcome {
                            need_adjust,
                            corrected_target_branch,
                            corrected_path_constraint,
                        }),
                        "Review recorded.".to_string(),
                    ))
                }
                _ => Ok((None, "Error: tool not permitted for the summary reviewer.".to_string())),
            }
        },
    )
    .await
    .map_err(|e| match e {
        crate::dispatch::DispatchError::Handler(inner) => inner,
        crate::dispatch::DispatchError::Llm(msg) => ReviewError::Llm(msg),
    })
}

fn validate_correction(need_adjust: bool, has_correction: bool) -> Result<(), ReviewError> {
    match (need_adjust, has_correction) {
        (true, false) => Err(ReviewError::MissingCorrection),
        (false, true) => Err(ReviewError::SpuriousCorrection),
        _ => Ok(()),
    }
}
