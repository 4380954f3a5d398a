//! Summarizer agent (SPEC_FULL.md §4.5 step 3): picks target branches on a
//! selected parent and records path constraints for each.

use std::sync::Arc;

use concolic_core::{TargetFileLines, TestCase, UsageMap};
use concolic_tools::{render_code_view, AgentRole, CodeRequestBudget, ToolCall};
use concolic_trace::CoverageRegistry;
use tokio::sync::Mutex;

use crate::dispatch::run_dispatch_loop;
use crate::llm_client::LlmClient;
use crate::message::Message;

const SYSTEM_PROMPT: &str = "You are the summarizer for a concolic execution engine, working on one \
parent test case. Use `request_code` to inspect unexecuted branches, `select_target_branch` to commit \
to one, and `generate_path_constraint` to record the path constraint reaching it. Call `finish` once \
you're done selecting branches, or `detect_func_finish` if none are worth targeting.";

#[derive(Debug, thiserror::Error)]
pub enum SummarizerError {
    #[error("malformed target_branch encoding: {0}")]
    MalformedBranch(String),
    #[error("generate_path_constraint called before a successful select_target_branch")]
    NoBranchSelected,
    #[error("llm error: {0}")]
    Llm(String),
}

/// One branch the summarizer committed to, in the order it called
/// `select_target_branch` — callers allocate child test-case ids and start
/// solve+execute tasks in this same order (SPEC_FULL.md §4.5's
/// open-question resolution).
#[derive(Debug, Clone)]
pub struct BranchSelection {
    pub target_branch: TargetFileLines,
    pub justification: String,
    pub path_constraint: Option<String>,
}

pub struct SummarizerOutcome {
    pub branches: Vec<BranchSelection>,
    pub finished_without_selection: bool,
}

pub async fn run_summarizer(
    parent: &TestCase,
    registry: &Arc<CoverageRegistry>,
    client: &LlmClient,
    usage: &mut UsageMap,
    max_code_request_attempts: u32,
) -> Result<SummarizerOutcome, SummarizerError> {
    let budget = Mutex::new(CodeRequestBudget::new(max_code_request_attempts));
    let branches: Mutex<Vec<BranchSelection>> = Mutex::new(Vec::new());
    let pending_branch_index: Mutex<Option<usize>> = Mutex::new(None);

    let initial = Message::user(format!(
        "Parent test case {}:\n```\n{}\n```\nTrace:\n```\n{}\n```",
        parent.id,
        parent.exec_code.as_deref().unwrap_or(""),
        parent.execution_trace.as_deref().unwrap_or(""),
    ));

    run_dispatch_loop(
        AgentRole::Summarizer,
        client,
        SYSTEM_PROMPT,
        initial,
        0.7,
        usage,
        |call| {
            let registry = registry.clone();
            let budget = &budget;
            let branches = &branches;
            let pending_branch_index = &pending_branch_index;
            async move {
                match call {
                    ToolCall::Think { .. } => Ok((None, "Noted.".to_string())),

                    ToolCall::RequestCode { file_requests } => {
                        let mut parts = Vec::new();
                        for req in file_requests {
                            if budget.lock().await.consume().is_err() {
                                parts.push(
                                    "Error: code request cap exceeded; proceed without further requests."
                                        .to_string(),
                                );
                                break;
                            }
                            parts.push(render_request(&registry, &req.file, req.start, req.end).await);
                        }
                        Ok((None, parts.join("\n\n")))
                    }

                    ToolCall::SelectTargetBranch { target_branch, justification, .. } => {
                        let parsed = TargetFileLines::decode(&target_branch)
                            .ok_or_else(|| SummarizerError::MalformedBranch(target_branch.clone()))?;
                        let mut branches = branches.lock().await;
                        branches.push(BranchSelection {
                            target_branch: parsed,
                            justification,
                            path_constraint: None,
                        });
                        *pending_branch_index.lock().await = Some(branches.len() - 1);
                        Ok((None, format!("Recorded branch selection: {target_branch}")))
                    }

                    ToolCall::GeneratePathConstraint { path_constraint } => {
                        let idx = pending_branch_index
                            .lock()
                            .await
                            .ok_or(SummarizerError::NoBranchSelected)?;
                        branches.lock().await[idx].path_constraint = Some(path_constraint);
                        Ok((None, "Path constraint recorded.".to_string()))
                    }

                    ToolCall::DetectFuncFinish { .. } => Ok((
                        Some(SummarizerOutcome {
                            branches: std::mem::take(&mut *branches.lock().await),
                            finished_without_selection: true,
                        }),
                        "No further branch targeted on this parent.".to_string(),
                    )),

                    ToolCall::Finish { .. } => Ok((
                        Some(SummarizerOutcome {
                            branches: std::mem::take(&mut *branches.lock().await),
                            finished_without_selection: false,
                        }),
                        "Summarizer session finished.".to_string(),
                    )),

                    _ => Ok((None, "Error: tool not permitted for the summarizer.".to_string())),
                }
            }
        },
    )
    .await
    .map_err(|e| match e {
        crate::dispatch::DispatchError::Handler(inner) => inner,
        crate::dispatch::DispatchError::Llm(msg) => SummarizerError::Llm(msg),
    })
}

async fn render_request(registry: &Arc<CoverageRegistry>, file: &str, start: u32, end: u32) -> String {
    if !registry.has(file).await {
        return format!("Error: `{file}` is not a known instrumented file.");
    }
    registry
        .with_collector(file, |collector| {
            render_code_view(collector, start, end)
                .unwrap_or_else(|e| format!("Error: {e}"))
        })
        .await
        .unwrap_or_else(|| format!("Error: `{file}` is not a known instrumented file."))
}
