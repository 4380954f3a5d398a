//! Scheduler agent (SPEC_FULL.md §4.5 step 2): picks which valuable test
//! case to work on next, restricted to `think` and `provide_selection`.

use concolic_core::{CorpusManager, SchedulingInfo, UsageMap};
use concolic_tools::{AgentRole, ToolCall};

use crate::dispatch::run_dispatch_loop;
use crate::llm_client::LlmClient;
use crate::message::{Message, ThreadCache};

const SYSTEM_PROMPT: &str = "You are the scheduler for a concolic execution engine. \
Pick the single most promising test case from the scheduling view to branch from next. \
Call `think` to reason, then `provide_selection` with your choice.";

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("selected id {0} is not in the current scheduling view")]
    UnknownSelection(u64),
    #[error("llm error: {0}")]
    Llm(String),
}

pub struct SchedulerOutcome {
    pub selected_id: u64,
    pub justification: String,
}

/// Renders the scheduling view and runs the scheduler's dispatch loop to a
/// `provide_selection` decision. Reuses `cache` when the current view's id
/// set is a subset of what it has already seen.
pub async fn run_scheduler(
    corpus: &CorpusManager,
    client: &LlmClient,
    cache: &mut ThreadCache,
    usage: &mut UsageMap,
    token_budget: u64,
    chars_per_token: f64,
) -> Result<SchedulerOutcome, SchedulerError> {
    let view = corpus.scheduling_view(token_budget, chars_per_token).await;
    let ids: std::collections::BTreeSet<u64> = view.iter().map(|r| r.id).collect();

    let prompt = if cache.reusable_for(&ids) {
        None
    } else {
        let rendered = render_view(&view);
        cache.replace(ids.clone(), vec![Message::user(rendered.clone())]);
        Some(rendered)
    };

    let initial_message = prompt
        .map(Message::user)
        .unwrap_or_else(|| cache.messages().last().cloned().unwrap_or_else(|| Message::user("")));

    run_dispatch_loop(
        AgentRole::Scheduler,
        client,
        SYSTEM_PROMPT,
        initial_message,
        0.2,
        usage,
        |call| {
            let ids = &ids;
            async move {
                match call {
                    ToolCall::Think { .. } => Ok((None, "Noted.".to_string())),
                    ToolCall::ProvideSelection { test_case_id, justification } => {
                        if !ids.contains(&test_case_id) {
                            return Err(SchedulerError::UnknownSelection(test_case_id));
                        }
                        Ok((
                            Some(SchedulerOutcome {
                                selected_id: test_case_id,
                                justification,
                            }),
                            format!("Selected test case {test_case_id}."),
                        ))
                    }
                    _ => Ok((None, "Error: tool not permitted for the scheduler.".to_string())),
                }
            }
        },
    )
    .await
    .map_err(|e| match e {
        crate::dispatch::DispatchError::Handler(inner) => inner,
        crate::dispatch::DispatchError::Llm(msg) => SchedulerError::Llm(msg),
    })
}

fn render_view(view: &[SchedulingInfo]) -> String {
    let mut out = String::from("Scheduling view (valuable test cases):\n");
    for row in view {
        out.push_str(&row.rendered);
        out.push('\n');
    }
    out
}
