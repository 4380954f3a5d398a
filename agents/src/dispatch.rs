//! Generic agent dispatch loop (SPEC_FULL.md §4.3): send → tool calls or
//! nudge → evaluate handlers → accumulate observations → loop until a
//! terminal tool is accepted.

use concolic_core::{Usage, UsageMap};
use concolic_tools::{AgentRole, BatchTool, ToolCall};
use serde_json::Value;
use tracing::warn;

use crate::llm_client::LlmClient;
use crate::message::Message;

const NUDGE_TEXT: &str = "No tool call was made. You must call one of the available tools to proceed.";

/// One resolved tool call plus the observation text produced by the
/// caller's handler for it.
pub struct Observation {
    pub call: ToolCall,
    pub text: String,
}

/// Runs the dispatch loop until `handle` returns `Some(_)` for a terminal
/// tool call (its final value, plus any non-terminal observations already
/// accumulated in that same turn are discarded per the spec's
/// first-terminal-wins rule).
///
/// `handle` is given each call in order (by value — calls are cheap to
/// clone out of the batch) and returns `Ok(Some(result))` to end the
/// session on that call, `Ok(None)` with an observation to continue, or
/// `Err` to abort. It is async so handlers can await the coverage
/// registry, subprocess execution, or the SMT solver directly.
pub async fn run_dispatch_loop<T, E, Fut>(
    role: AgentRole,
    client: &LlmClient,
    system_prompt: &str,
    initial_user_message: Message,
    temperature: f32,
    usage: &mut UsageMap,
    mut handle: impl FnMut(ToolCall) -> Fut,
) -> Result<T, DispatchError<E>>
where
    Fut: std::future::Future<Output = Result<(Option<T>, String), E>>,
{
    let schemas = concolic_tools::tool_schemas_for(role);
    let mut messages = vec![Message::system(system_prompt.to_string()), initial_user_message];
    let mut previous_labels: Vec<String> = vec!["INITIAL".to_string()];

    loop {
        let response = client
            .complete(&messages, &schemas, temperature)
            .await
            .map_err(|e| DispatchError::Llm(e.to_string()))?;

        if response.tool_calls.is_empty() {
            usage.record(
                &previous_labels.iter().map(String::as_str).collect::<Vec<_>>(),
                Usage::input_only(response.usage.input_tokens),
            );
            usage.record(&["non_tool"], Usage::output_only(
                response.usage.output_tokens,
                response.usage.cost_usd,
                response.usage.latency_ms,
            ));
            messages.push(Message::assistant(response.content));
            messages.push(Message::user(NUDGE_TEXT));
            previous_labels = vec!["non_tool".to_string()];
            continue;
        }

        let mut calls = Vec::new();
        for raw in &response.tool_calls {
            match decode_tool_call(raw) {
                Ok(call) => calls.push(call),
                Err(e) => {
                    warn!(error = %e, "failed to decode tool call");
                }
            }
        }
        let batch = BatchTool { calls };
        let labels: Vec<String> = batch.calls.iter().map(|c| c.label().to_string()).collect();

        usage.record(
            &previous_labels.iter().map(String::as_str).collect::<Vec<_>>(),
            Usage::input_only(response.usage.input_tokens),
        );
        usage.record(
            &labels.iter().map(String::as_str).collect::<Vec<_>>(),
            Usage::output_only(response.usage.output_tokens, response.usage.cost_usd, response.usage.latency_ms),
        );

        let terminal_index = batch.first_terminal_index();
        let mut observations = Vec::new();
        let mut terminal_result: Option<T> = None;

        for (i, call) in batch.calls.iter().cloned().enumerate() {
            if !role.allows(&call) {
                observations.push(format!("Error: tool `{}` is not available to this agent.", call.label()));
                continue;
            }
            match handle(call).await {
                Ok((Some(result), text)) => {
                    if Some(i) == terminal_index {
                        terminal_result = Some(result);
                        observations.push(text);
                    } else {
                        observations.push(format!(
                            "{text}\n(note: a later terminal call in this batch already closed the session; this termination was discarded)"
                        ));
                    }
                }
                Ok((None, text)) => observations.push(text),
                Err(e) => return Err(DispatchError::Handler(e)),
            }
        }

        if let Some(result) = terminal_result {
            return Ok(result);
        }

        messages.push(Message::assistant(response.content));
        for (call, text) in batch.calls.iter().zip(observations.iter()) {
            messages.push(Message::tool_result(call.label(), text.clone()));
        }
        previous_labels = labels;
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError<E> {
    #[error("llm error: {0}")]
    Llm(String),
    #[error("handler error")]
    Handler(E),
}

/// Decodes an OpenAI-style `{"function": {"name", "arguments"}}` tool-call
/// entry into a [`ToolCall`]. `arguments` arrives as a JSON-encoded string
/// per that wire format; we re-parse it before matching against the
/// `name`-tagged enum.
fn decode_tool_call(raw: &Value) -> Result<ToolCall, String> {
    let function = &raw["function"];
    let name = function["name"].as_str().ok_or("missing function.name")?;
    let arguments_str = function["arguments"].as_str().unwrap_or("{}");
    let arguments: Value = serde_json::from_str(arguments_str)
        .map_err(|e| format!("malformed arguments json: {e}"))?;
    let tagged = serde_json::json!({ "name": name, "arguments": arguments });
    serde_json::from_value(tagged).map_err(|e| format!("unrecognized tool call `{name}`: {e}"))
}
