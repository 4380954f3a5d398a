//! Standalone trace helpers that don't need a [`crate::collector::TraceCollector`]:
//! function-call-chain compression (SPEC_FULL.md §8 scenario 5) and raw
//! block-set extraction.

use std::collections::HashSet;

use crate::common::{all_markers, file_trace_pattern, MarkerKind};

/// One run of consecutive `enter` events for the same `(file, function)`,
/// with their block ids collected in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedCall {
    pub file: String,
    pub function: String,
    pub block_ids: Vec<u64>,
}

/// Compresses a file-qualified trace into a run-length-grouped call chain.
/// Only `enter` events participate; consecutive identical `(file, function)`
/// entries merge their ids into one entry.
pub fn trace_compress(trace: &str) -> Vec<CompressedCall> {
    let mut out: Vec<CompressedCall> = Vec::new();
    for line in trace.lines() {
        for caps in file_trace_pattern().captures_iter(line) {
            if &caps[2] != "enter" {
                continue;
            }
            let file = caps[1].to_string();
            let function = caps[3].to_string();
            let Ok(id) = caps[4].parse::<u64>() else {
                continue;
            };
            match out.last_mut() {
                Some(last) if last.file == file && last.function == function => {
                    last.block_ids.push(id);
                }
                _ => out.push(CompressedCall {
                    file,
                    function,
                    block_ids: vec![id],
                }),
            }
        }
    }
    out
}

/// Caps a rendered call chain at 20 entries: first, last, and the 18
/// lowest-coverage middle entries (by ascending `coverage_of`), with
/// elision markers, per SPEC_FULL.md §4.5/§2.
pub fn render_call_chain_capped<F>(chain: &[CompressedCall], coverage_of: F) -> String
where
    F: Fn(&CompressedCall) -> f64,
{
    const MAX_FUNCTIONS: usize = 20;
    const MIDDLE_CAP: usize = 18;

    if chain.len() <= MAX_FUNCTIONS {
        return chain
            .iter()
            .map(render_one)
            .collect::<Vec<_>>()
            .join(" -> ");
    }

    let first = &chain[0];
    let last = &chain[chain.len() - 1];
    let mut middle: Vec<&CompressedCall> = chain[1..chain.len() - 1].iter().collect();
    middle.sort_by(|a, b| {
        coverage_of(a)
            .partial_cmp(&coverage_of(b))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    middle.truncate(MIDDLE_CAP);

    let elided = chain.len() - 2 - middle.len();
    let mut parts = vec![render_one(first)];
    if elided > 0 {
        parts.push(format!("... ({elided} elided) ..."));
    }
    parts.extend(middle.iter().map(|c| render_one(c)));
    parts.push(render_one(last));
    parts.join(" -> ")
}

fn render_one(call: &CompressedCall) -> String {
    format!(
        "{}:{}{:?}",
        call.file, call.function, call.block_ids
    )
}

/// The raw set of `(function, block_id)` pairs named anywhere in `trace`
/// (both `enter` and `exit` markers, non-file-qualified pattern).
pub fn get_executed_blocks(trace: &str) -> HashSet<(String, u64)> {
    let mut out = HashSet::new();
    for line in trace.lines() {
        for marker in all_markers(line) {
            if matches!(marker.kind, MarkerKind::Enter | MarkerKind::Exit) {
                out.insert((marker.function, marker.block_id));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_5_trace_compression() {
        let trace = "\
[f.c] enter a 1
[f.c] exit a 1
[f.c] enter a 2
[f.c] enter b 1
[f.c] exit b 1";
        let compressed = trace_compress(trace);
        assert_eq!(
            compressed,
            vec![
                CompressedCall {
                    file: "f.c".into(),
                    function: "a".into(),
                    block_ids: vec![1, 2],
                },
                CompressedCall {
                    file: "f.c".into(),
                    function: "b".into(),
                    block_ids: vec![1],
                },
            ]
        );
    }

    #[test]
    fn executed_blocks_include_both_enter_and_exit_names() {
        let blocks = get_executed_blocks("enter main 1\nexit main 1\nenter helper 7\nexit helper 7");
        assert!(blocks.contains(&("main".to_string(), 1)));
        assert!(blocks.contains(&("helper".to_string(), 7)));
    }

    #[test]
    fn call_chain_under_cap_is_not_truncated() {
        let chain = vec![CompressedCall {
            file: "f.c".into(),
            function: "a".into(),
            block_ids: vec![1],
        }];
        let rendered = render_call_chain_capped(&chain, |_| 1.0);
        assert!(!rendered.contains("elided"));
    }
}
