//! Shared regex patterns for trace marker parsing (SPEC_FULL.md §6).

use std::sync::OnceLock;

use regex::Regex;

/// `(enter|exit) <identifier> <non-negative integer>`, matched anywhere in
/// a printed line. Collectors must tolerate multiple markers per line, and
/// markers embedded in arbitrary comment/print syntax.
pub fn trace_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(enter|exit)\s+([^\s]+)\s+(\d+)").unwrap())
}

/// File-qualified variant: `[<non-space-path>] (enter|exit) <identifier> <id>`.
pub fn file_trace_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[([^\s\]]+)\]\s+(enter|exit)\s+([^\s]+)\s+(\d+)").unwrap())
}

const COPYRIGHT_KEYWORDS: &[&str] = &[
    "copyright",
    "license",
    "redistribution",
    "permission",
    "author",
    "rights reserved",
    "licensed",
];

pub fn looks_like_copyright_line(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    COPYRIGHT_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    Enter,
    Exit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    pub kind: MarkerKind,
    pub function: String,
    pub block_id: u64,
}

/// Returns the *first* marker on a line, if any. Block parsing only ever
/// needs the first marker of a line (instrumentation lines carry exactly
/// one), while trace ingestion scans every marker via [`all_markers`].
pub fn first_marker(line: &str) -> Option<Marker> {
    let caps = trace_pattern().captures(line)?;
    parse_marker_captures(&caps)
}

/// Every marker on a line (a trace-runtime output line may interleave
/// multiple `[file] enter/exit` events).
pub fn all_markers(line: &str) -> Vec<Marker> {
    trace_pattern()
        .captures_iter(line)
        .filter_map(|caps| parse_marker_captures(&caps))
        .collect()
}

fn parse_marker_captures(caps: &regex::Captures) -> Option<Marker> {
    let kind = match &caps[1] {
        "enter" => MarkerKind::Enter,
        "exit" => MarkerKind::Exit,
        _ => return None,
    };
    let function = caps[2].to_string();
    let block_id = caps[3].parse().ok()?;
    Some(Marker {
        kind,
        function,
        block_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_enter_and_exit() {
        assert!(first_marker("// enter main 1").is_some());
        assert!(first_marker("print('exit foo 42')").is_some());
        assert!(first_marker("nothing here").is_none());
    }

    #[test]
    fn file_qualified_pattern_extracts_path() {
        let caps = file_trace_pattern().captures("[f.c] enter a 1").unwrap();
        assert_eq!(&caps[1], "f.c");
        assert_eq!(&caps[2], "enter");
        assert_eq!(&caps[3], "a");
        assert_eq!(&caps[4], "1");
    }

    #[test]
    fn detects_copyright_keywords() {
        assert!(looks_like_copyright_line("// Copyright 2024 Example Corp"));
        assert!(looks_like_copyright_line("# Licensed under the MIT license"));
        assert!(!looks_like_copyright_line("// just a regular comment"));
    }
}
