//! `request_code` tool (SPEC_FULL.md §4.3): annotated source slices with
//! per-line coverage marks, plus the per-testcase request-count cap.

use concolic_trace::TraceCollector;

use crate::error::{Result, ToolError};

pub const MAX_CODE_REQUEST_ATTEMPTS: u32 = 10;

/// Tracks how many `request_code` calls a single testcase's summarizer has
/// spent, independent of the tool-dispatch loop itself.
#[derive(Debug, Clone, Default)]
pub struct CodeRequestBudget {
    used: u32,
    max: u32,
}

impl CodeRequestBudget {
    pub fn new(max: u32) -> Self {
        Self { used: 0, max }
    }

    /// Consumes one attempt, returning the number remaining, or an error if
    /// the cap was already exhausted.
    pub fn consume(&mut self) -> Result<u32> {
        if self.used >= self.max {
            return Err(ToolError::CodeRequestCapExceeded {
                attempted: self.used + 1,
                max: self.max,
            });
        }
        self.used += 1;
        Ok(self.max - self.used)
    }

    pub fn remaining(&self) -> u32 {
        self.max.saturating_sub(self.used)
    }
}

/// Renders real lines `[start, end]` (1-indexed, inclusive) of `collector`'s
/// source, each prefixed with `+` (covered at least once) or `-`
/// (uncovered), alongside the file's total real-line count. Requests that
/// run past the file are clipped with a trailing note rather than erroring;
/// a request entirely outside the file's bounds is a protocol error.
pub fn render_code_view(collector: &TraceCollector, start: u32, end: u32) -> Result<String> {
    let total_lines = collector.line_count() as u32;
    if start == 0 || start > total_lines {
        return Err(ToolError::Protocol(format!(
            "requested range {start}-{end} is outside the file (file has {total_lines} lines)"
        )));
    }

    let mut clipped_note = None;
    let clipped_end = if end > total_lines {
        clipped_note = Some(format!(
            "requested end line {end} exceeds file length ({total_lines}); clipped"
        ));
        total_lines
    } else {
        end
    };

    let mut out = vec![format!(
        "{} ({} lines total)",
        collector.file_path, total_lines
    )];

    for line in start..=clipped_end {
        let Some(content) = collector.get_real_line_content(line) else {
            continue;
        };
        let mark = if collector.get_line_covered_times(line) > 0 { '+' } else { '-' };
        out.push(format!("{mark} {line:>6} | {content}"));
    }

    if let Some(note) = clipped_note {
        out.push(format!("// {note}"));
    }

    Ok(out.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "// enter main 1\nint x = 1;\nint y = 2;\n// exit main 1\n";

    #[test]
    fn budget_exhausts_after_max_attempts() {
        let mut budget = CodeRequestBudget::new(2);
        assert_eq!(budget.consume().unwrap(), 1);
        assert_eq!(budget.consume().unwrap(), 0);
        assert!(budget.consume().is_err());
    }

    #[test]
    fn renders_marked_lines_within_range() {
        let mut collector = TraceCollector::parse("f.c", SAMPLE);
        collector.collect_trace("enter main 1\nexit main 1");
        let rendered = render_code_view(&collector, 1, 2).unwrap();
        assert!(rendered.contains("f.c ("));
        assert!(rendered.contains("+"));
    }

    #[test]
    fn out_of_range_start_is_protocol_error() {
        let collector = TraceCollector::parse("f.c", SAMPLE);
        assert!(render_code_view(&collector, 999, 1000).is_err());
    }

    #[test]
    fn past_end_of_file_is_clipped_with_note() {
        let collector = TraceCollector::parse("f.c", SAMPLE);
        let rendered = render_code_view(&collector, 1, 999).unwrap();
        assert!(rendered.contains("clipped"));
    }
}
