//! Target-program and `execute_python` subprocess execution
//! (SPEC_FULL.md §4.5 step 5, §5, §6 "target-program contract").
//!
//! Grounded in the reference codebase's subprocess executor: spawn with
//! `Stdio::piped()` and `kill_on_drop(true)`, race against a
//! `tokio::time::timeout`, measure wall time with `Instant`.

use std::path::Path;
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use regex::Regex;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{Result, ToolError};

pub const SIGKILL: i32 = 9;

/// Outcome of running a child test case's `exec_code` against the target
/// program, per the `execute_program(timeout) -> (stderr, return_code)`
/// contract.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub stderr: String,
    pub return_code: i32,
    pub is_crash: bool,
    pub is_hang: bool,
    pub duration_ms: u64,
}

#[derive(Debug, Deserialize)]
struct HarnessOutput {
    stderr: String,
    return_code: i32,
}

/// Runs `exec_code` (a self-contained Python input generator defining
/// `execute_program(timeout)`) against the target program.
///
/// The inner `timeout` the generator receives governs target-program
/// cancellation per the spec; the outer `tokio::time::timeout` here is a
/// defensive guard in case the generator itself fails to respect its
/// contract, not the primary hang-detection mechanism.
pub async fn execute_target_program(
    exec_code: &str,
    timeout_secs: u64,
    project_dir: &Path,
) -> Result<ExecutionOutcome> {
    let harness = format!(
        "{exec_code}\n\nif __name__ == \"__main__\":\n    import json\n    _stderr, _rc = execute_program({timeout_secs})\n    print(json.dumps({{\"stderr\": _stderr, \"return_code\": _rc}}))\n"
    );

    let tmp = tempfile::Builder::new()
        .prefix("concolic-target-")
        .suffix(".py")
        .tempfile()
        .map_err(ToolError::Spawn)?;
    tokio::fs::write(tmp.path(), harness).await?;

    let started = Instant::now();
    let mut child = Command::new("python3")
        .arg(tmp.path())
        .current_dir(project_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(ToolError::Spawn)?;

    let outer_budget = Duration::from_secs(timeout_secs + 2);
    let output = match tokio::time::timeout(outer_budget, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(ToolError::Spawn(e)),
        Err(_) => {
            return Ok(ExecutionOutcome {
                stderr: String::new(),
                return_code: -SIGKILL,
                is_crash: false,
                is_hang: true,
                duration_ms: started.elapsed().as_millis() as u64,
            });
        }
    };
    let duration_ms = started.elapsed().as_millis() as u64;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        return Ok(ExecutionOutcome {
            stderr,
            return_code: output.status.code().unwrap_or(-1),
            is_crash: true,
            is_hang: false,
            duration_ms,
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let parsed: HarnessOutput = match serde_json::from_str(stdout.trim()) {
        Ok(p) => p,
        Err(_) => {
            return Ok(ExecutionOutcome {
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                return_code: -1,
                is_crash: true,
                is_hang: false,
                duration_ms,
            });
        }
    };

    let is_hang = parsed.return_code == -SIGKILL;
    let is_crash = !is_hang && parsed.return_code != 0;

    Ok(ExecutionOutcome {
        stderr: parsed.stderr,
        return_code: parsed.return_code,
        is_crash,
        is_hang,
        duration_ms,
    })
}

const MAX_OUTPUT_CHARS: usize = 10_000;
const EXECUTION_TIMEOUT_SECS: u64 = 10;

/// Outcome of `execute_python` (SPEC_FULL.md §4.3): an auxiliary script run
/// in isolation, not the target program.
#[derive(Debug, Clone)]
pub struct PythonExecutionOutcome {
    pub stdout: String,
    pub stderr: String,
    pub return_code: Option<i32>,
    pub timed_out: bool,
}

/// Runs `python_code` as a standalone script with a fixed 10-second
/// timeout; truncates each stream to 10,000 characters with a hex-dump
/// fallback when UTF-8 decoding required lossy replacement.
pub async fn execute_python(python_code: &str, cwd: &Path) -> Result<PythonExecutionOutcome> {
    let mut tmp = tempfile::Builder::new()
        .prefix("concolic-exec-")
        .suffix(".py")
        .tempfile()
        .map_err(ToolError::Spawn)?;
    {
        let file = tmp.as_file_mut();
        let mut file = tokio::fs::File::from_std(file.try_clone().map_err(ToolError::Spawn)?);
        file.write_all(python_code.as_bytes()).await?;
        file.flush().await?;
    }

    let mut child = Command::new("python3")
        .arg(tmp.path())
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(ToolError::Spawn)?;

    let budget = Duration::from_secs(EXECUTION_TIMEOUT_SECS);
    match tokio::time::timeout(budget, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(PythonExecutionOutcome {
            stdout: safe_decode_with_truncation(&output.stdout),
            stderr: filter_instrumentation_markers(&safe_decode_with_truncation(&output.stderr)),
            return_code: output.status.code(),
            timed_out: false,
        }),
        Ok(Err(e)) => Err(ToolError::Spawn(e)),
        Err(_) => Ok(PythonExecutionOutcome {
            stdout: String::new(),
            stderr: String::new(),
            return_code: None,
            timed_out: true,
        }),
    }
}

fn instrumentation_marker_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*\[?[^\s\]]*\]?\s*(enter|exit)\s+\S+\s+\d+\s*$").expect("valid regex")
    })
}

fn filter_instrumentation_markers(text: &str) -> String {
    let pattern = instrumentation_marker_pattern();
    text.lines()
        .filter(|line| !pattern.is_match(line))
        .collect::<Vec<_>>()
        .join("\n")
}

fn safe_decode_with_truncation(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => truncate_chars(s, MAX_OUTPUT_CHARS, false),
        Err(_) => {
            let lossy = String::from_utf8_lossy(bytes).into_owned();
            let truncated = truncate_chars(&lossy, MAX_OUTPUT_CHARS, true);
            let hex_limit = MAX_OUTPUT_CHARS * 2;
            let hex: String = bytes
                .iter()
                .take(hex_limit / 2)
                .map(|b| format!("{b:02x}"))
                .collect();
            format!("{truncated}\n[non-utf8 output, hex dump (truncated): {hex}]")
        }
    }
}

fn truncate_chars(s: &str, max_chars: usize, already_lossy: bool) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let truncated: String = s.chars().take(max_chars).collect();
    let marker = if already_lossy {
        "...[truncated, lossy-decoded]"
    } else {
        "...[truncated]"
    };
    format!("{truncated}{marker}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_chars_under_limit_unchanged() {
        assert_eq!(truncate_chars("hello", 10, false), "hello");
    }

    #[test]
    fn truncate_chars_over_limit_gets_marker() {
        let long = "a".repeat(20);
        let out = truncate_chars(&long, 5, false);
        assert!(out.starts_with("aaaaa"));
        assert!(out.ends_with("[truncated]"));
    }

    #[test]
    fn filters_instrumentation_markers_from_stderr() {
        let text = "real error line\n[f.c] enter main 1\nanother real line";
        let filtered = filter_instrumentation_markers(text);
        assert!(!filtered.contains("enter main"));
        assert!(filtered.contains("real error line"));
        assert!(filtered.contains("another real line"));
    }

    #[tokio::test]
    async fn execute_python_runs_simple_script() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = execute_python("print('hi')", dir.path()).await.unwrap();
        assert!(!outcome.timed_out);
        assert_eq!(outcome.return_code, Some(0));
        assert!(outcome.stdout.contains("hi"));
    }
}
