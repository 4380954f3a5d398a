//! `solve_with_smt` tool (SPEC_FULL.md §4.3): evaluate a path constraint
//! with Z3 under a hard wall-clock budget, in either of two input
//! dialects.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use z3::ast::{Ast, Dynamic};
use z3::{Config, Context, SatResult, Solver};

use crate::error::{Result, ToolError};

const SMT_TIMEOUT_SECS: u64 = 10;

/// Result of a satisfiability check.
pub enum SolveOutcome {
    /// Sorted `var = value` assignment lines, one per declared symbol.
    Satisfiable(String),
    Unsatisfiable,
}

/// Accepts either:
/// - a single Z3 boolean expression given directly in `constraint`, or
/// - a fenced code block that must bind a `final_constraint` variable.
///
/// Runs under a 10-second wall-clock timeout via Z3's own `timeout` param
/// (preferred over wrapping in `tokio::time::timeout`, since Z3 is
/// synchronous CPU-bound work that a Tokio timeout can't preempt mid-call).
pub fn solve_with_smt(constraint: &str) -> Result<SolveOutcome> {
    let source = extract_final_constraint(constraint)?;

    let mut cfg = Config::new();
    cfg.set_timeout_msec(SMT_TIMEOUT_SECS * 1000);
    let ctx = Context::new(&cfg);
    let solver = Solver::new(&ctx);

    let script = build_script(&source);
    solver.from_string(&script);
    if solver.get_assertions().is_empty() {
        return Err(ToolError::Protocol(format!(
            "constraint did not parse to any assertion: {source}"
        )));
    }

    match solver.check() {
        SatResult::Sat => {
            let model = solver.get_model().ok_or_else(|| {
                ToolError::SmtUnknown("solver reported sat but produced no model".to_string())
            })?;
            let mut assignments: Vec<(String, String)> = Vec::new();
            for decl in model.iter() {
                let name = decl.name();
                if let Some(interp) = model.get_const_interp(&decl) {
                    assignments.push((name, format_dynamic(&interp)));
                }
            }
            assignments.sort_by(|a, b| a.0.cmp(&b.0));
            let rendered = assignments
                .into_iter()
                .map(|(name, value)| format!("{name} = {value}"))
                .collect::<Vec<_>>()
                .join("\n");
            Ok(SolveOutcome::Satisfiable(rendered))
        }
        SatResult::Unsat => Ok(SolveOutcome::Unsatisfiable),
        SatResult::Unknown => {
            let reason = solver.get_reason_unknown().unwrap_or_else(|| "unknown".to_string());
            if reason.contains("timeout") || reason.contains("canceled") {
                Err(ToolError::SmtTimeout(SMT_TIMEOUT_SECS))
            } else {
                Err(ToolError::SmtUnknown(reason))
            }
        }
    }
}

fn format_dynamic(value: &Dynamic) -> String {
    if let Some(b) = value.as_bool() {
        return b.as_bool().map(|v| v.to_string()).unwrap_or_else(|| b.to_string());
    }
    value.to_string()
}

fn fenced_block_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)```(?:\w+)?\s*\n(.*?)```").expect("valid regex"))
}

fn import_line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\s*(import|from)\s+\S+").expect("valid regex"))
}

/// Resolves the two accepted dialects down to a single SMT-LIB2-ish boolean
/// source string usable directly as `final_constraint`'s value.
///
/// The fenced dialect is expected to assign a Python-ish `final_constraint =
/// <expr>` binding; we strip import lines and common leading indentation,
/// then pull the right-hand side of that assignment.
fn extract_final_constraint(input: &str) -> Result<String> {
    let trimmed = input.trim();
    if let Some(captures) = fenced_block_pattern().captures(trimmed) {
        let body = captures.get(1).map(|m| m.as_str()).unwrap_or("");
        let body = strip_common_indentation(&strip_import_lines(body));
        find_assigned_expression(&body, "final_constraint").ok_or_else(|| {
            ToolError::Protocol(
                "fenced code block must bind a `final_constraint` variable".to_string(),
            )
        })
    } else {
        Ok(trimmed.to_string())
    }
}

fn strip_import_lines(body: &str) -> String {
    body.lines()
        .filter(|line| !import_line_pattern().is_match(line))
        .collect::<Vec<_>>()
        .join("\n")
}

fn strip_common_indentation(body: &str) -> String {
    let min_indent = body
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);
    body.lines()
        .map(|l| if l.len() >= min_indent { &l[min_indent..] } else { l.trim_start() })
        .collect::<Vec<_>>()
        .join("\n")
}

fn find_assigned_expression(body: &str, var_name: &str) -> Option<String> {
    for line in body.lines().rev() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix(var_name) {
            let rest = rest.trim_start();
            if let Some(expr) = rest.strip_prefix('=') {
                return Some(expr.trim().trim_end_matches(';').to_string());
            }
        }
    }
    None
}

const SMT2_KEYWORDS: &[&str] = &[
    "and", "or", "not", "ite", "true", "false", "=", "<", ">", "<=", ">=", "+", "-", "*", "div",
    "mod", "declare-const", "declare-fun", "assert", "let",
];

/// Builds a full SMT-LIB2 script from either a bare boolean s-expression or
/// a script that already contains its own `declare-const`/`assert`
/// commands. In the bare-expression case, free symbols are auto-declared
/// as `Int` — the path-constraint generator deals exclusively in integer
/// program variables.
fn build_script(source: &str) -> String {
    if source.contains("assert") {
        return source.to_string();
    }

    let already_declared = declared_names(source);
    let mut declarations = String::new();
    for name in free_identifiers(source) {
        if !already_declared.contains(&name) {
            declarations.push_str(&format!("(declare-const {name} Int)\n"));
        }
    }
    format!("{declarations}(assert {source})")
}

fn declared_names(source: &str) -> BTreeSet<String> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"\(declare-const\s+([A-Za-z_][A-Za-z0-9_]*)").expect("valid regex")
    });
    pattern
        .captures_iter(source)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

fn free_identifiers(source: &str) -> BTreeSet<String> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]*").expect("valid regex"));
    pattern
        .find_iter(source)
        .map(|m| m.as_str().to_string())
        .filter(|name| !SMT2_KEYWORDS.contains(&name.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_import_lines() {
        let body = "import z3\nfrom math import pi\nfinal_constraint = True";
        let stripped = strip_import_lines(body);
        assert!(!stripped.contains("import"));
        assert!(stripped.contains("final_constraint"));
    }

    #[test]
    fn finds_assigned_expression() {
        let body = "x = 1\nfinal_constraint = (> x 0)";
        let expr = find_assigned_expression(body, "final_constraint").unwrap();
        assert_eq!(expr, "(> x 0)");
    }

    #[test]
    fn direct_dialect_passes_through_untouched() {
        let extracted = extract_final_constraint("(> x 0)").unwrap();
        assert_eq!(extracted, "(> x 0)");
    }

    #[test]
    fn fenced_dialect_without_binding_errors() {
        let input = "```\nx = 1\n```";
        assert!(extract_final_constraint(input).is_err());
    }

    #[test]
    fn auto_declares_free_identifiers() {
        let script = build_script("(> x 0)");
        assert!(script.contains("(declare-const x Int)"));
        assert!(script.contains("(assert (> x 0))"));
    }

    #[test]
    fn script_with_existing_assert_passed_through() {
        let script = build_script("(declare-const x Int)\n(assert (> x 0))");
        assert_eq!(script, "(declare-const x Int)\n(assert (> x 0))");
    }

    #[test]
    fn satisfiable_simple_constraint() {
        let outcome = solve_with_smt("(> x 0)");
        assert!(matches!(outcome, Ok(SolveOutcome::Satisfiable(_))));
    }

    #[test]
    fn unsatisfiable_constraint_reports_unsat() {
        let outcome = solve_with_smt("(and (> x 0) (< x 0))");
        assert!(matches!(outcome, Ok(SolveOutcome::Unsatisfiable)));
    }
}
