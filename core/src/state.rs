//! Test-case and run-level state machines (SPEC_FULL.md §4.4).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-test-case lineage state. The state list on a [`crate::testcase::TestCase`]
/// only ever grows; `Finished` is always the last element once reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestcaseState {
    Select,
    Summarize,
    Solve,
    Execute,
    ReviewSolver,
    ReviewSolverExecute,
    ReviewSummary,
    ReviewSummarySolve,
    ReviewSummaryExecute,
    Finished,
}

impl TestcaseState {
    pub fn name(&self) -> &'static str {
        match self {
            TestcaseState::Select => "SELECT",
            TestcaseState::Summarize => "SUMMARIZE",
            TestcaseState::Solve => "SOLVE",
            TestcaseState::Execute => "EXECUTE",
            TestcaseState::ReviewSolver => "REVIEW_SOLVER",
            TestcaseState::ReviewSolverExecute => "REVIEW_SOLVER_EXECUTE",
            TestcaseState::ReviewSummary => "REVIEW_SUMMARY",
            TestcaseState::ReviewSummarySolve => "REVIEW_SUMMARY_SOLVE",
            TestcaseState::ReviewSummaryExecute => "REVIEW_SUMMARY_EXECUTE",
            TestcaseState::Finished => "FINISHED",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "SELECT" => TestcaseState::Select,
            "SUMMARIZE" => TestcaseState::Summarize,
            "SOLVE" => TestcaseState::Solve,
            "EXECUTE" => TestcaseState::Execute,
            "REVIEW_SOLVER" => TestcaseState::ReviewSolver,
            "REVIEW_SOLVER_EXECUTE" => TestcaseState::ReviewSolverExecute,
            "REVIEW_SUMMARY" => TestcaseState::ReviewSummary,
            "REVIEW_SUMMARY_SOLVE" => TestcaseState::ReviewSummarySolve,
            "REVIEW_SUMMARY_EXECUTE" => TestcaseState::ReviewSummaryExecute,
            "FINISHED" => TestcaseState::Finished,
            _ => return None,
        })
    }
}

impl fmt::Display for TestcaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Run-level state, used only to label orchestrator log spans; never
/// persisted per test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConcolicExecutionState {
    #[default]
    Select,
    Summarize,
    SolveAndExecute,
    IterationFinished,
}

impl fmt::Display for ConcolicExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConcolicExecutionState::Select => "SELECT",
            ConcolicExecutionState::Summarize => "SUMMARIZE",
            ConcolicExecutionState::SolveAndExecute => "SOLVE_AND_EXECUTE",
            ConcolicExecutionState::IterationFinished => "ITERATION_FINISHED",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_name() {
        for s in [
            TestcaseState::Select,
            TestcaseState::Summarize,
            TestcaseState::Solve,
            TestcaseState::Execute,
            TestcaseState::ReviewSolver,
            TestcaseState::ReviewSolverExecute,
            TestcaseState::ReviewSummary,
            TestcaseState::ReviewSummarySolve,
            TestcaseState::ReviewSummaryExecute,
            TestcaseState::Finished,
        ] {
            assert_eq!(TestcaseState::from_name(s.name()), Some(s));
        }
    }

    #[test]
    fn unknown_name_is_none() {
        assert_eq!(TestcaseState::from_name("NOPE"), None);
    }
}
