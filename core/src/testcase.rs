//! Test-case entity (SPEC_FULL.md §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::TestcaseState;
use crate::usage::UsageMap;

/// `(file path, [start, end])` naming lines that must be covered to consider
/// a target branch reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetFileLines {
    pub path: String,
    pub start: u32,
    pub end: u32,
}

impl TargetFileLines {
    pub fn new(path: impl Into<String>, start: u32, end: u32) -> Self {
        Self {
            path: path.into(),
            start,
            end,
        }
    }

    /// Encodes as `path:start-end`, the on-disk field encoding from §6.
    pub fn encode(&self) -> String {
        format!("{}:{}-{}", self.path, self.start, self.end)
    }

    /// Parses `path:start-end`; returns `None` for the empty-field case.
    pub fn decode(s: &str) -> Option<Self> {
        if s.is_empty() {
            return None;
        }
        let (path, range) = s.rsplit_once(':')?;
        let (start, end) = range.split_once('-')?;
        Some(Self {
            path: path.to_string(),
            start: start.parse().ok()?,
            end: end.parse().ok()?,
        })
    }
}

/// One concrete input and its execution (SPEC_FULL.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub id: u64,
    pub src_id: Option<u64>,

    pub created_at: DateTime<Utc>,
    pub time_taken: f64,

    pub states: Vec<TestcaseState>,

    pub target_branch: Option<String>,
    pub target_file_lines: Option<TargetFileLines>,
    pub target_lines_content: Option<String>,

    pub target_path_constraint: Option<String>,

    pub exec_code: Option<String>,
    pub src_exec_code: Option<String>,
    pub src_execution_trace: Option<String>,

    pub is_satisfiable: Option<bool>,
    pub is_target_covered: bool,
    pub new_coverage: bool,
    pub is_crash: bool,
    pub is_hang: bool,
    pub newly_covered_lines: u64,
    pub returncode: Option<i32>,
    pub execution_trace: Option<String>,
    pub execution_summary: Option<String>,

    pub selected_cnt: u64,
    pub successful_generation_cnt: u64,

    pub usage: UsageMap,
}

impl TestCase {
    /// A root/seed case: no parent, state list is exactly `[FINISHED]`.
    pub fn create_seed(id: u64, exec_code: String, execution_trace: String) -> Self {
        Self {
            id,
            src_id: None,
            created_at: Utc::now(),
            time_taken: 0.0,
            states: vec![TestcaseState::Finished],
            target_branch: None,
            target_file_lines: None,
            target_lines_content: None,
            target_path_constraint: None,
            exec_code: Some(exec_code),
            src_exec_code: None,
            src_execution_trace: None,
            is_satisfiable: Some(true),
            is_target_covered: false,
            new_coverage: false,
            is_crash: false,
            is_hang: false,
            newly_covered_lines: 0,
            returncode: Some(0),
            execution_trace: Some(execution_trace),
            execution_summary: None,
            selected_cnt: 0,
            successful_generation_cnt: 0,
            usage: UsageMap::new(),
        }
    }

    /// A child derived from `parent`. Initial state list `[SELECT, SUMMARIZE]`.
    pub fn create_child(id: u64, parent: &TestCase) -> Self {
        assert!(
            parent.id < id,
            "child id must be strictly greater than parent id"
        );
        Self {
            id,
            src_id: Some(parent.id),
            created_at: Utc::now(),
            time_taken: 0.0,
            states: vec![TestcaseState::Select, TestcaseState::Summarize],
            target_branch: None,
            target_file_lines: None,
            target_lines_content: None,
            target_path_constraint: None,
            exec_code: None,
            src_exec_code: parent.exec_code.clone(),
            src_execution_trace: parent.execution_trace.clone(),
            is_satisfiable: None,
            is_target_covered: false,
            new_coverage: false,
            is_crash: false,
            is_hang: false,
            newly_covered_lines: 0,
            returncode: None,
            execution_trace: None,
            execution_summary: None,
            selected_cnt: 0,
            successful_generation_cnt: 0,
            usage: UsageMap::new(),
        }
    }

    pub fn is_seed(&self) -> bool {
        self.src_id.is_none()
    }

    /// Pushes a new state onto the (monotonically growing) state list and
    /// bumps `time_taken`. Never removes a prior state.
    pub fn transition(&mut self, next: TestcaseState, elapsed_secs: f64) {
        self.states.push(next);
        self.time_taken += elapsed_secs;
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.states.last(), Some(TestcaseState::Finished))
    }

    pub fn is_crash_or_hang(&self) -> bool {
        self.is_crash || self.is_hang
    }

    /// A case is "valuable" if it covered its declared target or produced
    /// any new coverage (SPEC_FULL.md glossary).
    pub fn is_valuable(&self) -> bool {
        self.is_target_covered || self.new_coverage
    }

    /// `failure_ratio = (selected - successful) / selected`, 0 when
    /// `selected = 0`.
    pub fn failure_ratio(&self) -> f64 {
        if self.selected_cnt == 0 {
            0.0
        } else {
            (self.selected_cnt - self.successful_generation_cnt) as f64 / self.selected_cnt as f64
        }
    }

    /// `weight = (1 - failure_ratio) + (1 if new_coverage else 0)`.
    pub fn weight(&self) -> f64 {
        (1.0 - self.failure_ratio()) + if self.new_coverage { 1.0 } else { 0.0 }
    }

    /// Checks the invariants enumerated in SPEC_FULL.md §3, for use in
    /// tests and as a debug assertion at load time.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.src_id.is_none() && self.states != [TestcaseState::Finished] {
            return Err(format!(
                "seed test case {} must have states == [FINISHED]",
                self.id
            ));
        }
        if self.is_target_covered && !self.is_satisfiable.unwrap_or(false) {
            return Err(format!(
                "test case {}: is_target_covered requires is_satisfiable",
                self.id
            ));
        }
        if self.is_satisfiable.unwrap_or(false) && self.exec_code.is_none() {
            return Err(format!(
                "test case {}: is_satisfiable requires exec_code present",
                self.id
            ));
        }
        if let Some(src) = self.src_id {
            if src >= self.id {
                return Err(format!(
                    "test case {}: src_id {} must be < id",
                    self.id, src
                ));
            }
        }
        if self.selected_cnt < self.successful_generation_cnt {
            return Err(format!(
                "test case {}: selected_cnt must be >= successful_generation_cnt",
                self.id
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_has_single_finished_state() {
        let seed = TestCase::create_seed(0, "print('hi')".into(), "enter main 1\nexit main 1".into());
        assert_eq!(seed.states, vec![TestcaseState::Finished]);
        assert!(seed.check_invariants().is_ok());
    }

    #[test]
    fn child_starts_select_summarize() {
        let seed = TestCase::create_seed(0, "print('hi')".into(), "".into());
        let child = TestCase::create_child(1, &seed);
        assert_eq!(
            child.states,
            vec![TestcaseState::Select, TestcaseState::Summarize]
        );
        assert_eq!(child.src_id, Some(0));
    }

    #[test]
    fn weight_formula() {
        let mut tc = TestCase::create_seed(0, "x".into(), "".into());
        tc.selected_cnt = 4;
        tc.successful_generation_cnt = 1;
        tc.new_coverage = true;
        // failure_ratio = (4-1)/4 = 0.75; weight = 0.25 + 1 = 1.25
        assert!((tc.weight() - 1.25).abs() < 1e-9);
    }

    #[test]
    fn weight_zero_selected_has_zero_failure_ratio() {
        let tc = TestCase::create_seed(0, "x".into(), "".into());
        assert_eq!(tc.failure_ratio(), 0.0);
        assert_eq!(tc.weight(), 1.0);
    }

    #[test]
    fn target_file_lines_round_trip() {
        let t = TargetFileLines::new("example.c", 10, 12);
        let encoded = t.encode();
        assert_eq!(encoded, "example.c:10-12");
        assert_eq!(TargetFileLines::decode(&encoded), Some(t));
    }

    #[test]
    fn invalid_lineage_caught_by_invariant_check() {
        let seed = TestCase::create_seed(5, "x".into(), "".into());
        let mut bad_child = TestCase::create_child(6, &seed);
        bad_child.src_id = Some(6);
        assert!(bad_child.check_invariants().is_err());
    }
}
