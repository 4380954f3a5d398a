//! Corpus manager: owns the test-case map, id counter, output directory and
//! persistence (SPEC_FULL.md §3, §4.5 open-question resolution, §6).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::state::TestcaseState;
use crate::testcase::TestCase;

const QUEUE_DIR: &str = "queue";
const CRASHES_DIR: &str = "crashes_or_hangs";

/// AFL-style on-disk filename: `id:NNNNNN[,src:NNNNNN].<ext>`.
pub fn afl_filename(id: u64, src_id: Option<u64>, ext: &str) -> String {
    match src_id {
        Some(src) => format!("id:{id:06},src:{src:06}.{ext}"),
        None => format!("id:{id:06}.{ext}"),
    }
}

/// Parses an AFL-style filename back into `(id, src_id)`. Best-effort:
/// returns `None` for anything that doesn't match the expected shape.
pub fn parse_afl_filename(name: &str) -> Option<(u64, Option<u64>)> {
    let stem = name.rsplit_once('.').map(|(s, _)| s).unwrap_or(name);
    let mut id = None;
    let mut src = None;
    for part in stem.split(',') {
        let (key, val) = part.split_once(':')?;
        match key {
            "id" => id = val.parse::<u64>().ok(),
            "src" => src = val.parse::<u64>().ok(),
            _ => {}
        }
    }
    id.map(|id| (id, src))
}

/// One row of the scheduler-facing scheduling view (SPEC_FULL.md §4.5).
#[derive(Debug, Clone)]
pub struct SchedulingInfo {
    pub id: u64,
    pub src_id: Option<u64>,
    pub target_path_constraint: Option<String>,
    pub exec_code: Option<String>,
    pub function_call_chain_rendered: String,
    pub selected_cnt: u64,
    pub successful_generation_cnt: u64,
    pub weight: f64,
    /// Rendered XML-tagged info string fed to the scheduler LLM.
    pub rendered: String,
}

/// Aggregate statistics over the whole corpus.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CorpusStatistics {
    pub reach_success: u64,
    pub reach_failure: u64,
    pub unsatisfiable_constraints: u64,
    pub new_coverage: u64,
    pub crashes: u64,
    pub hangs: u64,
}

/// Owns the id -> test case map, next-id counter, output directory, and
/// persistence. All id allocation and disk writes are serialized through
/// `lock` (SPEC_FULL.md §4.5's open-question resolution).
pub struct CorpusManager {
    out_dir: PathBuf,
    cases: Arc<Mutex<BTreeMap<u64, TestCase>>>,
    next_id: Arc<Mutex<u64>>,
    lock_retry_count: u32,
    lock_retry_delay_ms: u64,
}

impl CorpusManager {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
            cases: Arc::new(Mutex::new(BTreeMap::new())),
            next_id: Arc::new(Mutex::new(0)),
            lock_retry_count: 3,
            lock_retry_delay_ms: 100,
        }
    }

    pub fn with_retry_policy(mut self, retries: u32, delay_ms: u64) -> Self {
        self.lock_retry_count = retries;
        self.lock_retry_delay_ms = delay_ms;
        self
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    fn queue_dir(&self) -> PathBuf {
        self.out_dir.join(QUEUE_DIR)
    }

    fn crashes_dir(&self) -> PathBuf {
        self.out_dir.join(CRASHES_DIR)
    }

    /// Adds a seed (no parent) test case, persisting it immediately.
    pub async fn add_initial_testcase(&self, mut testcase: TestCase) -> Result<u64> {
        let mut next_id = self.next_id.lock().await;
        testcase.id = *next_id;
        *next_id += 1;
        let id = testcase.id;
        drop(next_id);

        testcase
            .check_invariants()
            .map_err(|reason| Error::MalformedCaseFile {
                path: format!("id:{id:06}"),
                reason,
            })?;

        self.cases.lock().await.insert(id, testcase.clone());
        self.save_to_disk(&testcase).await?;
        Ok(id)
    }

    /// Allocates a fresh id for a child of `parent_id`, serialized under the
    /// manager's lock, and bumps the parent's `selected_cnt`. Program-order
    /// across a multi-branch summarizer session is preserved by callers
    /// invoking this once per `select_target_branch`, in order.
    pub async fn create_child_testcase(&self, parent_id: u64) -> Result<TestCase> {
        let mut next_id = self.next_id.lock().await;
        let mut cases = self.cases.lock().await;
        let parent = cases
            .get(&parent_id)
            .ok_or(Error::UnknownTestCase(parent_id))?
            .clone();

        let id = *next_id;
        *next_id += 1;
        let child = TestCase::create_child(id, &parent);

        if let Some(parent_mut) = cases.get_mut(&parent_id) {
            parent_mut.selected_cnt += 1;
        }
        cases.insert(id, child.clone());
        Ok(child)
    }

    pub async fn get_testcase(&self, id: u64) -> Result<TestCase> {
        self.cases
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or(Error::UnknownTestCase(id))
    }

    /// Stores the (mutated) test case back into memory. Does not persist —
    /// callers decide persistence checkpoints explicitly per SPEC_FULL.md
    /// §4.4's "autosave is disabled" rule.
    pub async fn update_testcase(&self, testcase: TestCase) -> Result<()> {
        let mut cases = self.cases.lock().await;
        if !cases.contains_key(&testcase.id) {
            return Err(Error::UnknownTestCase(testcase.id));
        }
        cases.insert(testcase.id, testcase);
        Ok(())
    }

    /// Called when a child reaches FINISHED: bumps the parent's
    /// `successful_generation_cnt` if the child turned out valuable.
    pub async fn record_child_outcome(&self, child: &TestCase) -> Result<()> {
        if let Some(parent_id) = child.src_id {
            if child.is_valuable() {
                let mut cases = self.cases.lock().await;
                if let Some(parent) = cases.get_mut(&parent_id) {
                    parent.successful_generation_cnt += 1;
                }
            }
        }
        Ok(())
    }

    /// Writes the test case to `queue/`, and additionally to
    /// `crashes_or_hangs/` if it crashed or hung. Uses an exclusive advisory
    /// lock with up to `lock_retry_count` retries, `lock_retry_delay_ms`
    /// apart; persistent failure is a terminal error (SPEC_FULL.md §7).
    pub async fn save_to_disk(&self, testcase: &TestCase) -> Result<()> {
        let queue_dir = self.queue_dir();
        tokio::fs::create_dir_all(&queue_dir).await?;

        let filename = afl_filename(testcase.id, testcase.src_id, "yaml");
        let path = queue_dir.join(&filename);
        let body = serde_yaml::to_string(testcase)?;

        self.write_with_retries(&path, &body).await?;

        if testcase.is_crash_or_hang() {
            let crashes_dir = self.crashes_dir();
            tokio::fs::create_dir_all(&crashes_dir).await?;
            self.write_with_retries(&crashes_dir.join(&filename), &body)
                .await?;
        }
        debug!(id = testcase.id, path = %path.display(), "persisted test case");
        Ok(())
    }

    async fn write_with_retries(&self, path: &Path, body: &str) -> Result<()> {
        let mut last_err = None;
        for attempt in 0..=self.lock_retry_count {
            match tokio::fs::write(path, body).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(path = %path.display(), attempt, error = %e, "persistence write failed, retrying");
                    last_err = Some(e);
                    tokio::time::sleep(std::time::Duration::from_millis(self.lock_retry_delay_ms))
                        .await;
                }
            }
        }
        Err(Error::PersistenceExhausted {
            retries: self.lock_retry_count,
            reason: last_err.map(|e| e.to_string()).unwrap_or_default(),
        })
    }

    /// Loads every `queue/*.yaml` file into memory, replacing the current
    /// map. NUL/EOT/DEL control bytes are stripped before parsing, matching
    /// the original implementation's load-time sanitization.
    pub async fn load_testcases(&self) -> Result<()> {
        let queue_dir = self.queue_dir();
        if !queue_dir.exists() {
            return Ok(());
        }
        let mut loaded = BTreeMap::new();
        let mut max_id = 0u64;
        let mut entries = tokio::fs::read_dir(&queue_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                continue;
            }
            let raw = tokio::fs::read(&path).await?;
            let cleaned: Vec<u8> = raw
                .into_iter()
                .filter(|b| !matches!(b, 0x00 | 0x04 | 0x7f))
                .collect();
            let text = String::from_utf8_lossy(&cleaned).into_owned();
            let testcase: TestCase =
                serde_yaml::from_str(&text).map_err(|e| Error::MalformedCaseFile {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?;
            max_id = max_id.max(testcase.id);
            loaded.insert(testcase.id, testcase);
        }
        *self.cases.lock().await = loaded;
        *self.next_id.lock().await = max_id + 1;
        Ok(())
    }

    pub async fn statistics(&self) -> CorpusStatistics {
        let cases = self.cases.lock().await;
        let mut stats = CorpusStatistics::default();
        for tc in cases.values() {
            if tc.is_target_covered {
                stats.reach_success += 1;
            } else if tc.target_branch.is_some() && tc.is_finished() {
                stats.reach_failure += 1;
            }
            if tc.is_satisfiable == Some(false) {
                stats.unsatisfiable_constraints += 1;
            }
            if tc.new_coverage {
                stats.new_coverage += 1;
            }
            if tc.is_crash {
                stats.crashes += 1;
            }
            if tc.is_hang {
                stats.hangs += 1;
            }
        }
        stats
    }

    /// Projects all *valuable* cases into a scheduling view, token-budget
    /// truncated by descending `(weight, id)` (SPEC_FULL.md §4.5, §8).
    pub async fn scheduling_view(
        &self,
        token_budget: u64,
        chars_per_token: f64,
    ) -> Vec<SchedulingInfo> {
        let cases = self.cases.lock().await;
        let mut rows: Vec<SchedulingInfo> = cases
            .values()
            .filter(|tc| tc.is_valuable())
            .map(|tc| {
                let rendered = render_scheduling_entry(tc);
                SchedulingInfo {
                    id: tc.id,
                    src_id: tc.src_id,
                    target_path_constraint: tc.target_path_constraint.clone(),
                    exec_code: tc.exec_code.clone(),
                    function_call_chain_rendered: String::new(),
                    selected_cnt: tc.selected_cnt,
                    successful_generation_cnt: tc.successful_generation_cnt,
                    weight: tc.weight(),
                    rendered,
                }
            })
            .collect();

        // Descending weight, then descending id (ties broken deterministically).
        rows.sort_by(|a, b| {
            b.weight
                .partial_cmp(&a.weight)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.id.cmp(&a.id))
        });

        let char_budget = (token_budget as f64 * chars_per_token) as usize;
        let mut total_chars = 0usize;
        let mut kept = Vec::new();
        for row in rows {
            let len = row.rendered.len();
            if !kept.is_empty() && total_chars + len > char_budget {
                break;
            }
            total_chars += len;
            kept.push(row);
        }
        kept
    }
}

fn render_scheduling_entry(tc: &TestCase) -> String {
    format!(
        "<test_case_id>{}</test_case_id><src_id>{}</src_id><path_constraint>{}</path_constraint><weight>{:.4}</weight>",
        tc.id,
        tc.src_id.map(|s| s.to_string()).unwrap_or_default(),
        tc.target_path_constraint.as_deref().unwrap_or(""),
        tc.weight(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn afl_filename_with_and_without_src() {
        assert_eq!(afl_filename(0, None, "yaml"), "id:000000.yaml");
        assert_eq!(afl_filename(12, Some(3), "yaml"), "id:000012,src:000003.yaml");
    }

    #[test]
    fn parse_afl_filename_round_trips() {
        assert_eq!(parse_afl_filename("id:000012,src:000003.yaml"), Some((12, Some(3))));
        assert_eq!(parse_afl_filename("id:000000.yaml"), Some((0, None)));
        assert_eq!(parse_afl_filename("garbage.yaml"), None);
    }

    #[tokio::test]
    async fn seed_persists_to_queue_000000() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = CorpusManager::new(dir.path());
        let seed = TestCase::create_seed(0, "print('hi')".into(), "enter main 1\nexit main 1".into());
        let id = mgr.add_initial_testcase(seed).await.unwrap();
        assert_eq!(id, 0);
        let path = dir.path().join("queue").join("id:000000.yaml");
        assert!(path.exists());
    }

    #[tokio::test]
    async fn child_gets_strictly_greater_id_and_bumps_parent_selected() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = CorpusManager::new(dir.path());
        let seed = TestCase::create_seed(0, "print('hi')".into(), "".into());
        mgr.add_initial_testcase(seed).await.unwrap();

        let child = mgr.create_child_testcase(0).await.unwrap();
        assert!(child.id > 0);
        let parent = mgr.get_testcase(0).await.unwrap();
        assert_eq!(parent.selected_cnt, 1);
    }

    #[tokio::test]
    async fn scheduling_view_only_includes_valuable_cases() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = CorpusManager::new(dir.path());
        let mut seed = TestCase::create_seed(0, "print('hi')".into(), "".into());
        seed.new_coverage = true;
        mgr.add_initial_testcase(seed).await.unwrap();

        let mut dull = TestCase::create_seed(1, "print('bye')".into(), "".into());
        dull.id = 1;
        dull.new_coverage = false;
        dull.is_target_covered = false;
        mgr.cases.lock().await.insert(1, dull);

        let view = mgr.scheduling_view(180_000, 3.5).await;
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].id, 0);
    }

    #[tokio::test]
    async fn load_round_trips_saved_case() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = CorpusManager::new(dir.path());
        let seed = TestCase::create_seed(0, "print('hi')".into(), "enter main 1\nexit main 1".into());
        mgr.add_initial_testcase(seed.clone()).await.unwrap();

        let mgr2 = CorpusManager::new(dir.path());
        mgr2.load_testcases().await.unwrap();
        let loaded = mgr2.get_testcase(0).await.unwrap();
        assert_eq!(loaded.exec_code, seed.exec_code);
        assert_eq!(loaded.states, seed.states);
    }
}
