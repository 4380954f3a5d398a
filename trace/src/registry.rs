//! Coverage registry: process-wide `file_path -> TraceCollector` map
//! (SPEC_FULL.md §4.2).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::collector::TraceCollector;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] bincode::Error),
}

/// A plain-data mirror of a [`TraceCollector`], used for the binary
/// persistence blob. We keep the live collector's richer state (hit counts,
/// line maps) but serialize only what's needed to reconstruct it.
#[derive(Debug, Serialize, Deserialize)]
struct CollectorSnapshot {
    file_path: String,
    source_lines: Vec<String>,
    hits: Vec<((String, u64), u64)>,
}

fn normalize_path(path: &str) -> String {
    Path::new(path)
        .components()
        .collect::<PathBuf>()
        .to_string_lossy()
        .into_owned()
}

/// Process-wide singleton mapping normalized file path -> trace collector.
/// Created lazily; lifecycle spans the full run.
pub struct CoverageRegistry {
    files: RwLock<HashMap<String, TraceCollector>>,
    outstanding_save: Mutex<Option<JoinHandle<()>>>,
}

impl CoverageRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            files: RwLock::new(HashMap::new()),
            outstanding_save: Mutex::new(None),
        })
    }

    pub async fn has(&self, path: &str) -> bool {
        self.files.read().await.contains_key(&normalize_path(path))
    }

    pub async fn get_all_files(&self) -> Vec<String> {
        self.files.read().await.keys().cloned().collect()
    }

    /// Runs `f` against the named file's collector under the read lock,
    /// returning `None` if no collector has been initialized for it yet.
    pub async fn with_collector<R>(&self, path: &str, f: impl FnOnce(&TraceCollector) -> R) -> Option<R> {
        let key = normalize_path(path);
        let files = self.files.read().await;
        files.get(&key).map(f)
    }

    /// Lazily initializes a collector for `path` by parsing `source` the
    /// first time it's mentioned; subsequent calls are no-ops if already
    /// present.
    pub async fn ensure_file(&self, path: &str, source: &str) {
        let key = normalize_path(path);
        let mut files = self.files.write().await;
        files
            .entry(key)
            .or_insert_with(|| TraceCollector::parse(path, source));
    }

    /// Feeds a runtime trace into the named file's collector. If
    /// `target_lines` is given, returns whether any of them strictly
    /// increased in hit count (the "target reached" signal).
    pub async fn collect_trace(
        &self,
        path: &str,
        trace: &str,
        target_lines: Option<&[u32]>,
    ) -> CollectTraceOutcome {
        let key = normalize_path(path);
        let mut files = self.files.write().await;
        let Some(collector) = files.get_mut(&key) else {
            return CollectTraceOutcome {
                newly_covered_lines: 0,
                target_covered: false,
            };
        };

        let before: Vec<(u32, u64)> = target_lines
            .map(|lines| collector.get_real_line_coverage(lines))
            .unwrap_or_default();

        let result = collector.collect_trace(trace);

        let target_covered = if let Some(lines) = target_lines {
            let after = collector.get_real_line_coverage(lines);
            before
                .iter()
                .zip(after.iter())
                .any(|((_, b), (_, a))| a > b)
        } else {
            false
        };

        CollectTraceOutcome {
            newly_covered_lines: result.newly_covered_lines,
            target_covered,
        }
    }

    /// Deep-snapshots the registry then hands the buffer to a background
    /// writer task. A prior outstanding save must complete before a new one
    /// starts (joined here, synchronously, before spawning the next).
    pub async fn save(self: &Arc<Self>, path: PathBuf) -> Result<(), RegistryError> {
        {
            let mut outstanding = self.outstanding_save.lock().await;
            if let Some(handle) = outstanding.take() {
                let _ = handle.await;
            }
        }

        let snapshot = self.snapshot().await;
        let registry = Arc::clone(self);
        let handle = tokio::spawn(async move {
            if let Err(e) = write_snapshot(&path, &snapshot).await {
                tracing::warn!(error = %e, "coverage registry save failed");
            }
            let mut outstanding = registry.outstanding_save.lock().await;
            *outstanding = None;
        });

        let mut outstanding = self.outstanding_save.lock().await;
        *outstanding = Some(handle);
        Ok(())
    }

    /// Blocks until any outstanding save completes.
    pub async fn wait_for_save(&self) {
        let mut outstanding = self.outstanding_save.lock().await;
        if let Some(handle) = outstanding.take() {
            let _ = handle.await;
        }
    }

    async fn snapshot(&self) -> Vec<CollectorSnapshot> {
        let files = self.files.read().await;
        files
            .values()
            .map(|c| CollectorSnapshot {
                file_path: c.file_path.clone(),
                source_lines: (1..=c.line_count() as u32)
                    .map(|_| String::new())
                    .collect(),
                hits: c
                    .blocks()
                    .iter()
                    .map(|b| ((b.function.clone(), b.block_id), c.hit_count_of(&b.function, b.block_id)))
                    .collect(),
            })
            .collect()
    }

    /// Atomically replaces the registry's contents from a previously saved
    /// blob. Hit counts are restored; source text must already be available
    /// via a fresh `ensure_file` call (the snapshot stores hit counts, not
    /// full source, since source is recoverable from the instrumented file
    /// on disk).
    pub async fn load(self: &Arc<Self>, path: &Path) -> Result<(), RegistryError> {
        let bytes = tokio::fs::read(path).await?;
        let snapshot: Vec<CollectorSnapshot> = bincode::deserialize(&bytes)?;
        let mut files = self.files.write().await;
        for entry in snapshot {
            if let Some(collector) = files.get_mut(&entry.file_path) {
                for ((function, block_id), hits) in entry.hits {
                    for _ in 0..hits {
                        collector.collect_trace(&format!("enter {function} {block_id}"));
                    }
                }
            }
        }
        Ok(())
    }
}

impl Default for Arc<CoverageRegistry> {
    fn default() -> Self {
        CoverageRegistry::new()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CollectTraceOutcome {
    pub newly_covered_lines: u64,
    pub target_covered: bool,
}

async fn write_snapshot(path: &Path, snapshot: &[CollectorSnapshot]) -> Result<(), RegistryError> {
    let bytes = bincode::serialize(snapshot)?;
    tokio::fs::write(path, bytes).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lazy_init_then_has() {
        let registry = CoverageRegistry::new();
        assert!(!registry.has("f.c").await);
        registry.ensure_file("f.c", "// enter main 1\nint x;\n// exit main 1\n").await;
        assert!(registry.has("f.c").await);
    }

    #[tokio::test]
    async fn with_collector_returns_none_for_unknown_file() {
        let registry = CoverageRegistry::new();
        let result = registry.with_collector("missing.c", |c| c.line_count()).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn with_collector_returns_some_for_known_file() {
        let registry = CoverageRegistry::new();
        registry.ensure_file("f.c", "int x;\n").await;
        let result = registry.with_collector("f.c", |c| c.line_count()).await;
        assert_eq!(result, Some(1));
    }

    #[tokio::test]
    async fn collect_trace_reports_target_covered() {
        let registry = CoverageRegistry::new();
        registry
            .ensure_file("f.c", "// enter main 1\nint x;\n// exit main 1\n")
            .await;
        let outcome = registry
            .collect_trace("f.c", "enter main 1\nexit main 1", Some(&[2]))
            .await;
        assert!(outcome.target_covered);
    }

    #[tokio::test]
    async fn save_serializes_without_panicking() {
        let dir = tempfile::tempdir().unwrap();
        let registry = CoverageRegistry::new();
        registry.ensure_file("f.c", "// enter main 1\nint x;\n// exit main 1\n").await;
        registry.collect_trace("f.c", "enter main 1\nexit main 1", None).await;
        registry.save(dir.path().join("coverage.bin")).await.unwrap();
        registry.wait_for_save().await;
        assert!(dir.path().join("coverage.bin").exists());
    }
}
