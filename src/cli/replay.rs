//! `concolic replay`: re-executes a persisted test case's `exec_code`
//! against the target program and diffs the freshly collected coverage
//! summary against what was persisted (SPEC_FULL.md §6.1 replay-utility
//! contract).

use std::path::Path;

use anyhow::Context;
use concolic_core::{ConfigManager, CorpusManager};
use concolic_tools::execute_target_program;
use concolic_trace::CoverageRegistry;

/// Outcome of a replay: whether the freshly collected coverage summary
/// matches the one persisted alongside the test case.
#[derive(Debug)]
pub struct ReplayReport {
    pub test_case_id: u64,
    pub matches_persisted_summary: bool,
    pub replayed_summary: Option<String>,
    pub persisted_summary: Option<String>,
}

pub async fn replay(config_path: &Path, id: u64) -> anyhow::Result<()> {
    let config = ConfigManager::with_path(config_path.to_path_buf())
        .load()
        .context("loading configuration")?;

    let corpus = CorpusManager::new(config.out_dir.clone());
    corpus
        .load_testcases()
        .await
        .context("loading corpus from disk")?;
    let testcase = corpus
        .get_testcase(id)
        .await
        .context("test case not found")?;

    let exec_code = testcase
        .exec_code
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("test case {id} has no exec_code to replay"))?;

    let outcome = execute_target_program(exec_code, config.target_timeout_secs, &config.project_dir)
        .await
        .context("replaying target execution")?;

    let report = if let Some(target) = &testcase.target_file_lines {
        let registry = CoverageRegistry::new();
        let source_path = config.project_dir.join(&target.path);
        let source = tokio::fs::read_to_string(&source_path)
            .await
            .with_context(|| format!("reading instrumented source {}", source_path.display()))?;
        registry.ensure_file(&target.path, &source).await;

        let target_lines: Vec<u32> = (target.start..=target.end).collect();
        registry
            .collect_trace(&target.path, &outcome.stderr, Some(&target_lines))
            .await;
        let replayed_summary = registry.with_collector(&target.path, |c| c.render_summary()).await;

        ReplayReport {
            test_case_id: id,
            matches_persisted_summary: replayed_summary == testcase.execution_summary,
            replayed_summary,
            persisted_summary: testcase.execution_summary.clone(),
        }
    } else {
        ReplayReport {
            test_case_id: id,
            matches_persisted_summary: true,
            replayed_summary: None,
            persisted_summary: testcase.execution_summary.clone(),
        }
    };

    println!(
        "test case {}: rc={} crash={} hang={}",
        report.test_case_id, outcome.return_code, outcome.is_crash, outcome.is_hang
    );
    if report.matches_persisted_summary {
        println!("coverage summary matches persisted record");
    } else {
        println!("coverage summary DIFFERS from persisted record");
        println!("--- persisted ---\n{}", report.persisted_summary.as_deref().unwrap_or("<none>"));
        println!("--- replayed ---\n{}", report.replayed_summary.as_deref().unwrap_or("<none>"));
    }
    Ok(())
}
