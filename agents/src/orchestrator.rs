//! Orchestrator (SPEC_FULL.md §4.5): ties scheduling, summarization, and
//! per-branch solve+execute(+review) into one generation iteration.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use concolic_core::{
    Config, ConcolicExecutionState, CorpusManager, TargetFileLines, TestCase, TestcaseState, UsageMap,
};
use concolic_tools::execute_target_program;
use concolic_trace::CoverageRegistry;
use tracing::{info, info_span, warn, Instrument};

use crate::error::AgentError;
use crate::llm_client::LlmClient;
use crate::message::ThreadCache;
use crate::reviewer::{run_solver_reviewer, run_summary_reviewer};
use crate::scheduler::run_scheduler;
use crate::solver::run_solver;
use crate::summarizer::{run_summarizer, BranchSelection};

/// One `LlmClient` per agent role, mirroring `ModelsConfig`'s per-role
/// provider/model/temperature selection.
pub struct AgentClients {
    pub scheduler: LlmClient,
    pub summarizer: LlmClient,
    pub solver: LlmClient,
    pub solver_reviewer: LlmClient,
    pub summary_reviewer: LlmClient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationOutcome {
    /// No test case in the corpus is currently valuable enough to branch from.
    NoValuableCases,
    Completed { children_spawned: usize },
}

pub struct Orchestrator {
    corpus: Arc<CorpusManager>,
    registry: Arc<CoverageRegistry>,
    clients: AgentClients,
    config: Config,
    scheduler_cache: tokio::sync::Mutex<ThreadCache>,
}

impl Orchestrator {
    pub fn new(
        corpus: Arc<CorpusManager>,
        registry: Arc<CoverageRegistry>,
        clients: AgentClients,
        config: Config,
    ) -> Self {
        Self {
            corpus,
            registry,
            clients,
            config,
            scheduler_cache: tokio::sync::Mutex::new(ThreadCache::default()),
        }
    }

    /// Runs one SELECT → SUMMARIZE → SOLVE_AND_EXECUTE → ITERATION_FINISHED
    /// cycle. Each phase is wrapped in a log span tagged with the run-level
    /// state, per SPEC_FULL.md §10.1.
    pub async fn run_iteration(&self) -> Result<IterationOutcome> {
        let view = self
            .corpus
            .scheduling_view(self.config.scheduling_token_budget, self.config.chars_per_token_estimate)
            .await;
        if view.is_empty() {
            info!("no valuable test cases to schedule from");
            return Ok(IterationOutcome::NoValuableCases);
        }

        let mut iteration_usage = UsageMap::new();

        let selection = self
            .select_phase(&mut iteration_usage)
            .instrument(info_span!("iteration", state = %ConcolicExecutionState::Select))
            .await?;
        info!(parent = selection.selected_id, justification = %selection.justification, "scheduler selected parent");

        let parent = self.corpus.get_testcase(selection.selected_id).await?;
        let summary = self
            .summarize_phase(&parent, &mut iteration_usage)
            .instrument(info_span!("iteration", state = %ConcolicExecutionState::Summarize, parent = parent.id))
            .await?;

        let mut updated_parent = self.corpus.get_testcase(parent.id).await?;
        merge_usage(&mut updated_parent.usage, &iteration_usage);
        self.corpus.update_testcase(updated_parent.clone()).await?;
        self.corpus.save_to_disk(&updated_parent).await?;

        if summary.branches.is_empty() {
            info!(parent = parent.id, "summarizer selected no branches this iteration");
            return Ok(IterationOutcome::Completed { children_spawned: 0 });
        }

        let spawned = self
            .solve_and_execute_phase(parent.id, summary.branches)
            .instrument(info_span!("iteration", state = %ConcolicExecutionState::SolveAndExecute, parent = parent.id))
            .await?;

        {
            let _span = info_span!("iteration", state = %ConcolicExecutionState::IterationFinished, parent = parent.id).entered();
            info!(children = spawned, "iteration finished");
        }

        Ok(IterationOutcome::Completed { children_spawned: spawned })
    }

    async fn select_phase(
        &self,
        usage: &mut UsageMap,
    ) -> Result<crate::scheduler::SchedulerOutcome> {
        let mut cache = self.scheduler_cache.lock().await;
        run_scheduler(
            &self.corpus,
            &self.clients.scheduler,
            &mut cache,
            usage,
            self.config.scheduling_token_budget,
            self.config.chars_per_token_estimate,
        )
        .await
        .map_err(AgentError::from)
        .context("scheduler phase failed")
    }

    async fn summarize_phase(
        &self,
        parent: &TestCase,
        usage: &mut UsageMap,
    ) -> Result<crate::summarizer::SummarizerOutcome> {
        run_summarizer(
            parent,
            &self.registry,
            &self.clients.summarizer,
            usage,
            self.config.max_code_request_attempts,
        )
        .await
        .map_err(AgentError::from)
        .context("summarizer phase failed")
    }

    /// Allocates one child per branch (serialized through the corpus
    /// manager's id-counter mutex, in `select_target_branch` call order) and
    /// runs each child's solve+execute(+review) sequence as an independent
    /// parallel task.
    async fn solve_and_execute_phase(
        &self,
        parent_id: u64,
        branches: Vec<BranchSelection>,
    ) -> Result<usize> {
        let mut tasks = Vec::with_capacity(branches.len());
        for branch in branches {
            let child = self.corpus.create_child_testcase(parent_id).await?;
            tasks.push(self.solve_and_execute_child(child, branch));
        }

        let count = tasks.len();
        let results = futures::future::join_all(tasks).await;
        for result in results {
            if let Err(e) = result {
                warn!(error = %e, "child solve+execute task failed");
            }
        }
        Ok(count)
    }

    /// Runs the full per-child state sequence: SOLVE → EXECUTE →
    /// (FINISHED | REVIEW_SOLVER → REVIEW_SOLVER_EXECUTE → FINISHED |
    /// REVIEW_SOLVER → REVIEW_SUMMARY → REVIEW_SUMMARY_SOLVE →
    /// REVIEW_SUMMARY_EXECUTE → FINISHED).
    async fn solve_and_execute_child(&self, mut child: TestCase, branch: BranchSelection) -> Result<()> {
        let child_id = child.id;
        let mut usage = UsageMap::new();
        let mut phase_start = Instant::now();

        let Some(path_constraint) = branch.path_constraint.clone() else {
            warn!(child = child_id, "branch committed without a recorded path constraint; finishing early");
            child.transition(TestcaseState::Finished, phase_start.elapsed().as_secs_f64());
            return self.finalize(&mut child).await;
        };

        child.target_lines_content = self.render_target_lines(&branch.target_branch).await;
        child.target_file_lines = Some(branch.target_branch.clone());
        child.target_branch = Some(branch.target_branch.encode());
        child.target_path_constraint = Some(path_constraint.clone());
        child.transition(TestcaseState::Solve, phase_start.elapsed().as_secs_f64());
        phase_start = Instant::now();

        let solver_outcome = run_solver(&path_constraint, &self.config.project_dir, &self.clients.solver, &mut usage)
            .await
            .map_err(AgentError::from)
            .with_context(|| format!("solver failed for child {child_id}"))?;
        child.is_satisfiable = Some(solver_outcome.is_satisfiable);

        if !solver_outcome.is_satisfiable {
            child.transition(TestcaseState::Finished, phase_start.elapsed().as_secs_f64());
            child.usage = usage;
            return self.finalize(&mut child).await;
        }

        let exec_code = solver_outcome
            .exec_code
            .ok_or_else(|| anyhow!("solver reported satisfiable with no exec_code for child {child_id}"))?;
        child.exec_code = Some(exec_code.clone());
        child.transition(TestcaseState::Execute, phase_start.elapsed().as_secs_f64());
        phase_start = Instant::now();

        self.run_execution(&mut child, &exec_code).await?;

        if child.is_crash_or_hang() || child.is_target_covered || child.new_coverage {
            child.transition(TestcaseState::Finished, phase_start.elapsed().as_secs_f64());
            child.usage = usage;
            return self.finalize(&mut child).await;
        }

        child.transition(TestcaseState::ReviewSolver, phase_start.elapsed().as_secs_f64());
        phase_start = Instant::now();

        let solver_review = run_solver_reviewer(
            &exec_code,
            child.execution_summary.as_deref().unwrap_or(""),
            &self.clients.solver_reviewer,
            &mut usage,
        )
        .await
        .map_err(AgentError::from)
        .with_context(|| format!("solver reviewer failed for child {child_id}"))?;

        if solver_review.need_adjust {
            let corrected = solver_review
                .corrected_exec_code
                .ok_or_else(|| anyhow!("solver review need_adjust with no correction for child {child_id}"))?;
            child.exec_code = Some(corrected.clone());
            child.transition(TestcaseState::ReviewSolverExecute, phase_start.elapsed().as_secs_f64());
            phase_start = Instant::now();
            self.run_execution(&mut child, &corrected).await?;
            child.transition(TestcaseState::Finished, phase_start.elapsed().as_secs_f64());
            child.usage = usage;
            return self.finalize(&mut child).await;
        }

        // The solver reviewer judged the constraint itself wrong: escalate
        // to the summary reviewer.
        child.transition(TestcaseState::ReviewSummary, phase_start.elapsed().as_secs_f64());
        phase_start = Instant::now();

        let summary_review = run_summary_reviewer(
            child.target_branch.as_deref().unwrap_or(""),
            &path_constraint,
            &self.clients.summary_reviewer,
            &mut usage,
        )
        .await
        .map_err(AgentError::from)
        .with_context(|| format!("summary reviewer failed for child {child_id}"))?;

        if let Some(corrected_branch) = &summary_review.corrected_target_branch {
            if let Some(parsed) = TargetFileLines::decode(corrected_branch) {
                child.target_lines_content = self.render_target_lines(&parsed).await;
                child.target_file_lines = Some(parsed);
            }
            child.target_branch = Some(corrected_branch.clone());
        }
        let corrected_constraint = summary_review.corrected_path_constraint.unwrap_or(path_constraint);
        child.target_path_constraint = Some(corrected_constraint.clone());

        child.transition(TestcaseState::ReviewSummarySolve, phase_start.elapsed().as_secs_f64());
        phase_start = Instant::now();

        let resolved = run_solver(&corrected_constraint, &self.config.project_dir, &self.clients.solver, &mut usage)
            .await
            .map_err(AgentError::from)
            .with_context(|| format!("re-solve after summary review failed for child {child_id}"))?;
        child.is_satisfiable = Some(resolved.is_satisfiable);

        if !resolved.is_satisfiable {
            child.transition(TestcaseState::Finished, phase_start.elapsed().as_secs_f64());
            child.usage = usage;
            return self.finalize(&mut child).await;
        }

        let corrected_exec_code = resolved
            .exec_code
            .ok_or_else(|| anyhow!("re-solve reported satisfiable with no exec_code for child {child_id}"))?;
        child.exec_code = Some(corrected_exec_code.clone());
        child.transition(TestcaseState::ReviewSummaryExecute, phase_start.elapsed().as_secs_f64());
        phase_start = Instant::now();

        self.run_execution(&mut child, &corrected_exec_code).await?;
        child.transition(TestcaseState::Finished, phase_start.elapsed().as_secs_f64());
        child.usage = usage;
        self.finalize(&mut child).await
    }

    /// Runs `exec_code` against the target program, records crash/hang
    /// classification, and feeds the raw stderr (carrying the instrumented
    /// trace markers) to the coverage registry.
    async fn run_execution(&self, child: &mut TestCase, exec_code: &str) -> Result<()> {
        let started = Instant::now();
        let outcome = execute_target_program(exec_code, self.config.target_timeout_secs, &self.config.project_dir)
            .await
            .with_context(|| format!("target execution failed for child {}", child.id))?;

        child.returncode = Some(outcome.return_code);
        child.is_crash = outcome.is_crash;
        child.is_hang = outcome.is_hang;
        child.execution_trace = Some(outcome.stderr.clone());

        let outcome_label = if outcome.is_hang {
            "hang"
        } else if outcome.is_crash {
            "crash"
        } else {
            "success"
        };
        info!(
            child = child.id,
            outcome = outcome_label,
            duration_ms = outcome.duration_ms,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "target execution finished"
        );

        if child.is_crash_or_hang() {
            child.execution_summary = Some(format!("process {outcome_label} (rc={:?})", outcome.return_code));
            return Ok(());
        }

        let Some(target) = child.target_file_lines.clone() else {
            return Ok(());
        };
        let target_lines: Vec<u32> = (target.start..=target.end).collect();
        let result = self.registry.collect_trace(&target.path, &outcome.stderr, Some(&target_lines)).await;
        child.newly_covered_lines = result.newly_covered_lines;
        child.is_target_covered = result.target_covered;
        child.new_coverage = result.newly_covered_lines > 0;
        child.execution_summary = self.registry.with_collector(&target.path, |c| c.render_summary()).await;
        Ok(())
    }

    async fn render_target_lines(&self, target: &TargetFileLines) -> Option<String> {
        self.registry
            .with_collector(&target.path, |collector| {
                (target.start..=target.end)
                    .filter_map(|line| collector.get_real_line_content(line))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .await
    }

    /// Persists `child`, bumping the parent's `successful_generation_cnt`
    /// when the child turned out valuable (SPEC_FULL.md §4.5's
    /// open-question resolution).
    async fn finalize(&self, child: &mut TestCase) -> Result<()> {
        self.corpus.update_testcase(child.clone()).await?;
        self.corpus.record_child_outcome(child).await?;
        self.corpus.save_to_disk(child).await?;
        Ok(())
    }
}

/// Folds every non-`TOTAL` bucket of `from` into `into` (skipping `TOTAL`
/// avoids double-counting it through `UsageMap::record`'s own roll-up).
fn merge_usage(into: &mut UsageMap, from: &UsageMap) {
    for (label, usage) in from.0.iter() {
        if label == concolic_core::TOTAL_BUCKET {
            continue;
        }
        into.record(&[label.as_str()], *usage);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::{FakeLlmClient, LlmResponse};
    use concolic_core::Usage;

    fn fake(responses: Vec<LlmResponse>) -> LlmClient {
        LlmClient::Fake(FakeLlmClient::new("fake-model", responses))
    }

    fn empty_response() -> LlmResponse {
        LlmResponse { content: String::new(), tool_calls: vec![], usage: Usage::default() }
    }

    #[test]
    fn merge_usage_skips_total_bucket_and_rolls_up() {
        let mut from = UsageMap::new();
        from.record(&["SOLVE"], Usage::input_only(10));
        let mut into = UsageMap::new();
        merge_usage(&mut into, &from);
        assert_eq!(into.get("SOLVE").input_tokens, 10);
        assert_eq!(into.total().input_tokens, 10);
    }

    #[tokio::test]
    async fn no_valuable_cases_returns_early() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = Arc::new(CorpusManager::new(dir.path()));
        let seed = TestCase::create_seed(0, "print(1)".into(), "".into());
        corpus.add_initial_testcase(seed).await.unwrap();

        let registry = CoverageRegistry::new();
        let clients = AgentClients {
            scheduler: fake(vec![empty_response()]),
            summarizer: fake(vec![empty_response()]),
            solver: fake(vec![empty_response()]),
            solver_reviewer: fake(vec![empty_response()]),
            summary_reviewer: fake(vec![empty_response()]),
        };
        let config = Config { out_dir: dir.path().to_path_buf(), ..Config::default() };
        let orchestrator = Orchestrator::new(corpus, registry, clients, config);

        let outcome = orchestrator.run_iteration().await.unwrap();
        assert_eq!(outcome, IterationOutcome::NoValuableCases);
    }
}
