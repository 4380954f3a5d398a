//! `concolic run`: loads config and corpus, then drives generation
//! iterations until the scheduler finds nothing valuable left to branch
//! from, or the process is interrupted.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use concolic_agents::{AgentClients, HttpLlmClient, IterationOutcome, LlmClient, Orchestrator};
use concolic_core::{Config, ConfigManager, CorpusManager};
use concolic_trace::CoverageRegistry;
use tracing::info;

pub async fn run(config_path: &Path) -> anyhow::Result<()> {
    let config = ConfigManager::with_path(config_path.to_path_buf())
        .load()
        .context("loading configuration")?;

    let corpus = Arc::new(
        CorpusManager::new(config.out_dir.clone())
            .with_retry_policy(config.lock_retry_count, config.lock_retry_delay_ms),
    );
    corpus
        .load_testcases()
        .await
        .context("loading corpus from disk")?;

    let registry = CoverageRegistry::new();
    let coverage_path = config.out_dir.join("coverage.bin");
    if coverage_path.exists() {
        registry
            .load(&coverage_path)
            .await
            .context("loading coverage snapshot")?;
    }

    let clients = build_clients(&config);
    let orchestrator = Orchestrator::new(Arc::clone(&corpus), Arc::clone(&registry), clients, config.clone());

    let mut iterations = 0u64;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received interrupt, stopping after current iteration");
                break;
            }
            outcome = orchestrator.run_iteration() => {
                match outcome.context("generation iteration failed")? {
                    IterationOutcome::NoValuableCases => {
                        info!(iterations, "no more valuable test cases; stopping");
                        break;
                    }
                    IterationOutcome::Completed { children_spawned } => {
                        iterations += 1;
                        info!(iterations, children_spawned, "iteration complete");
                    }
                }
            }
        }
    }

    registry
        .save(coverage_path)
        .await
        .context("persisting coverage snapshot")?;
    registry.wait_for_save().await;

    let stats = corpus.statistics().await;
    info!(
        reach_success = stats.reach_success,
        reach_failure = stats.reach_failure,
        crashes = stats.crashes,
        hangs = stats.hangs,
        "run finished"
    );
    Ok(())
}

/// Builds one client per agent role from `CONCOLIC_API_BASE_URL` /
/// `CONCOLIC_API_KEY` and each role's configured model name. The two
/// reviewer roles share the `models.reviewer` selection.
fn build_clients(config: &Config) -> AgentClients {
    let base_url = std::env::var("CONCOLIC_API_BASE_URL")
        .unwrap_or_else(|_| "https://api.anthropic.com/v1".to_string());
    let api_key = std::env::var("CONCOLIC_API_KEY").ok();
    let client_for =
        |model: &str| LlmClient::Http(HttpLlmClient::new(base_url.clone(), model.to_string(), api_key.clone()));

    AgentClients {
        scheduler: client_for(&config.models.scheduler.model),
        summarizer: client_for(&config.models.summarizer.model),
        solver: client_for(&config.models.solver.model),
        solver_reviewer: client_for(&config.models.reviewer.model),
        summary_reviewer: client_for(&config.models.reviewer.model),
    }
}
