//! `concolic stats`: prints aggregate corpus statistics.

use std::path::Path;

use anyhow::Context;
use concolic_core::{ConfigManager, CorpusManager};

pub async fn stats(config_path: &Path) -> anyhow::Result<()> {
    let config = ConfigManager::with_path(config_path.to_path_buf())
        .load()
        .context("loading configuration")?;

    let corpus = CorpusManager::new(config.out_dir.clone());
    corpus
        .load_testcases()
        .await
        .context("loading corpus from disk")?;

    let stats = corpus.statistics().await;
    println!("reach_success:              {}", stats.reach_success);
    println!("reach_failure:              {}", stats.reach_failure);
    println!("unsatisfiable_constraints:  {}", stats.unsatisfiable_constraints);
    println!("new_coverage:               {}", stats.new_coverage);
    println!("crashes:                    {}", stats.crashes);
    println!("hangs:                      {}", stats.hangs);
    Ok(())
}
