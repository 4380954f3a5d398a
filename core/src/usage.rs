//! Cost/usage accounting (SPEC_FULL.md §4.6).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// The aggregate bucket every usage map carries in addition to per-tool ones.
pub const TOTAL_BUCKET: &str = "TOTAL";

/// A single usage record, matching the fields an `LlmClient` response carries
/// (SPEC_FULL.md §6.2).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
    pub cost_usd: f64,
    pub latency_ms: u64,
    pub call_cnt: u64,
}

impl Usage {
    pub fn input_only(input_tokens: u64) -> Self {
        Self {
            input_tokens,
            call_cnt: 0,
            ..Default::default()
        }
    }

    pub fn output_only(output_tokens: u64, cost_usd: f64, latency_ms: u64) -> Self {
        Self {
            output_tokens,
            cost_usd,
            latency_ms,
            call_cnt: 1,
            ..Default::default()
        }
    }

    pub fn add_assign(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_read_tokens += other.cache_read_tokens;
        self.cache_write_tokens += other.cache_write_tokens;
        self.cost_usd += other.cost_usd;
        self.latency_ms += other.latency_ms;
        self.call_cnt += other.call_cnt;
    }
}

/// Bucketed usage map keyed by tool/state label, always containing
/// [`TOTAL_BUCKET`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageMap(pub HashMap<String, Usage>);

impl UsageMap {
    pub fn new() -> Self {
        let mut map = HashMap::new();
        map.insert(TOTAL_BUCKET.to_string(), Usage::default());
        Self(map)
    }

    /// Attribute `usage` to each of `labels`, and fold it into `TOTAL`.
    pub fn record(&mut self, labels: &[&str], usage: Usage) {
        for label in labels {
            self.0
                .entry((*label).to_string())
                .or_default()
                .add_assign(&usage);
        }
        self.0
            .entry(TOTAL_BUCKET.to_string())
            .or_default()
            .add_assign(&usage);
    }

    pub fn get(&self, label: &str) -> Usage {
        self.0.get(label).copied().unwrap_or_default()
    }

    pub fn total(&self) -> Usage {
        self.get(TOTAL_BUCKET)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_accumulates_across_buckets() {
        let mut map = UsageMap::new();
        map.record(&["SUMMARIZE"], Usage::input_only(100));
        map.record(&["SUMMARIZE"], Usage::output_only(50, 0.01, 200));
        map.record(&["SOLVE"], Usage::output_only(25, 0.005, 100));

        assert_eq!(map.get("SUMMARIZE").input_tokens, 100);
        assert_eq!(map.get("SUMMARIZE").output_tokens, 50);
        assert_eq!(map.total().output_tokens, 75);
        assert_eq!(map.total().call_cnt, 2);
    }

    #[test]
    fn batch_attributes_to_multiple_labels() {
        let mut map = UsageMap::new();
        map.record(
            &["select_target_branch", "generate_path_constraint"],
            Usage::input_only(40),
        );
        assert_eq!(map.get("select_target_branch").input_tokens, 40);
        assert_eq!(map.get("generate_path_constraint").input_tokens, 40);
        assert_eq!(map.total().input_tokens, 80);
    }
}
