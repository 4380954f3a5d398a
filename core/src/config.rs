//! Layered configuration: a TOML file on disk, overridable by `CONCOLIC_*`
//! environment variables, validated once at startup.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Recognized on-disk config encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfigFormat {
    Json,
    #[default]
    Toml,
    Yaml,
}

impl FromStr for ConfigFormat {
    type Err = ConfigError;

    fn from_str(ext: &str) -> Result<Self, Self::Err> {
        match ext.to_ascii_lowercase().as_str() {
            "json" => Ok(ConfigFormat::Json),
            "toml" => Ok(ConfigFormat::Toml),
            "yaml" | "yml" => Ok(ConfigFormat::Yaml),
            _ => Err(ConfigError::UnknownFormat {
                path: ext.to_string(),
            }),
        }
    }
}

/// Per-agent-role model selection, mirroring the reference codebase's
/// per-provider model config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSelectionConfig {
    pub provider: String,
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

fn default_temperature() -> f64 {
    0.7
}

fn scheduler_default() -> ModelSelectionConfig {
    ModelSelectionConfig {
        provider: "anthropic".to_string(),
        model: "claude-sonnet".to_string(),
        temperature: 0.2,
    }
}

fn agent_default() -> ModelSelectionConfig {
    ModelSelectionConfig {
        provider: "anthropic".to_string(),
        model: "claude-sonnet".to_string(),
        temperature: 0.7,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(default = "scheduler_default")]
    pub scheduler: ModelSelectionConfig,
    #[serde(default = "agent_default")]
    pub summarizer: ModelSelectionConfig,
    #[serde(default = "agent_default")]
    pub solver: ModelSelectionConfig,
    #[serde(default = "agent_default")]
    pub reviewer: ModelSelectionConfig,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            scheduler: scheduler_default(),
            summarizer: agent_default(),
            solver: agent_default(),
            reviewer: agent_default(),
        }
    }
}

/// Top-level engine configuration. See SPEC_FULL.md §10.3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Corpus root ("out_dir" in the spec).
    pub out_dir: PathBuf,
    /// Target-program root, immutable after startup.
    pub project_dir: PathBuf,

    #[serde(default = "default_target_timeout")]
    pub target_timeout_secs: u64,
    #[serde(default = "default_code_exec_timeout")]
    pub code_exec_timeout_secs: u64,
    #[serde(default = "default_smt_timeout")]
    pub smt_timeout_secs: u64,
    #[serde(default = "default_solution_smoke_timeout")]
    pub solution_smoke_timeout_secs: u64,

    #[serde(default = "default_max_code_request_attempts")]
    pub max_code_request_attempts: u32,
    #[serde(default = "default_scheduling_token_budget")]
    pub scheduling_token_budget: u64,
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token_estimate: f64,
    #[serde(default = "default_stderr_truncate_length")]
    pub stderr_truncate_length: usize,

    #[serde(default)]
    pub models: ModelsConfig,

    #[serde(default = "default_lock_retry_count")]
    pub lock_retry_count: u32,
    #[serde(default = "default_lock_retry_delay_ms")]
    pub lock_retry_delay_ms: u64,
}

fn default_target_timeout() -> u64 {
    3
}
fn default_code_exec_timeout() -> u64 {
    10
}
fn default_smt_timeout() -> u64 {
    10
}
fn default_solution_smoke_timeout() -> u64 {
    2
}
fn default_max_code_request_attempts() -> u32 {
    10
}
fn default_scheduling_token_budget() -> u64 {
    180_000
}
fn default_chars_per_token() -> f64 {
    3.5
}
fn default_stderr_truncate_length() -> usize {
    10_000
}
fn default_lock_retry_count() -> u32 {
    3
}
fn default_lock_retry_delay_ms() -> u64 {
    100
}

impl Default for Config {
    fn default() -> Self {
        Self {
            out_dir: PathBuf::from("./out"),
            project_dir: PathBuf::from("."),
            target_timeout_secs: default_target_timeout(),
            code_exec_timeout_secs: default_code_exec_timeout(),
            smt_timeout_secs: default_smt_timeout(),
            solution_smoke_timeout_secs: default_solution_smoke_timeout(),
            max_code_request_attempts: default_max_code_request_attempts(),
            scheduling_token_budget: default_scheduling_token_budget(),
            chars_per_token_estimate: default_chars_per_token(),
            stderr_truncate_length: default_stderr_truncate_length(),
            models: ModelsConfig::default(),
            lock_retry_count: default_lock_retry_count(),
            lock_retry_delay_ms: default_lock_retry_delay_ms(),
        }
    }
}

impl Config {
    /// Validate cross-field constraints not expressible via serde defaults.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_code_request_attempts == 0 {
            return Err(ConfigError::Validation(
                "max_code_request_attempts must be > 0".into(),
            ));
        }
        if self.scheduling_token_budget == 0 {
            return Err(ConfigError::Validation(
                "scheduling_token_budget must be > 0".into(),
            ));
        }
        if self.chars_per_token_estimate <= 0.0 {
            return Err(ConfigError::Validation(
                "chars_per_token_estimate must be > 0".into(),
            ));
        }
        for (role, m) in [
            ("scheduler", &self.models.scheduler),
            ("summarizer", &self.models.summarizer),
            ("solver", &self.models.solver),
            ("reviewer", &self.models.reviewer),
        ] {
            if m.model.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "models.{role}.model must not be empty"
                )));
            }
            if !(0.0..=2.0).contains(&m.temperature) {
                return Err(ConfigError::Validation(format!(
                    "models.{role}.temperature out of range [0, 2]"
                )));
            }
        }
        Ok(())
    }
}

/// Loads, merges, and validates [`Config`] from a file plus environment.
pub struct ConfigManager {
    path: PathBuf,
    format: ConfigFormat,
}

impl ConfigManager {
    pub fn new() -> Self {
        Self::with_path(PathBuf::from("concolic.toml"))
    }

    pub fn with_path(path: PathBuf) -> Self {
        let format = Self::detect_format(&path);
        Self { path, format }
    }

    fn detect_format(path: &Path) -> ConfigFormat {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(|e| ConfigFormat::from_str(e).ok())
            .unwrap_or_default()
    }

    /// Load the config file if present, apply env overrides, validate.
    pub fn load(&self) -> Result<Config, ConfigError> {
        let mut config = if self.path.exists() {
            self.load_from_disk()?
        } else {
            Config::default()
        };
        self.apply_env_overrides(&mut config);
        config.validate()?;
        Ok(config)
    }

    fn load_from_disk(&self) -> Result<Config, ConfigError> {
        let text = std::fs::read_to_string(&self.path).map_err(|source| ConfigError::Read {
            path: self.path.display().to_string(),
            source,
        })?;
        match self.format {
            ConfigFormat::Toml => toml::from_str(&text).map_err(|e| ConfigError::Parse {
                path: self.path.display().to_string(),
                format: "toml".into(),
                reason: e.to_string(),
            }),
            ConfigFormat::Json => {
                serde_json::from_str(&text).map_err(|e| ConfigError::Parse {
                    path: self.path.display().to_string(),
                    format: "json".into(),
                    reason: e.to_string(),
                })
            }
            ConfigFormat::Yaml => {
                serde_yaml::from_str(&text).map_err(|e| ConfigError::Parse {
                    path: self.path.display().to_string(),
                    format: "yaml".into(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// `CONCOLIC_OUT_DIR` / `CONCOLIC_PROJECT_DIR` / `CONCOLIC_TARGET_TIMEOUT_SECS`.
    fn apply_env_overrides(&self, config: &mut Config) {
        let env: HashMap<String, String> = std::env::vars().collect();
        if let Some(v) = env.get("CONCOLIC_OUT_DIR") {
            config.out_dir = PathBuf::from(v);
        }
        if let Some(v) = env.get("CONCOLIC_PROJECT_DIR") {
            config.project_dir = PathBuf::from(v);
        }
        if let Some(v) = env.get("CONCOLIC_TARGET_TIMEOUT_SECS") {
            if let Ok(n) = v.parse() {
                config.target_timeout_secs = n;
            }
        }
        if let Some(v) = env.get("CONCOLIC_SCHEDULING_TOKEN_BUDGET") {
            if let Ok(n) = v.parse() {
                config.scheduling_token_budget = n;
            }
        }
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn zero_budget_rejected() {
        let mut c = Config::default();
        c.scheduling_token_budget = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = ConfigManager::with_path(dir.path().join("nope.toml"));
        let config = mgr.load().unwrap();
        assert_eq!(config.out_dir, PathBuf::from("./out"));
    }

    #[test]
    fn load_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("concolic.toml");
        std::fs::write(
            &path,
            r#"
            out_dir = "/tmp/out"
            project_dir = "/tmp/proj"
            target_timeout_secs = 7
            "#,
        )
        .unwrap();
        let mgr = ConfigManager::with_path(path);
        let config = mgr.load().unwrap();
        assert_eq!(config.target_timeout_secs, 7);
        assert_eq!(config.out_dir, PathBuf::from("/tmp/out"));
    }

    #[test]
    fn env_override_wins() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = ConfigManager::with_path(dir.path().join("nope.toml"));
        std::env::set_var("CONCOLIC_OUT_DIR", "/tmp/env-out");
        let config = mgr.load().unwrap();
        std::env::remove_var("CONCOLIC_OUT_DIR");
        assert_eq!(config.out_dir, PathBuf::from("/tmp/env-out"));
    }
}
