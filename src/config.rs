//! Config loader: one YAML document, read once at startup.
//!
//! Grounded in `original_source/aggregator/aggregator.py`'s
//! `import_yaml`/`cfg['system']['N']` style, reimplemented with
//! `serde_yaml` (the pack's own choice — see `ChainSafe-forest`'s
//! `workspace.dependencies.serde_yaml = "0.9"`) instead of hand-parsing.

#![forbid(unsafe_code)]

use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config file {path}: {source}")]
    Io { path: String, #[source] source: std::io::Error },
    #[error("parsing config file {path}: {source}")]
    Parse { path: String, #[source] source: serde_yaml::Error },
    #[error("invalid config: R ({r}) must satisfy 1 <= R <= N ({n})")]
    BadThreshold { r: usize, n: usize },
    #[error("invalid config: cycle_deadline_ms must be positive")]
    BadDeadline,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemConfig {
    /// Worker cohort size.
    pub n: usize,
    /// Decoding threshold (`R <= N`).
    pub r: usize,
    /// Cycle deadline in milliseconds, from task dispatch to decode deadline.
    #[serde(default = "default_deadline_ms")]
    pub cycle_deadline_ms: u64,
}

fn default_deadline_ms() -> u64 {
    500
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_bind_host")]
    pub bind_host: String,
    #[serde(default = "default_bind_port")]
    pub bind_port: u16,
    pub worker_port_start: u16,
}

fn default_bind_host() -> String {
    "127.0.0.1".to_string()
}

fn default_bind_port() -> u16 {
    6000
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub system: SystemConfig,
    pub transport: TransportConfig,
    #[serde(default = "default_authorized_keys_path")]
    pub authorized_keys_path: String,
    #[serde(default = "default_proposed_state_path")]
    pub proposed_state_path: String,
    #[serde(default = "default_metrics_path")]
    pub metrics_path: String,
    /// Optional RNG seed for the coder's coefficient draws (reproducible
    /// test schedules); `None` falls back to OS entropy.
    #[serde(default)]
    pub coeff_rng_seed: Option<u64>,
}

fn default_authorized_keys_path() -> String {
    "authorized_keys.txt".to_string()
}

fn default_proposed_state_path() -> String {
    "proposed_state.json".to_string()
}

fn default_metrics_path() -> String {
    "metrics.csv".to_string()
}

impl Config {
    /// Load and validate configuration from a YAML file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let text = fs::read_to_string(path_ref)
            .map_err(|e| ConfigError::Io { path: path_ref.display().to_string(), source: e })?;
        let cfg: Config = serde_yaml::from_str(&text)
            .map_err(|e| ConfigError::Parse { path: path_ref.display().to_string(), source: e })?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.system.r == 0 || self.system.r > self.system.n {
            return Err(ConfigError::BadThreshold { r: self.system.r, n: self.system.n });
        }
        if self.system.cycle_deadline_ms == 0 {
            return Err(ConfigError::BadDeadline);
        }
        Ok(())
    }
}
