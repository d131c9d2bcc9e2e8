//! Configuration management for Chainhub.
//!
//! This module defines the structure of the optional `chainhub.toml`
//! configuration file and provides functionality to load and parse it.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "chainhub.toml";

/// Top-level configuration structure corresponding to `chainhub.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Data directory holding `Shells/`, `Chains/` and `Settings/`.
    pub root: Option<String>,
    /// Upper bound for the `--version` probe during shell detection.
    pub probe_timeout_ms: Option<u64>,
    /// Default log filter when neither `--verbose` nor `RUST_LOG` is set.
    pub log_level: Option<String>,
}

/// Loads and parses the configuration from a file path.
pub fn load_config(path: &Path) -> Result<Config> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: Config = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(config)
}
