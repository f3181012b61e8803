//! Configuration management for loom-sync
//!
//! Handles loading and validating the YAML configuration file. Every field
//! has a default, so an empty or missing file yields a working setup.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tracing::warn;

use crate::hardware::SimulationConfig;
use crate::mirror::DEFAULT_NAMESPACE;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub store: StoreConfig,
    /// Seconds between heartbeat re-assertions
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub draft: DraftConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            keep_alive_secs: default_keep_alive_secs(),
            simulation: SimulationConfig::default(),
            draft: DraftConfig::default(),
        }
    }
}

/// Remote store configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    /// Root every path lives under
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// JSON snapshot restored on start and written on shutdown
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_path: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            snapshot_path: None,
        }
    }
}

/// Draft played by the bench draft player
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DraftConfig {
    /// Rows as bit text, e.g. "1010"
    #[serde(default)]
    pub rows: Vec<String>,
    /// Start over after the last row instead of deactivating
    #[serde(default)]
    pub repeat: bool,
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: AppConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML config: {}", path))?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration, falling back to defaults when the file is absent
    pub async fn load_or_default(path: &str) -> Result<Self> {
        if !Path::new(path).exists() {
            warn!("Config file {} not found, using defaults", path);
            return Ok(Self::default());
        }
        Self::load(path).await
    }

    /// Save configuration to file
    pub async fn save(&self, path: &str) -> Result<()> {
        let yaml = serde_yaml::to_string(self).context("Failed to serialize config to YAML")?;

        fs::write(path, yaml)
            .await
            .with_context(|| format!("Failed to write config file: {}", path))?;

        Ok(())
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<()> {
        if self.store.namespace.trim_matches('/').is_empty() {
            anyhow::bail!("store.namespace cannot be empty");
        }
        if self.keep_alive_secs == 0 {
            anyhow::bail!("keep_alive_secs must be at least 1");
        }

        for (idx, row) in self.draft.rows.iter().enumerate() {
            if row.is_empty() {
                anyhow::bail!("draft row {} is empty", idx);
            }
            // Decoding is permissive; flag typos early
            if row.chars().any(|c| c != '0' && c != '1') {
                warn!(row = %row, "Draft row {} has characters other than 0/1, they weave as lowered", idx);
            }
        }

        Ok(())
    }
}

fn default_keep_alive_secs() -> u64 { 10 }
fn default_namespace() -> String { DEFAULT_NAMESPACE.to_string() }
