use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::budget::BudgetConfig;
use crate::error::{PbsError, Result};

/// Claimed identity of the remote coordinator, used for metric labelling.
pub const REMOTE_CLAIMED_IDENTITY_KEY: &str = "google_scp_pbs_remote_claimed_identity";

pub trait ConfigProvider: Send + Sync {
    fn get(&self, key: &str) -> Result<String>;
}

impl ConfigProvider for BTreeMap<String, String> {
    fn get(&self, key: &str) -> Result<String> {
        BTreeMap::get(self, key)
            .cloned()
            .ok_or_else(|| PbsError::ConfigKeyNotFound {
                key: key.to_string(),
            })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FrontEndConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub prometheus: bool,
    #[serde(default = "default_max_series")]
    pub max_series: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            prometheus: false,
            max_series: default_max_series(),
        }
    }
}

impl Default for FrontEndConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            settings: BTreeMap::new(),
            max_body_bytes: default_max_body_bytes(),
            budget: BudgetConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_max_body_bytes() -> usize {
    8 * 1024 * 1024
}

fn default_max_series() -> usize {
    1024
}

impl FrontEndConfig {
    /// Loads a config file; the format follows the extension (`.toml`,
    /// `.yaml`/`.yml` with the `config-yaml` feature, JSON otherwise).
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        let config: Self = match extension.as_deref() {
            Some("toml") => toml::from_str(&raw)?,
            Some("yaml" | "yml") => parse_yaml(&raw)?,
            _ => serde_json::from_str(&raw)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_body_bytes == 0 {
            return Err(PbsError::InvalidConfig(
                "max_body_bytes must be positive".to_string(),
            ));
        }
        if self.budget.tokens_per_time_bucket == 0 {
            return Err(PbsError::InvalidConfig(
                "budget.tokens_per_time_bucket must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(feature = "config-yaml")]
fn parse_yaml(raw: &str) -> Result<FrontEndConfig> {
    Ok(serde_yaml::from_str(raw)?)
}

#[cfg(not(feature = "config-yaml"))]
fn parse_yaml(_raw: &str) -> Result<FrontEndConfig> {
    Err(PbsError::InvalidConfig(
        "yaml config requires the config-yaml feature".to_string(),
    ))
}

/// Settings table first, then the process environment under the upper-cased key.
impl ConfigProvider for FrontEndConfig {
    fn get(&self, key: &str) -> Result<String> {
        if let Some(value) = self.settings.get(key) {
            return Ok(value.clone());
        }
        std::env::var(key.to_ascii_uppercase())
            .ok()
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| PbsError::ConfigKeyNotFound {
                key: key.to_string(),
            })
    }
}
