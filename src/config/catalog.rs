use std::{collections::BTreeMap, time::Duration};

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::{
    catalog::{DEFAULT_BATCH_SIZE, DEFAULT_FRESHNESS_DAYS},
    models::CatalogKind,
};

/// Catalog refresh configuration.
///
/// ```toml
/// [catalog]
/// check_interval_secs = 300
///
/// [catalog.sources.volumes]
/// path = "/var/lib/rightsizer/ebs-prices.csv"
/// skip_lines = 5
/// freshness_days = 30
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogConfig {
    /// How often each refresh loop checks whether its catalog is stale.
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,

    /// Pause before a refresh loop resumes after a panicked cycle.
    #[serde(default = "default_restart_cooldown")]
    pub restart_cooldown_secs: u64,

    /// Rows inserted per batch while populating a new table.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Upstream data per catalog kind. Kinds without a source are never refreshed.
    #[serde(default)]
    pub sources: BTreeMap<CatalogKind, CatalogSourceConfig>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval(),
            restart_cooldown_secs: default_restart_cooldown(),
            batch_size: default_batch_size(),
            sources: BTreeMap::new(),
        }
    }
}

impl CatalogConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn restart_cooldown(&self) -> Duration {
        Duration::from_secs(self.restart_cooldown_secs)
    }

    /// Enabled sources, in catalog kind order.
    pub fn enabled_sources(&self) -> impl Iterator<Item = (CatalogKind, &CatalogSourceConfig)> {
        self.sources
            .iter()
            .filter(|(_, source)| source.enabled)
            .map(|(kind, source)| (*kind, source))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.check_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "catalog.check_interval_secs must be greater than 0".into(),
            ));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Validation(
                "catalog.batch_size must be greater than 0".into(),
            ));
        }
        for (kind, source) in &self.sources {
            if source.path.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "catalog.sources.{kind}.path cannot be empty"
                )));
            }
            if source.freshness_days < 0 {
                return Err(ConfigError::Validation(format!(
                    "catalog.sources.{kind}.freshness_days cannot be negative"
                )));
            }
        }
        Ok(())
    }
}

/// Where one catalog's upstream price list lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogSourceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Price-list CSV export.
    pub path: String,

    /// Metadata lines before the CSV header.
    #[serde(default)]
    pub skip_lines: usize,

    /// A catalog younger than this is not refreshed.
    #[serde(default = "default_freshness_days")]
    pub freshness_days: i64,
}

fn default_check_interval() -> u64 {
    300
}

fn default_restart_cooldown() -> u64 {
    60
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_freshness_days() -> i64 {
    DEFAULT_FRESHNESS_DAYS
}

fn default_true() -> bool {
    true
}
