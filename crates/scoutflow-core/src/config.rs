//! Scoutflow configuration
//!
//! All tunable parameters in one place. Loaded from TOML at startup,
//! falls back to defaults if no config file exists.

use crate::types::{Budget, Capability};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ScoutflowConfig {
    /// Where sessions and artifacts live.
    pub store: StoreConfig,
    /// Stage sequencing, retries, timeouts.
    pub pipeline: PipelineConfig,
    /// Per-dispatch call ceilings, per capability.
    pub budgets: BudgetConfig,
    /// Location analysis parameters.
    pub enrichment: EnrichmentConfig,
    /// HTTP request surface.
    pub gateway: GatewayConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Fs,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Root directory for the fs backend. Sessions live in `{root}/{session_id}/`.
    pub root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Dispatch attempts per stage assignment before the stage is degraded.
    pub max_attempts: u32,
    /// Upper bound for one worker dispatch.
    pub worker_timeout_secs: u64,
    /// Upper bound for one capability call.
    pub capability_timeout_secs: u64,
    /// Collection holding the primary entities of a report.
    pub entity_collection: String,
    /// Resolve a review with zero candidates without suspending.
    pub skip_empty_review: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub search: u32,
    pub extract: u32,
    pub geocode: u32,
    pub nearby: u32,
    pub image_generation: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    /// POI categories queried around every approved entity.
    pub categories: Vec<String>,
    pub radius_meters: u32,
    pub per_category_limit: usize,
    /// Amenities closer than this count as "nearby" in pros/cons.
    pub walking_distance_meters: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub bind: String,
    pub port: u16,
}

// ============================================================
// Defaults
// ============================================================

pub fn default_root() -> PathBuf {
    std::env::var("SCOUTFLOW_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir().join("scoutflow"))
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Fs,
            root: default_root(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            worker_timeout_secs: 120,
            capability_timeout_secs: 30,
            entity_collection: "properties".into(),
            skip_empty_review: true,
        }
    }
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            search: 3,
            extract: 3,
            geocode: 20,
            nearby: 160,
            image_generation: 10,
        }
    }
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            categories: [
                "restaurant",
                "cafe",
                "park",
                "shopping",
                "transit_station",
                "school",
                "hospital",
                "gym",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            radius_meters: 5_000,
            per_category_limit: 10,
            walking_distance_meters: 1_000.0,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 18790,
        }
    }
}

// ============================================================
// Loading
// ============================================================

impl ScoutflowConfig {
    /// Load config from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}, using defaults", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!("No config at {}, using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Strict variant: a present but invalid file is an error.
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content).map_err(|e| crate::Error::ConfigError(e.to_string()))
    }

    /// Write the current config as TOML (for generating a default config file).
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}

impl BudgetConfig {
    pub fn limit(&self, capability: Capability) -> u32 {
        match capability {
            Capability::Search => self.search,
            Capability::Extract => self.extract,
            Capability::Geocode => self.geocode,
            Capability::Nearby => self.nearby,
            Capability::ImageGeneration => self.image_generation,
        }
    }

    /// Budget covering the given capabilities with the configured ceilings.
    pub fn budget_for(&self, capabilities: &[Capability]) -> Budget {
        capabilities
            .iter()
            .fold(Budget::new(), |b, c| b.with(*c, self.limit(*c)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = ScoutflowConfig::default();
        assert_eq!(c.pipeline.max_attempts, 3);
        assert_eq!(c.pipeline.entity_collection, "properties");
        assert_eq!(c.enrichment.categories.len(), 8);
        assert_eq!(c.enrichment.radius_meters, 5_000);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let c = ScoutflowConfig::from_toml("[pipeline]\nmax_attempts = 5\n\n[budgets]\nsearch = 1\n").unwrap();
        assert_eq!(c.pipeline.max_attempts, 5);
        assert_eq!(c.pipeline.worker_timeout_secs, 120);
        assert_eq!(c.budgets.search, 1);
        assert_eq!(c.budgets.extract, 3);
    }

    #[test]
    fn invalid_toml_is_config_error() {
        let err = ScoutflowConfig::from_toml("[pipeline\n").unwrap_err();
        assert!(matches!(err, crate::Error::ConfigError(_)));
    }

    #[test]
    fn missing_file_falls_back() {
        let c = ScoutflowConfig::load(Path::new("/nonexistent/scoutflow.toml"));
        assert_eq!(c.pipeline.max_attempts, 3);
    }

    #[test]
    fn budget_for_selected_capabilities() {
        let b = BudgetConfig::default().budget_for(&[Capability::Search, Capability::Extract]);
        assert_eq!(b.limit(Capability::Search), 3);
        assert_eq!(b.limit(Capability::Geocode), 0);
    }
}
