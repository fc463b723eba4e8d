//! Build an orchestrator from configuration.

use scoutflow_core::config::StoreBackend;
use scoutflow_core::ScoutflowConfig;
use scoutflow_engine::{
    ArtifactStore, CapabilitySet, FsSessionStore, LocalFsStore, MemoryStore, Orchestrator, SessionRegistry,
};
use scoutflow_gateway::CriteriaCheck;
use scoutflow_workers::{default_pipeline, FixtureCapabilities, SearchCriteria};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

pub const CONFIG_ENV: &str = "SCOUTFLOW_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "scoutflow.toml";

/// `--config`, then `$SCOUTFLOW_CONFIG`, then `./scoutflow.toml`.
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(PathBuf::from)
        .or_else(|| std::env::var(CONFIG_ENV).ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

pub fn load_config(explicit: Option<&Path>) -> ScoutflowConfig {
    ScoutflowConfig::load(&resolve_config_path(explicit))
}

/// Orchestrator over the configured store, serving capabilities from
/// `fixtures` when given.
pub async fn build_orchestrator(config: &ScoutflowConfig, fixtures: Option<&Path>) -> anyhow::Result<Orchestrator> {
    let (sessions, store): (SessionRegistry, Arc<dyn ArtifactStore>) = match config.store.backend {
        StoreBackend::Fs => {
            let root = &config.store.root;
            tokio::fs::create_dir_all(root).await?;
            info!(root = %root.display(), "Using filesystem store");
            (
                SessionRegistry::new(Arc::new(FsSessionStore::new(root))),
                Arc::new(LocalFsStore::new(root)),
            )
        }
        StoreBackend::Memory => {
            info!("Using in-memory store");
            (SessionRegistry::in_memory(), Arc::new(MemoryStore::new()))
        }
    };

    let capabilities = match fixtures {
        Some(path) => FixtureCapabilities::load(path).await?.into_capability_set(),
        None => {
            warn!("No capability providers configured; every dispatch stage will degrade");
            CapabilitySet::new()
        }
    };

    let pipeline = default_pipeline(config)?;
    Ok(Orchestrator::new(
        Arc::new(sessions),
        store,
        Arc::new(capabilities),
        pipeline,
        config,
    ))
}

/// Gateway-side validation of research criteria.
pub fn criteria_check() -> CriteriaCheck {
    Arc::new(|criteria: &Value| SearchCriteria::from_value(criteria).map(|_| ()))
}
