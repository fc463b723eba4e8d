//! Worker interface and registry.
//!
//! A worker receives a `WorkItem`, performs bounded capability calls and
//! persists every entity it keeps as one artifact before returning. The
//! returned `Summary` is advisory only.

use crate::capability::BudgetedCapabilities;
use crate::store::SessionArtifacts;
use scoutflow_core::{Capability, Error, Result, SessionId, Summary, WorkItem};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Everything a dispatched worker may touch.
pub struct WorkerContext {
    worker: String,
    artifacts: SessionArtifacts,
    capabilities: BudgetedCapabilities,
}

impl WorkerContext {
    pub fn new(worker: impl Into<String>, artifacts: SessionArtifacts, capabilities: BudgetedCapabilities) -> Self {
        Self {
            worker: worker.into(),
            artifacts,
            capabilities,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        self.artifacts.session()
    }

    /// Session-scoped artifact store.
    pub fn artifacts(&self) -> &SessionArtifacts {
        &self.artifacts
    }

    /// Budget-metered capability gateway for this dispatch.
    pub fn capabilities(&self) -> &BudgetedCapabilities {
        &self.capabilities
    }

    /// Append a line to the session transcript under this worker's name.
    pub async fn note(&self, text: impl Into<String>) -> Result<()> {
        self.artifacts.note(&self.worker, text).await
    }
}

/// Implement this to add a pipeline worker.
#[async_trait::async_trait]
pub trait Worker: Send + Sync {
    /// Unique worker name (e.g. "property_search").
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Capabilities this worker needs; the work item grants at most these.
    fn capabilities(&self) -> BTreeSet<Capability>;

    async fn dispatch(&self, item: &WorkItem, ctx: &WorkerContext) -> Result<Summary>;
}

/// Rewrites criteria before a re-dispatch.
pub trait CriteriaAdjuster: Send + Sync {
    fn adjust(&self, criteria: &Value, attempt: u32) -> Value;
}

/// Default adjuster: leaves criteria as they are apart from an `attempt`
/// annotation on object criteria.
pub struct AnnotateAttempt;

impl CriteriaAdjuster for AnnotateAttempt {
    fn adjust(&self, criteria: &Value, attempt: u32) -> Value {
        let mut out = criteria.clone();
        if let Some(obj) = out.as_object_mut() {
            obj.insert("attempt".into(), Value::from(attempt));
        }
        out
    }
}

#[derive(Default)]
pub struct WorkerRegistry {
    workers: HashMap<String, Arc<dyn Worker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker. Replaces any existing worker with the same name.
    pub fn register(&mut self, worker: impl Worker + 'static) {
        self.register_arc(Arc::new(worker));
    }

    pub fn register_arc(&mut self, worker: Arc<dyn Worker>) {
        self.workers.insert(worker.name().to_string(), worker);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Worker>> {
        self.workers.get(name).cloned()
    }

    /// Resolve an ordered list of names, failing on the first unknown one.
    pub fn resolve(&self, names: &[&str]) -> Result<Vec<Arc<dyn Worker>>> {
        names
            .iter()
            .map(|n| {
                self.get(n)
                    .ok_or_else(|| Error::Internal(format!("worker not registered: {}", n)))
            })
            .collect()
    }

    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.workers.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}
