//! Budgeted retry policy at the worker boundary.
//!
//! One assignment = an ordered list of interchangeable workers writing one
//! output collection. Usability is judged from the store, never from the
//! worker's summary.

use crate::capability::{BudgetedCapabilities, CapabilitySet};
use crate::store::{ArtifactStore, SessionArtifacts};
use crate::worker::{CriteriaAdjuster, Worker, WorkerContext};
use scoutflow_core::config::{BudgetConfig, PipelineConfig};
use scoutflow_core::{ArtifactPath, Capability, Result, SessionId, WorkItem};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Clone)]
pub struct StageAssignment {
    pub output_collection: String,
    /// Primary first, then fallbacks.
    pub workers: Vec<Arc<dyn Worker>>,
    /// An empty result is accepted without retry and never degrades the stage.
    pub optional: bool,
}

impl StageAssignment {
    pub fn new(output_collection: impl Into<String>, workers: Vec<Arc<dyn Worker>>) -> Self {
        Self {
            output_collection: output_collection.into(),
            workers,
            optional: false,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

/// How an assignment went.
#[derive(Clone, Debug, Default)]
pub struct DispatchReport {
    pub usable: bool,
    pub attempts: u32,
    pub reasons: Vec<String>,
    pub summaries: Vec<String>,
}

pub struct Dispatcher {
    store: Arc<dyn ArtifactStore>,
    providers: Arc<CapabilitySet>,
    budgets: BudgetConfig,
    max_attempts: u32,
    worker_timeout: Duration,
    capability_timeout: Duration,
}

type Snapshot = BTreeMap<ArtifactPath, Value>;

impl Dispatcher {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        providers: Arc<CapabilitySet>,
        pipeline: &PipelineConfig,
        budgets: BudgetConfig,
    ) -> Self {
        Self {
            store,
            providers,
            budgets,
            max_attempts: pipeline.max_attempts.max(1),
            worker_timeout: Duration::from_secs(pipeline.worker_timeout_secs),
            capability_timeout: Duration::from_secs(pipeline.capability_timeout_secs),
        }
    }

    pub fn with_timeouts(mut self, worker: Duration, capability: Duration) -> Self {
        self.worker_timeout = worker;
        self.capability_timeout = capability;
        self
    }

    async fn snapshot(&self, session: &SessionId, collection: &str) -> Result<Snapshot> {
        Ok(self
            .store
            .list(session, Some(collection))
            .await?
            .into_iter()
            .map(|a| (a.path, a.payload))
            .collect())
    }

    /// Run one assignment until a dispatch gains or rewrites at least one
    /// artifact in the output collection, or attempts/workers run out.
    /// Worker failures are absorbed into the report; only store errors
    /// propagate.
    pub async fn run(
        &self,
        session: &SessionId,
        stage: &str,
        assignment: &StageAssignment,
        criteria: &Value,
        adjuster: &dyn CriteriaAdjuster,
    ) -> Result<DispatchReport> {
        let collection = assignment.output_collection.as_str();
        let mut report = DispatchReport::default();
        let mut idx = 0usize;

        while report.attempts < self.max_attempts && idx < assignment.workers.len() {
            report.attempts += 1;
            let attempt = report.attempts;
            let worker = &assignment.workers[idx];
            let capabilities = worker.capabilities();
            let wanted: Vec<Capability> = capabilities.iter().copied().collect();
            let item = WorkItem {
                stage: stage.to_string(),
                criteria: if attempt == 1 {
                    criteria.clone()
                } else {
                    adjuster.adjust(criteria, attempt)
                },
                budget: self.budgets.budget_for(&wanted),
                capabilities: capabilities.clone(),
                attempt,
            };
            let ctx = WorkerContext::new(
                worker.name(),
                SessionArtifacts::new(self.store.clone(), session.clone()),
                BudgetedCapabilities::new(
                    self.providers.clone(),
                    capabilities,
                    item.budget.clone(),
                    self.capability_timeout,
                ),
            );

            info!(session = %session, stage, worker = worker.name(), attempt, "dispatching worker");
            let before = self.snapshot(session, collection).await?;
            let result = tokio::time::timeout(self.worker_timeout, worker.dispatch(&item, &ctx)).await;
            let after = self.snapshot(session, collection).await?;

            match result {
                Ok(Ok(summary)) => {
                    report.summaries.push(format!("{}: {}", worker.name(), summary.message));
                    let changed = after.iter().any(|(path, payload)| before.get(path) != Some(payload));
                    if changed {
                        info!(session = %session, stage, worker = worker.name(), attempt, artifacts = after.len(), "dispatch usable");
                        report.usable = true;
                        return Ok(report);
                    }
                    let reason = format!(
                        "attempt {}: {} wrote nothing to '{}'",
                        attempt,
                        worker.name(),
                        collection
                    );
                    if assignment.optional {
                        info!(session = %session, stage, worker = worker.name(), attempt, "optional dispatch produced no artifacts");
                        report.reasons.push(reason);
                        return Ok(report);
                    }
                    warn!(session = %session, stage, worker = worker.name(), attempt, "dispatch produced no artifacts");
                    report.reasons.push(reason);
                }
                Ok(Err(e)) if e.is_budget_exhaustion() => {
                    warn!(session = %session, stage, worker = worker.name(), attempt, error = %e, "worker exhausted its capabilities, moving to fallback");
                    report.reasons.push(format!("attempt {}: {} - {}", attempt, worker.name(), e));
                    idx += 1;
                }
                Ok(Err(e)) => {
                    warn!(session = %session, stage, worker = worker.name(), attempt, error = %e, "dispatch failed");
                    report.reasons.push(format!("attempt {}: {} - {}", attempt, worker.name(), e));
                }
                Err(_) => {
                    warn!(session = %session, stage, worker = worker.name(), attempt, "dispatch timed out");
                    report.reasons.push(format!(
                        "attempt {}: {} timed out after {}s",
                        attempt,
                        worker.name(),
                        self.worker_timeout.as_secs()
                    ));
                }
            }
        }

        if idx >= assignment.workers.len() {
            report.reasons.push(format!("no workers left for '{}'", collection));
        }
        Ok(report)
    }
}
