//! Orchestrator: drives a session's plan one stage at a time.
//!
//! Each stage transition is persisted before the next step starts, so the
//! process can stop between any two stages (or while suspended) and a later
//! `resume`/`recover` continues from the durable record alone.

use crate::capability::CapabilitySet;
use crate::checkpoint::{review_arguments, review_validator, selected_entities, CheckpointController};
use crate::dispatch::{Dispatcher, StageAssignment};
use crate::pipeline::{Pipeline, StageInput, StageKind};
use crate::report::ReportCompiler;
use crate::session::{SessionHandle, SessionRecord, SessionRegistry, StageOutcome};
use crate::store::ArtifactStore;
use crate::worker::CriteriaAdjuster;
use chrono::Utc;
use scoutflow_core::config::PipelineConfig;
use scoutflow_core::{
    ActionOutcome, Artifact, Decision, DecisionKind, Error, Report, Result, ScoutflowConfig,
    SessionId, SessionState, SessionStatus, TranscriptEntry,
};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{info, warn};

/// Fields copied from an entity into its review card.
const PREVIEW_FIELDS: [&str; 6] = ["address", "price", "bedrooms", "bathrooms", "image_urls", "listing_url"];

/// Checkpoint id recorded when a review resolves without suspending.
pub const AUTO_RESOLVED: &str = "auto";

enum StageStep {
    Continue,
    Suspended,
}

pub struct Orchestrator {
    sessions: Arc<SessionRegistry>,
    store: Arc<dyn ArtifactStore>,
    pipeline: Arc<Pipeline>,
    dispatcher: Dispatcher,
    checkpoints: CheckpointController,
    compiler: ReportCompiler,
    config: PipelineConfig,
}

fn review_card(artifact: &Artifact) -> Value {
    let mut card = Map::new();
    card.insert("id".into(), Value::String(artifact.path.entity_id.clone()));
    if let Some(obj) = artifact.payload.as_object() {
        for key in PREVIEW_FIELDS {
            if let Some(v) = obj.get(key) {
                card.insert(key.into(), v.clone());
            }
        }
    }
    Value::Object(card)
}

impl Orchestrator {
    pub fn new(
        sessions: Arc<SessionRegistry>,
        store: Arc<dyn ArtifactStore>,
        providers: Arc<CapabilitySet>,
        pipeline: Pipeline,
        config: &ScoutflowConfig,
    ) -> Self {
        let mut checkpoints = CheckpointController::new();
        let mut compiler = ReportCompiler::new(config.pipeline.entity_collection.clone());
        for stage in pipeline.stages() {
            if let StageKind::Review { action_name, .. } = &stage.kind {
                checkpoints = checkpoints.with_validator(action_name.clone(), review_validator());
            }
        }
        if let Some(action) = pipeline.review_action() {
            compiler = compiler.with_review_action(action);
        }
        Self {
            dispatcher: Dispatcher::new(store.clone(), providers, &config.pipeline, config.budgets.clone()),
            sessions,
            store,
            pipeline: Arc::new(pipeline),
            checkpoints,
            compiler,
            config: config.pipeline.clone(),
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Start a new session and run it until it suspends or terminates.
    pub async fn invoke(&self, id: &SessionId, owner: Option<&str>, criteria: Value) -> Result<SessionState> {
        let record = SessionRecord::new(id.clone(), owner.map(String::from), criteria, self.pipeline.plan());
        let handle = self.sessions.create(record).await?;
        let _run = handle.lock_run().await;
        let stages: Vec<&str> = self.pipeline.stages().iter().map(|s| s.name.as_str()).collect();
        self.note(id, "orchestrator", format!("session started, plan: {}", stages.join(" -> ")))
            .await;
        self.drive(&handle).await?;
        Ok(handle.snapshot().await.state())
    }

    /// Apply a decision to the pending checkpoint and continue.
    pub async fn resume(&self, id: &SessionId, checkpoint_id: &str, decision: Decision) -> Result<SessionState> {
        let handle = self.sessions.open(id).await?;
        let _run = handle.lock_run().await;
        let outcome = self.checkpoints.resume(&handle, checkpoint_id, &decision).await?;
        self.note(
            id,
            "reviewer",
            format!("{} on {} ({} selected)", outcome.decision, checkpoint_id, selected_entities(&outcome).len()),
        )
        .await;
        self.drive(&handle).await?;
        Ok(handle.snapshot().await.state())
    }

    /// Continue a running session after a restart. Suspended and terminated
    /// sessions are returned as they are.
    pub async fn recover(&self, id: &SessionId) -> Result<SessionState> {
        let handle = self.sessions.open(id).await?;
        let _run = handle.lock_run().await;
        self.drive(&handle).await?;
        Ok(handle.snapshot().await.state())
    }

    pub async fn get_state(&self, id: &SessionId) -> Result<SessionState> {
        Ok(self.record(id).await?.state())
    }

    pub async fn record(&self, id: &SessionId) -> Result<SessionRecord> {
        Ok(self.sessions.open(id).await?.snapshot().await)
    }

    /// Compile the report again from current store state without touching
    /// the session.
    pub async fn recompile(&self, id: &SessionId) -> Result<Report> {
        let record = self.record(id).await?;
        self.compiler.compile(&record, self.store.as_ref()).await
    }

    async fn note(&self, id: &SessionId, source: &str, text: String) {
        if let Err(e) = self.store.append_transcript(id, &TranscriptEntry::new(source, text)).await {
            warn!(session = %id, error = %e, "failed to append transcript");
        }
    }

    async fn drive(&self, handle: &SessionHandle) -> Result<()> {
        loop {
            let record = handle.snapshot().await;
            if record.status != SessionStatus::Running {
                return Ok(());
            }

            if record.plan.is_complete() {
                let report = self.compiler.compile(&record, self.store.as_ref()).await?;
                let (source, entities) = (report.source, report.entities.len());
                handle
                    .transition(|r| {
                        r.report = Some(report);
                        r.status = SessionStatus::Terminated;
                        Ok(())
                    })
                    .await?;
                self.note(&handle.id, "orchestrator", format!("report compiled from {} with {} entities", source, entities))
                    .await;
                info!(session = %handle.id, source = %source, entities, "session terminated");
                return Ok(());
            }

            let stage = match record.plan.current() {
                Some(s) => s.name.clone(),
                None => {
                    let next = record
                        .plan
                        .next_pending()
                        .map(|s| s.name.clone())
                        .ok_or_else(|| Error::Internal("plan has no pending stage".into()))?;
                    handle.transition(|r| r.plan.advance(&next)).await?;
                    info!(session = %handle.id, stage = %next, "stage started");
                    next
                }
            };

            let spec = self
                .pipeline
                .get(&stage)
                .ok_or_else(|| Error::UnknownStage(stage.clone()))?;
            let step = match &spec.kind {
                StageKind::Dispatch { input, assignments, adjuster } => {
                    self.run_dispatch(handle, &record, &stage, input, assignments, adjuster.as_ref())
                        .await?
                }
                StageKind::Review { action_name, source_collection, allowed_decisions } => {
                    self.run_review(handle, &record, &stage, action_name, source_collection, allowed_decisions)
                        .await?
                }
            };
            if let StageStep::Suspended = step {
                return Ok(());
            }
        }
    }

    /// Approved ids from a resolved review; every entity in the store when
    /// no review has been resolved.
    async fn approved_entities(&self, record: &SessionRecord, review_action: &str) -> Result<Vec<String>> {
        if let Some(outcome) = record.action_outcomes.get(review_action) {
            return Ok(selected_entities(outcome));
        }
        Ok(self
            .store
            .list(&record.session_id, Some(&self.config.entity_collection))
            .await?
            .into_iter()
            .map(|a| a.path.entity_id)
            .collect())
    }

    async fn run_dispatch(
        &self,
        handle: &SessionHandle,
        record: &SessionRecord,
        stage: &str,
        input: &StageInput,
        assignments: &[StageAssignment],
        adjuster: &dyn CriteriaAdjuster,
    ) -> Result<StageStep> {
        let criteria = match input {
            StageInput::Criteria => record.criteria.clone(),
            StageInput::Approved { review_action, skip_when_empty } => {
                let approved = self.approved_entities(record, review_action).await?;
                if approved.is_empty() && *skip_when_empty {
                    handle
                        .transition(|r| {
                            r.stage_outcomes.insert(
                                stage.to_string(),
                                StageOutcome { skipped: true, ..Default::default() },
                            );
                            r.plan.complete(stage)
                        })
                        .await?;
                    info!(session = %handle.id, stage, "stage skipped: nothing approved");
                    return Ok(StageStep::Continue);
                }
                json!({ "criteria": record.criteria, "entity_ids": approved })
            }
        };

        let mut outcome = StageOutcome::default();
        for assignment in assignments {
            let report = self
                .dispatcher
                .run(&handle.id, stage, assignment, &criteria, adjuster)
                .await?;
            outcome.attempts += report.attempts;
            outcome.summaries.extend(report.summaries);
            outcome.reasons.extend(report.reasons);
            if !report.usable && !assignment.optional {
                outcome.degraded = true;
            }
        }
        for summary in &outcome.summaries {
            self.note(&handle.id, stage, summary.clone()).await;
        }

        let degraded = outcome.degraded;
        handle
            .transition(|r| {
                if degraded {
                    r.plan.mark_degraded(stage)?;
                }
                r.stage_outcomes.insert(stage.to_string(), outcome);
                r.plan.complete(stage)
            })
            .await?;
        if degraded {
            warn!(session = %handle.id, stage, "stage completed degraded");
        } else {
            info!(session = %handle.id, stage, "stage completed");
        }
        Ok(StageStep::Continue)
    }

    async fn run_review(
        &self,
        handle: &SessionHandle,
        record: &SessionRecord,
        stage: &str,
        action_name: &str,
        source_collection: &str,
        allowed: &[DecisionKind],
    ) -> Result<StageStep> {
        if record.action_outcomes.contains_key(action_name) {
            handle.transition(|r| r.plan.complete(stage)).await?;
            info!(session = %handle.id, stage, "review resolved, stage completed");
            return Ok(StageStep::Continue);
        }

        let candidates = self.store.list(&handle.id, Some(source_collection)).await?;
        let ids: Vec<String> = candidates.iter().map(|a| a.path.entity_id.clone()).collect();

        if ids.is_empty() && self.config.skip_empty_review {
            handle
                .transition(|r| {
                    r.action_outcomes.insert(
                        action_name.to_string(),
                        ActionOutcome {
                            checkpoint_id: AUTO_RESOLVED.into(),
                            decision: DecisionKind::Approve,
                            arguments: Some(review_arguments(&[], vec![])),
                            resolved_at: Utc::now(),
                        },
                    );
                    r.plan.complete(stage)
                })
                .await?;
            info!(session = %handle.id, stage, "nothing to review, resolved without suspending");
            return Ok(StageStep::Continue);
        }

        let cards = candidates.iter().map(review_card).collect();
        let checkpoint = self
            .checkpoints
            .suspend(handle, action_name, review_arguments(&ids, cards), allowed)
            .await?;
        self.note(
            &handle.id,
            "orchestrator",
            format!("awaiting decision on {} ({} candidates)", checkpoint.checkpoint_id, ids.len()),
        )
        .await;
        Ok(StageStep::Suspended)
    }
}
