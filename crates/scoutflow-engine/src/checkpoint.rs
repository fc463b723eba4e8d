//! Checkpoint/interrupt controller.
//!
//! `RUNNING → SUSPENDED → RUNNING … → TERMINATED`. A checkpoint is created
//! by `suspend`, consumed exactly once by the matching `resume`, and lives
//! only in the durable session record.

use crate::session::{SessionHandle, SessionRecord};
use chrono::Utc;
use scoutflow_core::{
    ActionOutcome, Checkpoint, Decision, DecisionKind, Error, Result, SessionStatus,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Validates replacement arguments of an `edit` decision for one action.
pub type EditValidator = Arc<dyn Fn(&Value) -> Result<()> + Send + Sync>;

#[derive(Clone, Default)]
pub struct CheckpointController {
    validators: HashMap<String, EditValidator>,
}

fn checkpoint_id(seq: u32) -> String {
    let uid = uuid::Uuid::new_v4().simple().to_string();
    format!("ckpt-{:04}-{}", seq, &uid[..8])
}

impl CheckpointController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_validator(mut self, action_name: impl Into<String>, validator: EditValidator) -> Self {
        self.validators.insert(action_name.into(), validator);
        self
    }

    /// Persist a checkpoint and move the session to `SUSPENDED`.
    pub async fn suspend(
        &self,
        handle: &SessionHandle,
        action_name: &str,
        proposed_arguments: Value,
        allowed_decisions: &[DecisionKind],
    ) -> Result<Checkpoint> {
        let checkpoint = handle
            .transition(|r| suspend_record(r, action_name, proposed_arguments, allowed_decisions))
            .await?;
        info!(
            session = %handle.id,
            checkpoint = %checkpoint.checkpoint_id,
            action = action_name,
            "session suspended"
        );
        Ok(checkpoint)
    }

    /// Consume the pending checkpoint with `decision`. On any error the
    /// session record is left unchanged.
    pub async fn resume(
        &self,
        handle: &SessionHandle,
        checkpoint_id: &str,
        decision: &Decision,
    ) -> Result<ActionOutcome> {
        let outcome = handle
            .transition(|r| self.resume_record(r, checkpoint_id, decision))
            .await?;
        info!(
            session = %handle.id,
            checkpoint = checkpoint_id,
            decision = %outcome.decision,
            "session resumed"
        );
        Ok(outcome)
    }

    pub fn resume_record(
        &self,
        record: &mut SessionRecord,
        checkpoint_id: &str,
        decision: &Decision,
    ) -> Result<ActionOutcome> {
        let consumed = record.action_outcomes.values().any(|o| o.checkpoint_id == checkpoint_id);
        if record.status == SessionStatus::Terminated && !consumed {
            return Err(Error::SessionTerminated(record.session_id.to_string()));
        }
        let pending = match &record.pending_checkpoint {
            Some(c) if c.checkpoint_id == checkpoint_id => c,
            other => {
                return Err(Error::StaleCheckpoint {
                    provided: checkpoint_id.to_string(),
                    current: other.as_ref().map(|c| c.checkpoint_id.clone()),
                })
            }
        };
        if !pending.allows(decision.kind()) {
            return Err(Error::DecisionNotAllowed {
                decision: decision.kind(),
                checkpoint_id: checkpoint_id.to_string(),
            });
        }
        let arguments = match decision {
            Decision::Approve => Some(pending.proposed_arguments.clone()),
            Decision::Reject => None,
            Decision::Edit { new_arguments } => {
                if let Some(validate) = self.validators.get(&pending.action_name) {
                    validate(new_arguments)?;
                }
                Some(new_arguments.clone())
            }
        };
        let outcome = ActionOutcome {
            checkpoint_id: pending.checkpoint_id.clone(),
            decision: decision.kind(),
            arguments,
            resolved_at: Utc::now(),
        };
        let action = pending.action_name.clone();
        record.action_outcomes.insert(action, outcome.clone());
        record.pending_checkpoint = None;
        record.status = SessionStatus::Running;
        Ok(outcome)
    }
}

pub fn suspend_record(
    record: &mut SessionRecord,
    action_name: &str,
    proposed_arguments: Value,
    allowed_decisions: &[DecisionKind],
) -> Result<Checkpoint> {
    if record.status == SessionStatus::Terminated {
        return Err(Error::SessionTerminated(record.session_id.to_string()));
    }
    if let Some(pending) = &record.pending_checkpoint {
        return Err(Error::CheckpointAlreadyPending {
            pending: pending.checkpoint_id.clone(),
        });
    }
    record.checkpoint_seq += 1;
    let checkpoint = Checkpoint {
        checkpoint_id: checkpoint_id(record.checkpoint_seq),
        action_name: action_name.to_string(),
        proposed_arguments,
        allowed_decisions: allowed_decisions.to_vec(),
        created_at: Utc::now(),
    };
    record.pending_checkpoint = Some(checkpoint.clone());
    record.status = SessionStatus::Suspended;
    Ok(checkpoint)
}

// ---------------------------------------------------------------------------
// Review selection
// ---------------------------------------------------------------------------

/// Proposed arguments of a review action.
pub fn review_arguments(entity_ids: &[String], candidates: Vec<Value>) -> Value {
    json!({ "entity_ids": entity_ids, "candidates": candidates })
}

/// The `entity_ids` string array of review arguments.
pub fn review_selection(arguments: &Value) -> Result<Vec<String>> {
    let ids = arguments
        .get("entity_ids")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::InvalidDecision("review arguments need an 'entity_ids' array".into()))?;
    ids.iter()
        .map(|v| {
            v.as_str()
                .map(String::from)
                .ok_or_else(|| Error::InvalidDecision(format!("entity id is not a string: {}", v)))
        })
        .collect()
}

/// Entities selected by a resolved review. Empty when rejected.
pub fn selected_entities(outcome: &ActionOutcome) -> Vec<String> {
    outcome
        .arguments
        .as_ref()
        .and_then(|a| review_selection(a).ok())
        .unwrap_or_default()
}

pub fn review_validator() -> EditValidator {
    Arc::new(|args: &Value| review_selection(args).map(|_| ()))
}
