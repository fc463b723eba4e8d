//! Error types for Scoutflow

use crate::types::{Capability, DecisionKind, StageStatus};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("out-of-order transition: cannot advance '{requested}' (next stage: {})", .expected.as_deref().unwrap_or("none"))]
    OutOfOrderTransition {
        requested: String,
        expected: Option<String>,
    },

    #[error("invalid transition: stage '{stage}' is {status}")]
    InvalidTransition { stage: String, status: StageStatus },

    #[error("unknown stage: {0}")]
    UnknownStage(String),

    #[error("capability budget exceeded: {capability} (limit {limit})")]
    CapabilityBudgetExceeded { capability: Capability, limit: u32 },

    #[error("capability not permitted for this work item: {0}")]
    CapabilityNotPermitted(Capability),

    #[error("no provider configured for capability: {0}")]
    CapabilityUnavailable(Capability),

    #[error("capability failed: {capability} - {message}")]
    CapabilityFailed {
        capability: Capability,
        message: String,
    },

    #[error("timed out after {secs}s: {what}")]
    Timeout { what: String, secs: u64 },

    #[error("worker failed: {name} - {message}")]
    WorkerFailed { name: String, message: String },

    #[error("stale checkpoint: {provided} (pending: {})", .current.as_deref().unwrap_or("none"))]
    StaleCheckpoint {
        provided: String,
        current: Option<String>,
    },

    #[error("checkpoint already pending: {pending}")]
    CheckpointAlreadyPending { pending: String },

    #[error("decision '{decision}' not allowed for checkpoint {checkpoint_id}")]
    DecisionNotAllowed {
        decision: DecisionKind,
        checkpoint_id: String,
    },

    #[error("invalid decision: {0}")]
    InvalidDecision(String),

    #[error("invalid criteria: {0}")]
    InvalidCriteria(String),

    #[error("invalid session id: {0:?}")]
    InvalidSessionId(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session already exists: {0}")]
    SessionExists(String),

    #[error("session terminated: {0}")]
    SessionTerminated(String),

    #[error("access denied to session {session}")]
    AccessDenied { session: String },

    #[error("invalid artifact path: {0}")]
    InvalidArtifactPath(String),

    #[error("config error: {0}")]
    ConfigError(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn capability_failed(capability: Capability, message: impl Into<String>) -> Self {
        Self::CapabilityFailed {
            capability,
            message: message.into(),
        }
    }

    pub fn worker_failed(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::WorkerFailed {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn timeout(what: impl Into<String>, secs: u64) -> Self {
        Self::Timeout {
            what: what.into(),
            secs,
        }
    }

    /// Sequencing and checkpoint misuse. Never absorbed by the orchestrator.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::OutOfOrderTransition { .. }
                | Self::InvalidTransition { .. }
                | Self::UnknownStage(_)
                | Self::StaleCheckpoint { .. }
                | Self::CheckpointAlreadyPending { .. }
                | Self::DecisionNotAllowed { .. }
                | Self::InvalidDecision(_)
                | Self::SessionTerminated(_)
        )
    }

    /// The worker can not make progress with its capability set; a retry
    /// against the same worker would fail the same way.
    pub fn is_budget_exhaustion(&self) -> bool {
        matches!(
            self,
            Self::CapabilityBudgetExceeded { .. }
                | Self::CapabilityNotPermitted(_)
                | Self::CapabilityUnavailable(_)
        )
    }

    /// Short machine-readable name, used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::OutOfOrderTransition { .. } => "out_of_order_transition",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::UnknownStage(_) => "unknown_stage",
            Self::CapabilityBudgetExceeded { .. } => "capability_budget_exceeded",
            Self::CapabilityNotPermitted(_) => "capability_not_permitted",
            Self::CapabilityUnavailable(_) => "capability_unavailable",
            Self::CapabilityFailed { .. } => "capability_failed",
            Self::Timeout { .. } => "timeout",
            Self::WorkerFailed { .. } => "worker_failed",
            Self::StaleCheckpoint { .. } => "stale_checkpoint",
            Self::CheckpointAlreadyPending { .. } => "checkpoint_already_pending",
            Self::DecisionNotAllowed { .. } => "decision_not_allowed",
            Self::InvalidDecision(_) => "invalid_decision",
            Self::InvalidCriteria(_) => "invalid_criteria",
            Self::InvalidSessionId(_) => "invalid_session_id",
            Self::SessionNotFound(_) => "session_not_found",
            Self::SessionExists(_) => "session_exists",
            Self::SessionTerminated(_) => "session_terminated",
            Self::AccessDenied { .. } => "access_denied",
            Self::InvalidArtifactPath(_) => "invalid_artifact_path",
            Self::ConfigError(_) => "config_error",
            Self::IoError(_) => "io_error",
            Self::JsonError(_) => "json_error",
            Self::Internal(_) => "internal",
        }
    }
}
