//! Request-surface payloads: what callers send to start, resume and
//! inspect a session, and what they get back.

use crate::types::{Checkpoint, Decision, Progress, Report, SessionId, SessionStatus, Stage};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Start a session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InvokeRequest {
    pub criteria: Value,
}

/// Resume a suspended session with a decision on its pending checkpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResumeRequest {
    pub checkpoint_id: String,
    pub decision: Decision,
}

/// Read model of a session. Always a consistent snapshot.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SessionState {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub plan: Vec<Stage>,
    pub progress: Progress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_checkpoint: Option<Checkpoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<Report>,
}

impl SessionState {
    pub fn is_suspended(&self) -> bool {
        self.status == SessionStatus::Suspended
    }

    pub fn is_terminated(&self) -> bool {
        self.status == SessionStatus::Terminated
    }
}

/// Error body returned by the gateway.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

impl From<&crate::Error> for ErrorBody {
    fn from(e: &crate::Error) -> Self {
        Self {
            error: e.kind().to_string(),
            message: e.to_string(),
        }
    }
}
