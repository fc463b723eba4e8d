//! Core types for Scoutflow

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::error::{Error, Result};

/// Session identifier - cheaply cloneable.
///
/// Doubles as the artifact-store namespace and as the resume handle.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct SessionId(Arc<str>);

impl SessionId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(Arc::from(s.into()))
    }

    /// Checked constructor for ids from outside the process. The id becomes a
    /// directory name, so it must be a single safe path segment.
    pub fn parse(s: impl Into<String>) -> Result<Self> {
        let id = Self::new(s);
        id.validate()?;
        Ok(id)
    }

    pub fn validate(&self) -> Result<()> {
        if valid_segment(&self.0) {
            Ok(())
        } else {
            Err(Error::InvalidSessionId(self.0.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Session ids are namespaced by owner: `{user_id}-{anything}`.
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        !user_id.is_empty()
            && self
                .0
                .strip_prefix(user_id)
                .is_some_and(|rest| rest.starts_with('-'))
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl Serialize for SessionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for SessionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        SessionId::parse(raw).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Task plan
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    InProgress,
    Completed,
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// One named step of a session's task plan.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Stage {
    pub name: String,
    pub status: StageStatus,
    /// Completed without usable output (attempt ceiling or budget exhausted).
    #[serde(default)]
    pub degraded: bool,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Stage {
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: StageStatus::Pending,
            degraded: false,
            started_at: None,
            completed_at: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

// ---------------------------------------------------------------------------
// Capabilities and work items
// ---------------------------------------------------------------------------

/// External operation a worker may be permitted to call.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Search,
    Extract,
    Geocode,
    Nearby,
    ImageGeneration,
}

impl Capability {
    pub const ALL: [Capability; 5] = [
        Capability::Search,
        Capability::Extract,
        Capability::Geocode,
        Capability::Nearby,
        Capability::ImageGeneration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Extract => "extract",
            Self::Geocode => "geocode",
            Self::Nearby => "nearby",
            Self::ImageGeneration => "image_generation",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maximum calls per capability for one dispatch. Absent means zero.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Budget(BTreeMap<Capability, u32>);

impl Budget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, capability: Capability, limit: u32) -> Self {
        self.0.insert(capability, limit);
        self
    }

    pub fn limit(&self, capability: Capability) -> u32 {
        self.0.get(&capability).copied().unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Capability, u32)> + '_ {
        self.0.iter().map(|(c, l)| (*c, *l))
    }

    /// Keep only the entries for `capabilities`.
    pub fn restricted_to(&self, capabilities: &BTreeSet<Capability>) -> Self {
        Self(
            self.0
                .iter()
                .filter(|(c, _)| capabilities.contains(c))
                .map(|(c, l)| (*c, *l))
                .collect(),
        )
    }
}

/// A request dispatched to a worker. Discarded once the worker returns.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkItem {
    pub stage: String,
    /// Opaque search/filter parameters, passed through to the worker.
    pub criteria: Value,
    pub capabilities: BTreeSet<Capability>,
    pub budget: Budget,
    /// 1-based dispatch attempt for this stage assignment.
    pub attempt: u32,
}

/// Advisory result of a dispatch. Only used for progress reporting.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Summary {
    pub message: String,
    #[serde(default)]
    pub entity_ids: Vec<String>,
}

impl Summary {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            entity_ids: Vec::new(),
        }
    }

    pub fn with_entities(mut self, ids: Vec<String>) -> Self {
        self.entity_ids = ids;
        self
    }
}

// ---------------------------------------------------------------------------
// Artifacts
// ---------------------------------------------------------------------------

/// `{collection}/{entity_id}.json` inside a session namespace.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactPath {
    pub collection: String,
    pub entity_id: String,
}

fn valid_segment(s: &str) -> bool {
    !s.is_empty()
        && s != "."
        && s != ".."
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

impl ArtifactPath {
    pub fn new(collection: impl Into<String>, entity_id: impl Into<String>) -> Result<Self> {
        let collection = collection.into();
        let entity_id = entity_id.into();
        if !valid_segment(&collection) || !valid_segment(&entity_id) {
            return Err(Error::InvalidArtifactPath(format!(
                "{}/{}",
                collection, entity_id
            )));
        }
        Ok(Self {
            collection,
            entity_id,
        })
    }

    /// Parse `collection/entity_id.json`; a leading `/` is accepted.
    pub fn parse(path: &str) -> Result<Self> {
        let trimmed = path.trim_start_matches('/');
        let (collection, file) = trimmed
            .split_once('/')
            .ok_or_else(|| Error::InvalidArtifactPath(path.to_string()))?;
        let entity_id = file.strip_suffix(".json").unwrap_or(file);
        Self::new(collection, entity_id).map_err(|_| Error::InvalidArtifactPath(path.to_string()))
    }

    /// Reserved collections (leading `_`) hold control documents, not entities.
    pub fn is_reserved(&self) -> bool {
        self.collection.starts_with('_')
    }
}

impl std::fmt::Display for ArtifactPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}.json", self.collection, self.entity_id)
    }
}

/// A unit of worker output. The payload must stand on its own.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Artifact {
    pub path: ArtifactPath,
    pub payload: Value,
}

impl Artifact {
    pub fn new(path: ArtifactPath, payload: Value) -> Self {
        Self { path, payload }
    }
}

/// One line of a session's interaction transcript.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TranscriptEntry {
    pub ts: DateTime<Utc>,
    /// Who wrote it: a worker name, `orchestrator`, `reviewer`.
    pub source: String,
    pub text: String,
}

impl TranscriptEntry {
    pub fn new(source: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            ts: Utc::now(),
            source: source.into(),
            text: text.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Checkpoints and decisions
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    Approve,
    Edit,
    Reject,
}

impl std::fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Approve => write!(f, "approve"),
            Self::Edit => write!(f, "edit"),
            Self::Reject => write!(f, "reject"),
        }
    }
}

/// External decision on a suspended action.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
    /// Replace the proposed arguments wholesale.
    Edit { new_arguments: Value },
}

impl Decision {
    pub fn kind(&self) -> DecisionKind {
        match self {
            Self::Approve => DecisionKind::Approve,
            Self::Reject => DecisionKind::Reject,
            Self::Edit { .. } => DecisionKind::Edit,
        }
    }
}

/// Durable envelope of a suspended action.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    pub checkpoint_id: String,
    pub action_name: String,
    pub proposed_arguments: Value,
    pub allowed_decisions: Vec<DecisionKind>,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn allows(&self, kind: DecisionKind) -> bool {
        self.allowed_decisions.contains(&kind)
    }
}

/// How a checkpointed action was resolved. `arguments` is `None` on reject.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ActionOutcome {
    pub checkpoint_id: String,
    pub decision: DecisionKind,
    pub arguments: Option<Value>,
    pub resolved_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Suspended,
    Terminated,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Suspended => write!(f, "suspended"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReportSource {
    /// Summary taken from the completion marker.
    CompletionMarker,
    /// Marker missing or malformed; summary synthesized from artifact counts.
    Synthesized,
    /// Artifacts empty as well; entities recovered from the transcript.
    Transcript,
}

impl std::fmt::Display for ReportSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CompletionMarker => write!(f, "completion_marker"),
            Self::Synthesized => write!(f, "synthesized"),
            Self::Transcript => write!(f, "transcript"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ReportEntity {
    pub id: String,
    pub payload: Value,
}

/// Terminal output of a session.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Report {
    pub criteria_echo: Value,
    pub entities: Vec<ReportEntity>,
    /// entity id → collection → enrichment document
    pub enrichment_by_entity_id: BTreeMap<String, BTreeMap<String, Value>>,
    pub summary: String,
    pub generated_at: DateTime<Utc>,
    pub degraded: bool,
    #[serde(default)]
    pub degraded_reasons: Vec<String>,
    pub source: ReportSource,
}

impl Report {
    pub fn entity_ids(&self) -> Vec<&str> {
        self.entities.iter().map(|e| e.id.as_str()).collect()
    }

    /// Equality modulo `generated_at`.
    pub fn same_content(&self, other: &Report) -> bool {
        self.criteria_echo == other.criteria_echo
            && self.entities == other.entities
            && self.enrichment_by_entity_id == other.enrichment_by_entity_id
            && self.summary == other.summary
            && self.degraded == other.degraded
            && self.degraded_reasons == other.degraded_reasons
            && self.source == other.source
    }
}
