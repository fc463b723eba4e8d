//! Scoutflow Engine - task plan, checkpoints, budgeted dispatch and report compilation

pub mod capability;
pub mod checkpoint;
pub mod dispatch;
pub mod extract;
pub mod orchestrator;
pub mod pipeline;
pub mod plan;
pub mod report;
pub mod session;
pub mod store;
pub mod worker;

pub use capability::{
    BudgetMeter, BudgetedCapabilities, CandidateRef, CapabilitySet, ExtractCapability, GeoPoint,
    GeocodeCapability, ImageCapability, PointOfInterest, ProximityCapability, SearchCapability,
};
pub use checkpoint::{review_arguments, review_selection, selected_entities, CheckpointController};
pub use dispatch::{DispatchReport, Dispatcher, StageAssignment};
pub use orchestrator::Orchestrator;
pub use pipeline::{Pipeline, StageInput, StageKind, StageSpec};
pub use plan::TaskPlan;
pub use report::ReportCompiler;
pub use session::{
    FsSessionStore, MemorySessionStore, SessionHandle, SessionRecord, SessionRegistry, SessionStore,
    StageOutcome,
};
pub use store::{ArtifactStore, LocalFsStore, MemoryStore, SessionArtifacts};
pub use worker::{AnnotateAttempt, CriteriaAdjuster, Worker, WorkerContext, WorkerRegistry};
