//! Tests for scoutflow-core: types, protocol payloads, errors, config

use scoutflow_core::config::StoreBackend;
use scoutflow_core::*;
use serde_json::json;

// ===========================================================================
// SessionId
// ===========================================================================

#[test]
fn session_id_new_and_display() {
    let id = SessionId::new("alice-1700000000");
    assert_eq!(id.as_str(), "alice-1700000000");
    assert_eq!(format!("{}", id), "alice-1700000000");
}

#[test]
fn session_id_serializes_as_plain_string() {
    let id = SessionId::new("alice-1");
    assert_eq!(serde_json::to_value(&id).unwrap(), json!("alice-1"));
    let back: SessionId = serde_json::from_value(json!("alice-1")).unwrap();
    assert_eq!(back, id);
}

#[test]
fn session_id_parse_rejects_path_traversal() {
    assert!(SessionId::parse("alice-1").is_ok());
    assert!(SessionId::parse("alice-v1.2_b").is_ok());
    for bad in ["", ".", "..", "alice-../../../escaped", "alice-a/b", "alice-a\\b", "alice- 1"] {
        assert!(
            matches!(SessionId::parse(bad), Err(Error::InvalidSessionId(_))),
            "accepted {:?}",
            bad
        );
    }
}

#[test]
fn session_id_deserialize_is_checked() {
    assert!(serde_json::from_value::<SessionId>(json!("alice-../x")).is_err());
    assert_eq!(Error::InvalidSessionId("..".into()).kind(), "invalid_session_id");
}

#[test]
fn session_id_ownership_requires_dash_separator() {
    let id = SessionId::new("bob-thread-7");
    assert!(id.is_owned_by("bob"));
    assert!(id.is_owned_by("bob-thread"));
    assert!(!id.is_owned_by("bo"));
    assert!(!id.is_owned_by("alice"));
}

// ===========================================================================
// Stage / Capability / Budget
// ===========================================================================

#[test]
fn stage_status_wire_names() {
    assert_eq!(serde_json::to_value(StageStatus::InProgress).unwrap(), json!("in_progress"));
    assert_eq!(StageStatus::Completed.to_string(), "completed");
}

#[test]
fn pending_stage_has_no_timestamps() {
    let s = Stage::pending("search");
    assert_eq!(s.status, StageStatus::Pending);
    assert!(!s.degraded);
    assert!(s.started_at.is_none());
    assert!(s.completed_at.is_none());
}

#[test]
fn capability_names_are_stable() {
    let names: Vec<&str> = Capability::ALL.iter().map(|c| c.as_str()).collect();
    assert_eq!(names, vec!["search", "extract", "geocode", "nearby", "image_generation"]);
    assert_eq!(
        serde_json::to_value(Capability::ImageGeneration).unwrap(),
        json!("image_generation")
    );
}

#[test]
fn budget_absent_capability_is_zero() {
    let b = Budget::new().with(Capability::Search, 1);
    assert_eq!(b.limit(Capability::Search), 1);
    assert_eq!(b.limit(Capability::Nearby), 0);
    let v = serde_json::to_value(&b).unwrap();
    assert_eq!(v, json!({"search": 1}));
}

// ===========================================================================
// Artifacts
// ===========================================================================

#[test]
fn artifact_path_rejects_traversal_and_empty_segments() {
    assert!(ArtifactPath::new("", "a").is_err());
    assert!(ArtifactPath::new("properties", "").is_err());
    assert!(ArtifactPath::new("properties", "..").is_err());
    assert!(ArtifactPath::new("prop erties", "a").is_err());
    assert!(ArtifactPath::parse("/properties/../x.json").is_err());
}

#[test]
fn artifact_path_parse_without_extension() {
    let p = ArtifactPath::parse("locations/item_001").unwrap();
    assert_eq!(p.entity_id, "item_001");
    assert!(!p.is_reserved());
}

#[test]
fn artifact_paths_order_by_collection_then_id() {
    let mut v = vec![
        ArtifactPath::new("properties", "item_002").unwrap(),
        ArtifactPath::new("locations", "item_001").unwrap(),
        ArtifactPath::new("properties", "item_001").unwrap(),
    ];
    v.sort();
    let rendered: Vec<String> = v.iter().map(|p| p.to_string()).collect();
    assert_eq!(
        rendered,
        vec!["locations/item_001.json", "properties/item_001.json", "properties/item_002.json"]
    );
}

// ===========================================================================
// Decisions and checkpoints
// ===========================================================================

#[test]
fn decision_kinds() {
    assert_eq!(Decision::Approve.kind(), DecisionKind::Approve);
    assert_eq!(Decision::Reject.kind(), DecisionKind::Reject);
    let edit = Decision::Edit { new_arguments: json!({}) };
    assert_eq!(edit.kind(), DecisionKind::Edit);
    assert_eq!(DecisionKind::Edit.to_string(), "edit");
}

#[test]
fn edit_decision_requires_new_arguments() {
    let r: std::result::Result<Decision, _> = serde_json::from_value(json!({"type": "edit"}));
    assert!(r.is_err());
}

#[test]
fn checkpoint_allows() {
    let c = Checkpoint {
        checkpoint_id: "ckpt-0001-00000000".into(),
        action_name: "review".into(),
        proposed_arguments: json!({"entity_ids": []}),
        allowed_decisions: vec![DecisionKind::Approve, DecisionKind::Reject],
        created_at: chrono::Utc::now(),
    };
    assert!(c.allows(DecisionKind::Approve));
    assert!(!c.allows(DecisionKind::Edit));
}

// ===========================================================================
// Report
// ===========================================================================

fn sample_report() -> Report {
    Report {
        criteria_echo: json!({"location": "Austin, TX"}),
        entities: vec![ReportEntity { id: "item_001".into(), payload: json!({"price": 1}) }],
        enrichment_by_entity_id: Default::default(),
        summary: "one".into(),
        generated_at: chrono::Utc::now(),
        degraded: false,
        degraded_reasons: vec![],
        source: ReportSource::CompletionMarker,
    }
}

#[test]
fn report_same_content_ignores_timestamp() {
    let a = sample_report();
    let mut b = a.clone();
    b.generated_at = a.generated_at + chrono::Duration::seconds(5);
    assert!(a.same_content(&b));
    b.summary = "two".into();
    assert!(!a.same_content(&b));
}

#[test]
fn report_source_wire_names() {
    assert_eq!(serde_json::to_value(ReportSource::Transcript).unwrap(), json!("transcript"));
    assert_eq!(ReportSource::CompletionMarker.to_string(), "completion_marker");
    assert_eq!(sample_report().entity_ids(), vec!["item_001"]);
}

// ===========================================================================
// Errors
// ===========================================================================

#[test]
fn error_display_includes_context() {
    let e = Error::OutOfOrderTransition { requested: "enrich".into(), expected: Some("search".into()) };
    assert_eq!(e.to_string(), "out-of-order transition: cannot advance 'enrich' (next stage: search)");
    let e = Error::StaleCheckpoint { provided: "ckpt-1".into(), current: None };
    assert_eq!(e.to_string(), "stale checkpoint: ckpt-1 (pending: none)");
}

#[test]
fn error_classification() {
    assert!(Error::CheckpointAlreadyPending { pending: "x".into() }.is_protocol_violation());
    assert!(Error::UnknownStage("x".into()).is_protocol_violation());
    assert!(!Error::worker_failed("w", "boom").is_protocol_violation());
    assert!(Error::CapabilityBudgetExceeded { capability: Capability::Search, limit: 1 }.is_budget_exhaustion());
    assert!(Error::CapabilityNotPermitted(Capability::Geocode).is_budget_exhaustion());
    assert!(!Error::timeout("search", 3).is_budget_exhaustion());
}

#[test]
fn error_from_io_and_json() {
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
    let e: Error = io.into();
    assert_eq!(e.kind(), "io_error");
    let bad: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
    let e: Error = bad.unwrap_err().into();
    assert_eq!(e.kind(), "json_error");
}

#[test]
fn error_body_from_error() {
    let e = Error::SessionNotFound("u-1".into());
    let body = ErrorBody::from(&e);
    assert_eq!(body.error, "session_not_found");
    assert_eq!(body.message, "session not found: u-1");
}

// ===========================================================================
// Config
// ===========================================================================

#[test]
fn config_roundtrips_through_toml() {
    let mut c = ScoutflowConfig::default();
    c.store.backend = StoreBackend::Memory;
    c.gateway.port = 9000;
    let text = c.to_toml();
    let back = ScoutflowConfig::from_toml(&text).unwrap();
    assert_eq!(back.store.backend, StoreBackend::Memory);
    assert_eq!(back.gateway.port, 9000);
    assert_eq!(back.enrichment.categories, c.enrichment.categories);
}

#[test]
fn config_load_reads_file() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("scoutflow.toml");
    std::fs::write(&path, "[store]\nbackend = \"memory\"\n\n[enrichment]\nradius_meters = 1200\n").unwrap();
    let c = ScoutflowConfig::load(&path);
    assert_eq!(c.store.backend, StoreBackend::Memory);
    assert_eq!(c.enrichment.radius_meters, 1200);
    assert_eq!(c.enrichment.per_category_limit, 10);
}
