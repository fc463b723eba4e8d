//! End-to-end pipeline scenarios: search, review, enrich, compile.
//!
//! Workers here are stand-ins that write fixed artifacts, so every test
//! exercises the orchestrator, checkpoint controller, dispatcher and report
//! compiler together without external capabilities.

use scoutflow_core::{
    Decision, DecisionKind, Error, ReportSource, ScoutflowConfig, SessionId, SessionStatus,
    StageStatus, Summary, WorkItem,
};
use scoutflow_engine::plan::{COMPILE, ENRICH, REVIEW, SEARCH};
use scoutflow_engine::{
    ArtifactStore, CapabilitySet, CheckpointController, FsSessionStore, LocalFsStore, MemoryStore,
    Orchestrator, Pipeline, SessionRegistry, StageAssignment, StageInput, StageSpec, Worker,
    WorkerContext,
};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

const REVIEW_ACTION: &str = "present_for_review";

// ===========================================================================
// Stand-in workers
// ===========================================================================

struct WriteListings {
    ids: Vec<&'static str>,
}

#[async_trait::async_trait]
impl Worker for WriteListings {
    fn name(&self) -> &str {
        "write_listings"
    }
    fn description(&self) -> &str {
        "writes a fixed set of listings"
    }
    fn capabilities(&self) -> BTreeSet<scoutflow_core::Capability> {
        BTreeSet::new()
    }
    async fn dispatch(&self, _item: &WorkItem, ctx: &WorkerContext) -> scoutflow_core::Result<Summary> {
        for (n, id) in self.ids.iter().enumerate() {
            ctx.artifacts()
                .put("properties", id, json!({"id": id, "address": format!("{} Main St", n + 1), "price": 400000 + n * 1000}))
                .await?;
        }
        Ok(Summary::new(format!("wrote {} listings", self.ids.len())))
    }
}

#[derive(Default)]
struct FindNothing {
    calls: AtomicU32,
}

#[async_trait::async_trait]
impl Worker for FindNothing {
    fn name(&self) -> &str {
        "find_nothing"
    }
    fn description(&self) -> &str {
        "never finds anything"
    }
    fn capabilities(&self) -> BTreeSet<scoutflow_core::Capability> {
        BTreeSet::new()
    }
    async fn dispatch(&self, _item: &WorkItem, _ctx: &WorkerContext) -> scoutflow_core::Result<Summary> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Summary::new("no matches"))
    }
}

fn approved_ids(item: &WorkItem) -> Vec<String> {
    item.criteria["entity_ids"]
        .as_array()
        .map(|a| a.iter().filter_map(Value::as_str).map(String::from).collect())
        .unwrap_or_default()
}

struct Locate;

#[async_trait::async_trait]
impl Worker for Locate {
    fn name(&self) -> &str {
        "locate"
    }
    fn description(&self) -> &str {
        "writes one location document per approved listing"
    }
    fn capabilities(&self) -> BTreeSet<scoutflow_core::Capability> {
        BTreeSet::new()
    }
    async fn dispatch(&self, item: &WorkItem, ctx: &WorkerContext) -> scoutflow_core::Result<Summary> {
        let ids = approved_ids(item);
        for id in &ids {
            ctx.artifacts()
                .put("locations", id, json!({"entity_id": id, "pros": ["near a park"]}))
                .await?;
        }
        Ok(Summary::new(format!("located {}", ids.len())).with_entities(ids))
    }
}

struct Submit;

#[async_trait::async_trait]
impl Worker for Submit {
    fn name(&self) -> &str {
        "submit"
    }
    fn description(&self) -> &str {
        "writes the completion marker"
    }
    fn capabilities(&self) -> BTreeSet<scoutflow_core::Capability> {
        BTreeSet::new()
    }
    async fn dispatch(&self, item: &WorkItem, ctx: &WorkerContext) -> scoutflow_core::Result<Summary> {
        let n = approved_ids(item).len();
        ctx.artifacts()
            .put(
                "_control",
                "completion",
                json!({"summary": format!("Found {} properties.", n), "criteria": item.criteria["criteria"]}),
            )
            .await?;
        Ok(Summary::new("submitted"))
    }
}

// ===========================================================================
// Harness
// ===========================================================================

fn pipeline(search: Arc<dyn Worker>, submit: bool) -> Pipeline {
    let approved = |skip| StageInput::Approved { review_action: REVIEW_ACTION.into(), skip_when_empty: skip };
    let compile = if submit {
        vec![StageAssignment::new("_control", vec![Arc::new(Submit) as Arc<dyn Worker>])]
    } else {
        vec![]
    };
    Pipeline::new()
        .stage(StageSpec::dispatch(
            SEARCH,
            StageInput::Criteria,
            vec![StageAssignment::new("properties", vec![search])],
        ))
        .stage(StageSpec::review(REVIEW, REVIEW_ACTION, "properties"))
        .stage(StageSpec::dispatch(
            ENRICH,
            approved(true),
            vec![StageAssignment::new("locations", vec![Arc::new(Locate) as Arc<dyn Worker>])],
        ))
        .stage(StageSpec::dispatch(COMPILE, approved(false), compile))
}

fn orchestrator(pipeline: Pipeline) -> Orchestrator {
    Orchestrator::new(
        Arc::new(SessionRegistry::in_memory()),
        Arc::new(MemoryStore::new()),
        Arc::new(CapabilitySet::new()),
        pipeline,
        &ScoutflowConfig::default(),
    )
}

fn three_listings() -> Arc<dyn Worker> {
    Arc::new(WriteListings { ids: vec!["item_001", "item_002", "item_003"] })
}

fn criteria() -> Value {
    json!({"location": "Austin, TX", "min_bedrooms": 3})
}

// ===========================================================================
// Scenario A: edit narrows the review to a subset
// ===========================================================================

#[tokio::test]
async fn edit_with_subset_yields_report_with_that_subset() {
    let orch = orchestrator(pipeline(three_listings(), true));
    let id = SessionId::new("alice-1");

    let state = orch.invoke(&id, Some("alice"), criteria()).await.unwrap();
    assert_eq!(state.status, SessionStatus::Suspended);
    let checkpoint = state.pending_checkpoint.expect("review checkpoint");
    assert_eq!(checkpoint.action_name, REVIEW_ACTION);
    assert_eq!(checkpoint.proposed_arguments["entity_ids"], json!(["item_001", "item_002", "item_003"]));
    assert_eq!(checkpoint.proposed_arguments["candidates"][0]["address"], "1 Main St");
    assert_eq!(state.plan[0].status, StageStatus::Completed);
    assert_eq!(state.plan[1].status, StageStatus::InProgress);

    let edited = json!({"entity_ids": ["item_001", "item_003"]});
    let state = orch
        .resume(&id, &checkpoint.checkpoint_id, Decision::Edit { new_arguments: edited.clone() })
        .await
        .unwrap();
    assert_eq!(state.status, SessionStatus::Terminated);
    assert!(state.pending_checkpoint.is_none());
    assert_eq!(state.progress.completed, 4);

    let report = state.report.expect("report");
    assert_eq!(report.entity_ids(), vec!["item_001", "item_003"]);
    assert_eq!(report.source, ReportSource::CompletionMarker);
    assert!(!report.degraded);
    assert_eq!(report.summary, "Found 2 properties.");
    assert_eq!(report.criteria_echo, criteria());
    assert_eq!(report.enrichment_by_entity_id.len(), 2);
    assert!(report.enrichment_by_entity_id["item_003"].contains_key("locations"));

    // Edit replaces the proposal wholesale: no candidates carried over.
    let record = orch.record(&id).await.unwrap();
    assert_eq!(record.action_outcomes[REVIEW_ACTION].arguments, Some(edited));
}

// ===========================================================================
// Scenario B: nothing found after every attempt
// ===========================================================================

#[tokio::test]
async fn empty_search_degrades_and_still_terminates() {
    let search = Arc::new(FindNothing::default());
    let orch = orchestrator(pipeline(search.clone(), true));
    let id = SessionId::new("bob-1");

    let state = orch.invoke(&id, Some("bob"), criteria()).await.unwrap();
    assert_eq!(state.status, SessionStatus::Terminated);
    assert_eq!(search.calls.load(Ordering::SeqCst), 3);
    assert!(state.plan.iter().all(|s| s.status == StageStatus::Completed));
    assert!(state.plan[0].degraded);

    let report = state.report.expect("report");
    assert!(report.entities.is_empty());
    assert!(report.degraded);
    assert!(report.degraded_reasons.iter().any(|r| r.starts_with("stage 'search' degraded")));

    let record = orch.record(&id).await.unwrap();
    assert_eq!(record.stage_outcomes[SEARCH].attempts, 3);
    assert!(record.stage_outcomes[ENRICH].skipped);
    assert_eq!(record.action_outcomes[REVIEW_ACTION].decision, DecisionKind::Approve);
}

// ===========================================================================
// Scenario C: double resume
// ===========================================================================

#[tokio::test]
async fn second_resume_with_same_checkpoint_is_stale() {
    let orch = orchestrator(pipeline(three_listings(), true));
    let id = SessionId::new("carol-1");
    let state = orch.invoke(&id, None, criteria()).await.unwrap();
    let ckpt = state.pending_checkpoint.unwrap().checkpoint_id;

    orch.resume(&id, &ckpt, Decision::Approve).await.unwrap();
    let err = orch.resume(&id, &ckpt, Decision::Approve).await.unwrap_err();
    assert!(matches!(err, Error::StaleCheckpoint { .. }));
}

#[tokio::test]
async fn concurrent_resumes_apply_exactly_once() {
    let orch = orchestrator(pipeline(three_listings(), true));
    let id = SessionId::new("carol-2");
    let ckpt = orch
        .invoke(&id, None, criteria())
        .await
        .unwrap()
        .pending_checkpoint
        .unwrap()
        .checkpoint_id;

    let (a, b) = tokio::join!(
        orch.resume(&id, &ckpt, Decision::Approve),
        orch.resume(&id, &ckpt, Decision::Reject),
    );
    assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
    let report = orch.get_state(&id).await.unwrap().report.unwrap();
    match (a, b) {
        (Ok(_), Err(_)) => assert_eq!(report.entities.len(), 3),
        (Err(_), Ok(_)) => assert!(report.entities.is_empty()),
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn stale_resume_leaves_session_untouched() {
    let orch = orchestrator(pipeline(three_listings(), true));
    let id = SessionId::new("carol-3");
    orch.invoke(&id, None, criteria()).await.unwrap();
    let before = orch.record(&id).await.unwrap();

    let err = orch.resume(&id, "ckpt-9999-deadbeef", Decision::Approve).await.unwrap_err();
    assert!(matches!(err, Error::StaleCheckpoint { .. }));
    assert_eq!(orch.record(&id).await.unwrap(), before);
}

// ===========================================================================
// Scenario D: plan completes without a completion marker
// ===========================================================================

#[tokio::test]
async fn missing_marker_synthesizes_summary_from_artifacts() {
    let orch = orchestrator(pipeline(three_listings(), false));
    let id = SessionId::new("dave-1");
    let ckpt = orch.invoke(&id, None, criteria()).await.unwrap().pending_checkpoint.unwrap();

    let state = orch.resume(&id, &ckpt.checkpoint_id, Decision::Approve).await.unwrap();
    assert_eq!(state.status, SessionStatus::Terminated);
    let report = state.report.unwrap();
    assert_eq!(report.source, ReportSource::Synthesized);
    assert!(report.degraded);
    assert_eq!(report.entities.len(), 3);
    assert!(report.summary.starts_with("Compiled 3 properties"));
    assert!(report.degraded_reasons.contains(&"completion marker missing".to_string()));
    assert!(!report.degraded_reasons.iter().any(|r| r.starts_with("plan incomplete")));
}

// ===========================================================================
// Decisions and protocol violations
// ===========================================================================

#[tokio::test]
async fn reject_skips_enrichment_and_reports_nothing() {
    let orch = orchestrator(pipeline(three_listings(), true));
    let id = SessionId::new("erin-1");
    let ckpt = orch.invoke(&id, None, criteria()).await.unwrap().pending_checkpoint.unwrap();

    let state = orch.resume(&id, &ckpt.checkpoint_id, Decision::Reject).await.unwrap();
    let report = state.report.unwrap();
    assert!(report.entities.is_empty());
    assert!(report.enrichment_by_entity_id.is_empty());
    assert_eq!(report.summary, "Found 0 properties.");

    let record = orch.record(&id).await.unwrap();
    assert!(record.stage_outcomes[ENRICH].skipped);
    assert!(!record.plan.get(ENRICH).unwrap().degraded);
    assert!(orch.store().list(&id, Some("locations")).await.unwrap().is_empty());
}

#[tokio::test]
async fn malformed_edit_is_refused_and_checkpoint_survives() {
    let orch = orchestrator(pipeline(three_listings(), true));
    let id = SessionId::new("frank-1");
    let ckpt = orch.invoke(&id, None, criteria()).await.unwrap().pending_checkpoint.unwrap();

    let err = orch
        .resume(&id, &ckpt.checkpoint_id, Decision::Edit { new_arguments: json!({"ids": ["item_001"]}) })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidDecision(_)));

    let state = orch.get_state(&id).await.unwrap();
    assert_eq!(state.status, SessionStatus::Suspended);
    assert_eq!(state.pending_checkpoint.unwrap().checkpoint_id, ckpt.checkpoint_id);
}

#[tokio::test]
async fn suspending_twice_fails_and_keeps_first_checkpoint() {
    let orch = orchestrator(pipeline(three_listings(), true));
    let id = SessionId::new("gina-1");
    let first = orch.invoke(&id, None, criteria()).await.unwrap().pending_checkpoint.unwrap();

    let handle = orch.sessions().open(&id).await.unwrap();
    let err = CheckpointController::new()
        .suspend(&handle, "another_action", json!({}), &[DecisionKind::Approve])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CheckpointAlreadyPending { .. }));
    assert_eq!(handle.snapshot().await.pending_checkpoint, Some(first));
}

#[tokio::test]
async fn duplicate_invoke_is_refused() {
    let orch = orchestrator(pipeline(three_listings(), true));
    let id = SessionId::new("hank-1");
    orch.invoke(&id, None, criteria()).await.unwrap();
    let err = orch.invoke(&id, None, criteria()).await.unwrap_err();
    assert!(matches!(err, Error::SessionExists(_)));
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let orch = orchestrator(pipeline(three_listings(), true));
    let err = orch.get_state(&SessionId::new("nobody-1")).await.unwrap_err();
    assert!(matches!(err, Error::SessionNotFound(_)));
}

// ===========================================================================
// Report compilation
// ===========================================================================

#[tokio::test]
async fn recompile_matches_stored_report() {
    let orch = orchestrator(pipeline(three_listings(), true));
    let id = SessionId::new("iris-1");
    let ckpt = orch.invoke(&id, None, criteria()).await.unwrap().pending_checkpoint.unwrap();
    let stored = orch
        .resume(&id, &ckpt.checkpoint_id, Decision::Approve)
        .await
        .unwrap()
        .report
        .unwrap();

    let again = orch.recompile(&id).await.unwrap();
    assert!(again.same_content(&stored));
    assert_eq!(again.entities.len(), 3);
}

#[tokio::test]
async fn artifacts_written_before_suspend_are_reported_after_resume() {
    let orch = orchestrator(pipeline(three_listings(), false));
    let id = SessionId::new("jack-1");
    let ckpt = orch.invoke(&id, None, criteria()).await.unwrap().pending_checkpoint.unwrap();
    assert_eq!(orch.store().list(&id, Some("properties")).await.unwrap().len(), 3);

    let report = orch
        .resume(&id, &ckpt.checkpoint_id, Decision::Approve)
        .await
        .unwrap()
        .report
        .unwrap();
    let ids: BTreeSet<&str> = report.entity_ids().into_iter().collect();
    assert_eq!(ids.len(), 3);
}

// ===========================================================================
// Durability across restarts
// ===========================================================================

fn durable_orchestrator(root: &std::path::Path) -> Orchestrator {
    let store: Arc<dyn ArtifactStore> = Arc::new(LocalFsStore::new(root));
    Orchestrator::new(
        Arc::new(SessionRegistry::new(Arc::new(FsSessionStore::new(root)))),
        store,
        Arc::new(CapabilitySet::new()),
        pipeline(three_listings(), true),
        &ScoutflowConfig::default(),
    )
}

#[tokio::test]
async fn suspended_session_resumes_in_a_fresh_process() {
    let tmp = tempfile::tempdir().unwrap();
    let id = SessionId::new("kate-1");

    let ckpt = {
        let orch = durable_orchestrator(tmp.path());
        orch.invoke(&id, Some("kate"), criteria()).await.unwrap().pending_checkpoint.unwrap()
    };

    let orch = durable_orchestrator(tmp.path());
    let state = orch.get_state(&id).await.unwrap();
    assert_eq!(state.status, SessionStatus::Suspended);
    assert_eq!(state.pending_checkpoint.as_ref(), Some(&ckpt));

    let state = orch
        .resume(&id, &ckpt.checkpoint_id, Decision::Edit { new_arguments: json!({"entity_ids": ["item_002"]}) })
        .await
        .unwrap();
    assert_eq!(state.report.unwrap().entity_ids(), vec!["item_002"]);
    assert!(tmp.path().join("kate-1").join("locations").join("item_002.json").exists());
}

#[tokio::test]
async fn recover_leaves_suspended_session_alone() {
    let orch = orchestrator(pipeline(three_listings(), true));
    let id = SessionId::new("liam-1");
    let suspended = orch.invoke(&id, None, criteria()).await.unwrap();
    let recovered = orch.recover(&id).await.unwrap();
    assert_eq!(recovered.status, SessionStatus::Suspended);
    assert_eq!(recovered.pending_checkpoint, suspended.pending_checkpoint);
}
