//! Tests for scoutflow-workers: the research pipeline against fixture capabilities

use scoutflow_core::{Decision, ReportSource, ScoutflowConfig, SessionId, SessionStatus};
use scoutflow_engine::{ArtifactStore, MemoryStore, Orchestrator, SessionRegistry};
use scoutflow_workers::{
    default_pipeline, render_report_text, FixtureCapabilities, LocationAnalysis, Property, DECORATIONS,
    LOCATIONS,
};
use serde_json::{json, Value};
use std::sync::Arc;

fn fixture() -> Value {
    json!({
        "search": [
            {"url": "https://listings.test/oak", "title": "12 Oak Ave"},
            {"url": "https://listings.test/elm", "title": "40 Elm St"},
            {"url": "https://listings.test/pine", "title": "7 Pine Rd"},
            {"url": "https://listings.test/broken", "title": "no data"}
        ],
        "documents": {
            "https://listings.test/oak": {
                "address": "12 Oak Ave", "city": "Austin", "state": "TX", "zip_code": "78704",
                "price": "$450,000", "bedrooms": 3, "bathrooms": 2, "square_feet": 1800,
                "property_type": "house", "images": ["https://img.test/oak-1.jpg"],
                "description": "Bungalow near the greenbelt."
            },
            "https://listings.test/elm": {
                "address": "40 Elm St", "city": "Austin", "state": "TX",
                "price": 480000, "beds": 4, "baths": 3, "type": "House"
            },
            "https://listings.test/pine": {
                "address": "7 Pine Rd", "city": "Austin", "state": "TX",
                "price": 900000, "bedrooms": 5, "bathrooms": 4, "property_type": "house"
            }
        },
        "geocode": {
            "12 Oak Ave": {"lat": 30.2500, "lon": -97.7700},
            "40 Elm St": {"lat": 30.3000, "lon": -97.7000}
        },
        "pois": [
            {"name": "Zilker Park", "category": "park", "lat": 30.2520, "lon": -97.7700},
            {"name": "Bouldin Cafe", "category": "cafe", "lat": 30.2505, "lon": -97.7690},
            {"name": "Austin High", "category": "school", "lat": 30.2700, "lon": -97.7600},
            {"name": "Hyde Park Gym", "category": "gym", "lat": 30.3010, "lon": -97.7010}
        ]
    })
}

fn criteria() -> Value {
    json!({"location": "Austin, TX", "max_price": 500000, "min_bedrooms": 3, "decoration_style": "scandinavian"})
}

fn orchestrator(config: ScoutflowConfig) -> Orchestrator {
    let capabilities = FixtureCapabilities::from_value(fixture()).unwrap().into_capability_set();
    Orchestrator::new(
        Arc::new(SessionRegistry::in_memory()),
        Arc::new(MemoryStore::new()),
        Arc::new(capabilities),
        default_pipeline(&config).unwrap(),
        &config,
    )
}

// ===========================================================================
// Search and review
// ===========================================================================

#[tokio::test]
async fn search_keeps_matching_listings_and_suspends_for_review() {
    let orch = orchestrator(ScoutflowConfig::default());
    let id = SessionId::new("alice-100");
    let state = orch.invoke(&id, Some("alice"), criteria()).await.unwrap();

    assert_eq!(state.status, SessionStatus::Suspended);
    let checkpoint = state.pending_checkpoint.unwrap();
    assert_eq!(checkpoint.action_name, scoutflow_workers::REVIEW_ACTION);
    assert_eq!(checkpoint.proposed_arguments["entity_ids"], json!(["item_001", "item_002"]));
    let card = &checkpoint.proposed_arguments["candidates"][0];
    assert_eq!(card["address"], "12 Oak Ave");
    assert_eq!(card["price"], 450000.0);
    assert_eq!(card["image_urls"], json!(["https://img.test/oak-1.jpg"]));

    let stored = orch.store().list(&id, Some("properties")).await.unwrap();
    let elm = Property::from_artifact(&stored[1].payload).unwrap();
    assert_eq!(elm.bedrooms, 4);
    assert_eq!(elm.listing_url, "https://listings.test/elm");
}

#[tokio::test]
async fn search_never_overwrites_foreign_artifacts() {
    let orch = orchestrator(ScoutflowConfig::default());
    let id = SessionId::new("alice-102");
    let foreign = json!({"id": "item_001", "note": "kept by another writer"});
    let path = scoutflow_core::ArtifactPath::new("properties", "item_001").unwrap();
    orch.store().put(&id, &scoutflow_core::Artifact::new(path.clone(), foreign.clone())).await.unwrap();

    orch.invoke(&id, None, criteria()).await.unwrap();

    let stored = orch.store().list(&id, Some("properties")).await.unwrap();
    let ids: Vec<&str> = stored.iter().map(|a| a.path.entity_id.as_str()).collect();
    assert_eq!(ids, vec!["item_001", "item_002", "item_003"]);
    assert_eq!(orch.store().get(&id, &path).await.unwrap().unwrap().payload, foreign);
    let oak = Property::from_artifact(&stored[1].payload).unwrap();
    assert_eq!(oak.listing_url, "https://listings.test/oak");
}

// ===========================================================================
// Full run
// ===========================================================================

#[tokio::test]
async fn approved_subset_is_enriched_decorated_and_submitted() {
    let orch = orchestrator(ScoutflowConfig::default());
    let id = SessionId::new("alice-101");
    let ckpt = orch.invoke(&id, None, criteria()).await.unwrap().pending_checkpoint.unwrap();

    let state = orch
        .resume(&id, &ckpt.checkpoint_id, Decision::Edit { new_arguments: json!({"entity_ids": ["item_001"]}) })
        .await
        .unwrap();
    assert_eq!(state.status, SessionStatus::Terminated);

    let report = state.report.unwrap();
    assert_eq!(report.source, ReportSource::CompletionMarker);
    assert!(!report.degraded, "reasons: {:?}", report.degraded_reasons);
    assert_eq!(report.entity_ids(), vec!["item_001"]);
    assert_eq!(
        report.summary,
        "Found 1 properties matching your criteria in Austin, TX. Price range: $0 - $500,000. \
         Bedrooms: 3+. Detailed location analysis included for 1 properties."
    );

    let enrichment = &report.enrichment_by_entity_id["item_001"];
    let analysis: LocationAnalysis = serde_json::from_value(enrichment[LOCATIONS].clone()).unwrap();
    assert!(analysis.pros.iter().any(|p| p.starts_with("1 park within 1.0 km (closest: Zilker Park")));
    assert!(analysis.cons.iter().any(|c| c == "No gyms within 5.0 km"));
    assert_eq!(enrichment[DECORATIONS]["style"], "scandinavian");

    let text = render_report_text(&report);
    assert!(text.contains("PROPERTY #1: 12 Oak Ave, Austin, TX"));
    assert!(text.contains("Decorated (scandinavian): fixture://generated/"));

    // Nothing was written for the listing that was not approved.
    assert!(orch.store().get(&id, &scoutflow_core::ArtifactPath::new(LOCATIONS, "item_002").unwrap()).await.unwrap().is_none());
}

#[tokio::test]
async fn no_decoration_style_does_not_degrade() {
    let orch = orchestrator(ScoutflowConfig::default());
    let id = SessionId::new("bob-100");
    let criteria = json!({"location": "Austin, TX", "max_price": 500000});
    let ckpt = orch.invoke(&id, None, criteria).await.unwrap().pending_checkpoint.unwrap();

    let report = orch
        .resume(&id, &ckpt.checkpoint_id, Decision::Approve)
        .await
        .unwrap()
        .report
        .unwrap();
    assert!(!report.degraded);
    assert_eq!(report.entities.len(), 2);
    assert!(report.enrichment_by_entity_id.values().all(|e| !e.contains_key(DECORATIONS)));
}

// ===========================================================================
// Retries and budgets
// ===========================================================================

#[tokio::test]
async fn impossible_criteria_relax_then_degrade() {
    let orch = orchestrator(ScoutflowConfig::default());
    let id = SessionId::new("carol-100");
    let criteria = json!({"location": "Austin, TX", "max_price": 100000, "property_types": ["condo"]});

    let state = orch.invoke(&id, None, criteria).await.unwrap();
    assert_eq!(state.status, SessionStatus::Terminated);
    assert!(state.plan[0].degraded);
    let report = state.report.unwrap();
    assert!(report.degraded);
    assert!(report.entities.is_empty());
    assert_eq!(orch.record(&id).await.unwrap().stage_outcomes["search"].attempts, 3);
}

#[tokio::test]
async fn proximity_budget_exhaustion_degrades_enrichment() {
    let mut config = ScoutflowConfig::default();
    config.budgets.nearby = 4;
    let orch = orchestrator(config);
    let id = SessionId::new("dave-100");
    let ckpt = orch.invoke(&id, None, criteria()).await.unwrap().pending_checkpoint.unwrap();

    let state = orch.resume(&id, &ckpt.checkpoint_id, Decision::Approve).await.unwrap();
    let enrich = state.plan.iter().find(|s| s.name == "enrich").unwrap();
    assert!(enrich.degraded);
    let report = state.report.unwrap();
    assert!(report.degraded);
    assert_eq!(report.entities.len(), 2);
    assert!(report.degraded_reasons.iter().any(|r| r.contains("enrich")));
}
