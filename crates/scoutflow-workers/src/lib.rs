//! Scoutflow Workers - real-estate research workers and the default pipeline
//!
//! Each worker is a self-contained file in src/workers/.
//! To add a worker: create the file, implement Worker, register it below
//! and give it an assignment in `research_pipeline`.

pub mod criteria;
pub mod fixture;
pub mod geo;
pub mod property;
pub mod render;
pub mod workers;

pub use criteria::{ApprovedSelection, RelaxSearchCriteria, SearchCriteria};
pub use fixture::FixtureCapabilities;
pub use property::Property;
pub use render::render_report_text;
pub use workers::location::LocationAnalysis;

use scoutflow_core::{Result, ScoutflowConfig};
use scoutflow_engine::plan::{COMPILE, ENRICH, REVIEW, SEARCH};
use scoutflow_engine::store::COMPLETION_COLLECTION;
use scoutflow_engine::{Pipeline, StageAssignment, StageInput, StageSpec, WorkerRegistry};
use std::sync::Arc;

pub const LOCATIONS: &str = "locations";
pub const DECORATIONS: &str = "decorations";
/// Checkpoint action of the review stage.
pub const REVIEW_ACTION: &str = "present_properties_for_review";

/// Registry with every builtin worker, wired to the configured collections.
pub fn create_default_registry(config: &ScoutflowConfig) -> WorkerRegistry {
    let entities = config.pipeline.entity_collection.as_str();
    let mut registry = WorkerRegistry::new();

    // --- Discovery ---
    registry.register(workers::search::PropertySearchWorker::new(entities));

    // --- Enrichment ---
    registry.register(workers::location::LocationAnalysisWorker::new(
        entities,
        LOCATIONS,
        config.enrichment.clone(),
    ));
    registry.register(workers::decoration::DecorationWorker::new(entities, DECORATIONS));

    // --- Completion ---
    registry.register(workers::submit::SubmitReportWorker::new(entities, LOCATIONS));

    registry
}

/// search → review → enrich → compile, resolved against `registry`.
pub fn research_pipeline(registry: &WorkerRegistry, config: &ScoutflowConfig) -> Result<Pipeline> {
    let entities = config.pipeline.entity_collection.as_str();
    let approved = |skip_when_empty| StageInput::Approved {
        review_action: REVIEW_ACTION.to_string(),
        skip_when_empty,
    };

    Ok(Pipeline::new()
        .stage(
            StageSpec::dispatch(
                SEARCH,
                StageInput::Criteria,
                vec![StageAssignment::new(entities, registry.resolve(&["property_search"])?)],
            )
            .with_adjuster(Arc::new(RelaxSearchCriteria)),
        )
        .stage(StageSpec::review(REVIEW, REVIEW_ACTION, entities))
        .stage(StageSpec::dispatch(
            ENRICH,
            approved(true),
            vec![
                StageAssignment::new(LOCATIONS, registry.resolve(&["location_analysis"])?),
                StageAssignment::new(DECORATIONS, registry.resolve(&["decoration"])?).optional(),
            ],
        ))
        .stage(StageSpec::dispatch(
            COMPILE,
            approved(false),
            vec![StageAssignment::new(COMPLETION_COLLECTION, registry.resolve(&["submit_report"])?)],
        )))
}

/// The default pipeline with the builtin workers.
pub fn default_pipeline(config: &ScoutflowConfig) -> Result<Pipeline> {
    research_pipeline(&create_default_registry(config), config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_has_builtin_workers() {
        let registry = create_default_registry(&ScoutflowConfig::default());
        assert_eq!(
            registry.list(),
            vec!["decoration", "location_analysis", "property_search", "submit_report"]
        );
    }

    #[test]
    fn default_pipeline_has_four_stages() {
        let p = default_pipeline(&ScoutflowConfig::default()).unwrap();
        let names: Vec<&str> = p.stages().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec![SEARCH, REVIEW, ENRICH, COMPILE]);
        assert_eq!(p.review_action(), Some(REVIEW_ACTION));
    }

    #[test]
    fn missing_worker_fails_pipeline_construction() {
        let registry = WorkerRegistry::new();
        assert!(research_pipeline(&registry, &ScoutflowConfig::default()).is_err());
    }
}
