//! Final report submission: writes the completion marker the report
//! compiler treats as authoritative.

use crate::criteria::{ApprovedSelection, SearchCriteria};
use crate::render::dollars;
use chrono::Utc;
use scoutflow_core::{Capability, Result, Summary, WorkItem};
use scoutflow_engine::store::{COMPLETION_COLLECTION, COMPLETION_ENTITY};
use scoutflow_engine::{Worker, WorkerContext};
use serde_json::json;
use std::collections::BTreeSet;
use tracing::info;

pub struct SubmitReportWorker {
    entity_collection: String,
    location_collection: String,
}

impl SubmitReportWorker {
    pub fn new(entity_collection: impl Into<String>, location_collection: impl Into<String>) -> Self {
        Self {
            entity_collection: entity_collection.into(),
            location_collection: location_collection.into(),
        }
    }
}

/// Executive summary for `found` properties, `analysed` of which have a
/// location analysis.
pub fn executive_summary(criteria: &SearchCriteria, found: usize, analysed: usize) -> String {
    let mut parts = vec![format!(
        "Found {} properties matching your criteria in {}.",
        found, criteria.location
    )];
    if let Some(max) = criteria.max_price {
        parts.push(format!(
            "Price range: {} - {}.",
            dollars(criteria.min_price.unwrap_or(0.0)),
            dollars(max)
        ));
    }
    if let Some(beds) = criteria.min_bedrooms {
        parts.push(format!("Bedrooms: {}+.", beds));
    }
    if analysed > 0 {
        parts.push(format!("Detailed location analysis included for {} properties.", analysed));
    }
    parts.join(" ")
}

#[async_trait::async_trait]
impl Worker for SubmitReportWorker {
    fn name(&self) -> &str {
        "submit_report"
    }

    fn description(&self) -> &str {
        "Submits the final report once research and analysis are complete."
    }

    fn capabilities(&self) -> BTreeSet<Capability> {
        BTreeSet::new()
    }

    async fn dispatch(&self, item: &WorkItem, ctx: &WorkerContext) -> Result<Summary> {
        let selection = ApprovedSelection::from_value(&item.criteria)?;
        let mut found = Vec::new();
        let mut analysed = 0usize;
        for id in &selection.entity_ids {
            if ctx.artifacts().get(&self.entity_collection, id).await?.is_none() {
                continue;
            }
            if ctx.artifacts().get(&self.location_collection, id).await?.is_some() {
                analysed += 1;
            }
            found.push(id.clone());
        }

        let summary = executive_summary(&selection.criteria, found.len(), analysed);
        ctx.artifacts()
            .put(
                COMPLETION_COLLECTION,
                COMPLETION_ENTITY,
                json!({
                    "summary": summary,
                    "criteria": selection.criteria.to_value(),
                    "entity_ids": found,
                    "submitted_at": Utc::now(),
                }),
            )
            .await?;
        ctx.note(format!("final report submitted: {}", summary)).await?;
        info!(session = %ctx.session_id(), entities = found.len(), analysed, "final report submitted");
        Ok(Summary::new(summary).with_entities(found))
    }
}
