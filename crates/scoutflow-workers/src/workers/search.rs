//! Property search worker: one search call, one extraction call, criteria
//! filter, one artifact per kept listing.

use crate::criteria::SearchCriteria;
use crate::property::Property;
use scoutflow_core::{Capability, Result, Summary, WorkItem};
use scoutflow_engine::{Worker, WorkerContext};
use std::collections::BTreeSet;
use tracing::{debug, info};

pub struct PropertySearchWorker {
    collection: String,
}

impl PropertySearchWorker {
    pub fn new(collection: impl Into<String>) -> Self {
        Self { collection: collection.into() }
    }
}

fn item_id(index: usize) -> String {
    format!("item_{:03}", index)
}

/// One past the highest `item_NNN` already stored, whether or not that
/// artifact parses as a property.
fn next_item_index(taken: &BTreeSet<String>) -> usize {
    taken
        .iter()
        .filter_map(|id| id.strip_prefix("item_")?.parse::<usize>().ok())
        .max()
        .unwrap_or(0)
        + 1
}

#[async_trait::async_trait]
impl Worker for PropertySearchWorker {
    fn name(&self) -> &str {
        "property_search"
    }

    fn description(&self) -> &str {
        "Searches listings matching the criteria and stores one document per kept property."
    }

    fn capabilities(&self) -> BTreeSet<Capability> {
        [Capability::Search, Capability::Extract].into_iter().collect()
    }

    async fn dispatch(&self, item: &WorkItem, ctx: &WorkerContext) -> Result<Summary> {
        let criteria = SearchCriteria::from_value(&item.criteria)?;
        let query = criteria.query();
        let caps = ctx.capabilities();

        let hits = caps.search(&query, criteria.max_results).await?;
        if hits.is_empty() {
            ctx.note(format!("no search results for \"{}\"", query)).await?;
            return Ok(Summary::new(format!("No listings found for \"{}\".", query)));
        }
        let documents = caps.extract(&hits).await?;

        let stored = ctx.artifacts().list(&self.collection).await?;
        let taken: BTreeSet<String> = stored.iter().map(|a| a.path.entity_id.clone()).collect();
        let existing: Vec<Property> = stored
            .iter()
            .filter_map(|a| Property::from_artifact(&a.payload))
            .collect();
        let mut next_index = next_item_index(&taken);

        let mut kept: Vec<Property> = Vec::new();
        let mut discarded = 0usize;
        for doc in &documents {
            let id = item_id(next_index);
            let Some(property) = Property::from_document(id, doc) else {
                discarded += 1;
                continue;
            };
            if !criteria.matches(&property) {
                debug!(address = %property.address, "listing outside criteria");
                discarded += 1;
                continue;
            }
            if existing.iter().chain(kept.iter()).any(|p| p.same_listing(&property)) {
                discarded += 1;
                continue;
            }
            next_index += 1;
            kept.push(property);
            if kept.len() >= criteria.max_results {
                break;
            }
        }

        for property in &kept {
            let payload = serde_json::to_value(property)?;
            ctx.artifacts().put(&self.collection, &property.id, payload).await?;
        }

        let ids: Vec<String> = kept.iter().map(|p| p.id.clone()).collect();
        info!(
            session = %ctx.session_id(),
            attempt = item.attempt,
            found = documents.len(),
            kept = kept.len(),
            discarded,
            "property search finished"
        );
        ctx.note(format!(
            "searched \"{}\": {} documents, kept {} ({})",
            query,
            documents.len(),
            kept.len(),
            ids.join(", ")
        ))
        .await?;
        Ok(Summary::new(format!(
            "Found {} properties in {} ({} discarded).",
            kept.len(),
            criteria.location,
            discarded
        ))
        .with_entities(ids))
    }
}
