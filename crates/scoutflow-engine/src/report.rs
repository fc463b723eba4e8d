//! Report compiler.
//!
//! Primary path: the completion marker is authoritative for `summary` and
//! `criteria_echo`; entities and enrichment come from the artifact store.
//! Fallbacks, each flagged as degraded:
//! 1. marker missing or malformed, entity artifacts present: synthesized summary
//! 2. no entity artifacts either: entities recovered from the transcript
//!
//! `compile` is read-only. Recompiling unchanged store state yields an
//! equal report apart from `generated_at`.

use crate::checkpoint::selected_entities;
use crate::extract::recover_entities;
use crate::session::SessionRecord;
use crate::store::{completion_marker_path, ArtifactStore};
use chrono::Utc;
use scoutflow_core::{Artifact, Report, ReportEntity, ReportSource, Result};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

#[derive(Clone, Debug)]
pub struct ReportCompiler {
    entity_collection: String,
    review_action: Option<String>,
}

/// What the completion marker said, if anything usable.
enum Marker {
    Valid { summary: String, criteria: Option<Value> },
    Malformed,
    Missing,
}

fn read_marker(artifact: Option<Artifact>) -> Marker {
    let Some(artifact) = artifact else {
        return Marker::Missing;
    };
    match artifact.payload.get("summary").and_then(Value::as_str) {
        Some(s) if !s.trim().is_empty() => Marker::Valid {
            summary: s.to_string(),
            criteria: artifact.payload.get("criteria").cloned(),
        },
        _ => Marker::Malformed,
    }
}

/// Enrichment documents point at their entity through `entity_id` or
/// `property_id`; otherwise the artifact's own id is the entity id.
fn enrichment_target(artifact: &Artifact) -> String {
    ["entity_id", "property_id"]
        .iter()
        .find_map(|k| artifact.payload.get(*k).and_then(Value::as_str))
        .map(String::from)
        .unwrap_or_else(|| artifact.path.entity_id.clone())
}

impl ReportCompiler {
    pub fn new(entity_collection: impl Into<String>) -> Self {
        Self {
            entity_collection: entity_collection.into(),
            review_action: None,
        }
    }

    /// Filter entities by the selection recorded for this checkpointed action.
    pub fn with_review_action(mut self, action: impl Into<String>) -> Self {
        self.review_action = Some(action.into());
        self
    }

    pub fn entity_collection(&self) -> &str {
        &self.entity_collection
    }

    fn selection(&self, record: &SessionRecord) -> Option<BTreeSet<String>> {
        let action = self.review_action.as_ref()?;
        let outcome = record.action_outcomes.get(action)?;
        Some(selected_entities(outcome).into_iter().collect())
    }

    pub async fn compile(&self, record: &SessionRecord, store: &dyn ArtifactStore) -> Result<Report> {
        let session = &record.session_id;
        let artifacts = store.list(session, None).await?;
        let selection = self.selection(record);

        let raw_entities: Vec<&Artifact> = artifacts
            .iter()
            .filter(|a| a.path.collection == self.entity_collection)
            .collect();
        let mut entities: Vec<ReportEntity> = raw_entities
            .iter()
            .filter(|a| selection.as_ref().map_or(true, |s| s.contains(&a.path.entity_id)))
            .map(|a| ReportEntity {
                id: a.path.entity_id.clone(),
                payload: a.payload.clone(),
            })
            .collect();
        let entity_ids: BTreeSet<String> = entities.iter().map(|e| e.id.clone()).collect();

        let mut enrichment: BTreeMap<String, BTreeMap<String, Value>> = BTreeMap::new();
        for artifact in artifacts
            .iter()
            .filter(|a| !a.path.is_reserved() && a.path.collection != self.entity_collection)
        {
            let target = enrichment_target(artifact);
            if entity_ids.contains(&target) {
                enrichment
                    .entry(target)
                    .or_default()
                    .insert(artifact.path.collection.clone(), artifact.payload.clone());
            } else {
                debug!(session = %session, path = %artifact.path, entity = %target, "dropping enrichment without entity");
            }
        }

        let mut reasons: Vec<String> = Vec::new();
        for stage in record.plan.degraded_stages() {
            let detail = record
                .stage_outcomes
                .get(&stage.name)
                .and_then(|o| o.reasons.last().cloned())
                .unwrap_or_else(|| "no usable output".into());
            reasons.push(format!("stage '{}' degraded: {}", stage.name, detail));
        }

        let marker = read_marker(store.get(session, &completion_marker_path()).await?);
        let (source, summary, criteria_echo) = match marker {
            Marker::Valid { summary, criteria } => (
                ReportSource::CompletionMarker,
                summary,
                criteria.unwrap_or_else(|| record.criteria.clone()),
            ),
            marker => {
                reasons.push(match marker {
                    Marker::Malformed => "completion marker malformed".to_string(),
                    _ => "completion marker missing".to_string(),
                });
                if !record.plan.is_complete() {
                    let next = record
                        .plan
                        .next_pending()
                        .map(|s| s.name.clone())
                        .unwrap_or_default();
                    reasons.push(format!("plan incomplete at stage '{}'", next));
                }
                if !raw_entities.is_empty() {
                    let summary = format!(
                        "Compiled {} {} from stored artifacts; enrichment available for {}.",
                        entities.len(),
                        self.entity_collection,
                        enrichment.len()
                    );
                    (ReportSource::Synthesized, summary, record.criteria.clone())
                } else {
                    let transcript = store.transcript(session).await?;
                    entities = recover_entities(&transcript);
                    enrichment.clear();
                    reasons.push(format!(
                        "no {} artifacts; recovered {} from transcript",
                        self.entity_collection,
                        entities.len()
                    ));
                    let summary = format!(
                        "Recovered {} {} from the session transcript (best effort).",
                        entities.len(),
                        self.entity_collection
                    );
                    (ReportSource::Transcript, summary, record.criteria.clone())
                }
            }
        };

        let degraded = source != ReportSource::CompletionMarker || record.plan.degraded_stages().next().is_some();
        if source != ReportSource::CompletionMarker {
            warn!(session = %session, path = %source, reasons = ?reasons, "degraded compilation");
        } else if degraded {
            warn!(session = %session, reasons = ?reasons, "report compiled with degraded stages");
        }
        info!(session = %session, source = %source, entities = entities.len(), degraded, "report compiled");

        Ok(Report {
            criteria_echo,
            entities,
            enrichment_by_entity_id: enrichment,
            summary,
            generated_at: Utc::now(),
            degraded,
            degraded_reasons: reasons,
            source,
        })
    }
}
