//! Decoration worker: one staged image per approved property, in the
//! interior style named by the criteria.

use crate::criteria::ApprovedSelection;
use crate::property::Property;
use chrono::Utc;
use scoutflow_core::{Capability, Result, Summary, WorkItem};
use scoutflow_engine::{Worker, WorkerContext};
use serde_json::json;
use std::collections::BTreeSet;
use tracing::{debug, info};

pub struct DecorationWorker {
    source_collection: String,
    output_collection: String,
}

impl DecorationWorker {
    pub fn new(source_collection: impl Into<String>, output_collection: impl Into<String>) -> Self {
        Self {
            source_collection: source_collection.into(),
            output_collection: output_collection.into(),
        }
    }
}

fn staging_prompt(style: &str, property: &Property) -> String {
    let kind = if property.property_type.is_empty() { "home" } else { property.property_type.as_str() };
    format!(
        "Redecorate this {} interior in a {} style. Keep the room layout, windows and architecture unchanged.",
        kind, style
    )
}

#[async_trait::async_trait]
impl Worker for DecorationWorker {
    fn name(&self) -> &str {
        "decoration"
    }

    fn description(&self) -> &str {
        "Generates a restyled interior image for each approved property that has photos."
    }

    fn capabilities(&self) -> BTreeSet<Capability> {
        [Capability::ImageGeneration].into_iter().collect()
    }

    async fn dispatch(&self, item: &WorkItem, ctx: &WorkerContext) -> Result<Summary> {
        let selection = ApprovedSelection::from_value(&item.criteria)?;
        let Some(style) = selection.criteria.decoration_style.as_deref() else {
            return Ok(Summary::new("No decoration style requested."));
        };

        let mut decorated = Vec::new();
        for id in &selection.entity_ids {
            let Some(property) = ctx
                .artifacts()
                .get(&self.source_collection, id)
                .await?
                .and_then(|p| Property::from_artifact(&p))
            else {
                continue;
            };
            let Some(source) = property.image_urls.first() else {
                debug!(session = %ctx.session_id(), entity = %id, "no photo to decorate");
                continue;
            };
            let prompt = staging_prompt(style, &property);
            let asset = ctx.capabilities().generate(source, &prompt).await?;
            ctx.artifacts()
                .put(
                    &self.output_collection,
                    id,
                    json!({
                        "entity_id": id,
                        "style": style,
                        "source_image": source,
                        "asset_ref": asset,
                        "prompt": prompt,
                        "generated_at": Utc::now(),
                    }),
                )
                .await?;
            decorated.push(id.clone());
        }

        info!(session = %ctx.session_id(), style, decorated = decorated.len(), "decoration finished");
        Ok(Summary::new(format!(
            "Generated {} {} interiors.",
            decorated.len(),
            style
        ))
        .with_entities(decorated))
    }
}
