//! Location analysis worker.
//!
//! For every approved property: geocode the address, query each POI category
//! concurrently, rank by distance and derive pros/cons. Writes
//! `locations/{entity_id}.json`.

use crate::criteria::ApprovedSelection;
use crate::geo::haversine;
use crate::property::Property;
use futures::future::join_all;
use scoutflow_core::config::EnrichmentConfig;
use scoutflow_core::{Capability, Result, Summary, WorkItem};
use scoutflow_engine::{GeoPoint, PointOfInterest, Worker, WorkerContext};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct NearbyPoi {
    pub name: String,
    pub category: String,
    pub distance_meters: f64,
    #[serde(default)]
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LocationAnalysis {
    pub entity_id: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub nearby_pois: Vec<NearbyPoi>,
    #[serde(default)]
    pub pros: Vec<String>,
    #[serde(default)]
    pub cons: Vec<String>,
}

fn label(category: &str, n: usize) -> String {
    let (one, many) = match category {
        "restaurant" => ("restaurant", "restaurants"),
        "cafe" => ("cafe", "cafes"),
        "park" => ("park", "parks"),
        "shopping" => ("shopping option", "shopping options"),
        "transit_station" => ("transit station", "transit stations"),
        "school" => ("school", "schools"),
        "hospital" => ("hospital", "hospitals"),
        "gym" => ("gym", "gyms"),
        other => (other, other),
    };
    let word = if n == 1 { one } else { many };
    word.replace('_', " ")
}

fn km(meters: f64) -> String {
    format!("{:.1} km", meters / 1000.0)
}

/// Pros and cons from POIs grouped by category. Categories are visited in
/// the configured order so the wording is stable.
pub fn assess(categories: &[String], pois: &[NearbyPoi], walking_meters: f64, radius_meters: u32) -> (Vec<String>, Vec<String>) {
    let mut by_category: BTreeMap<&str, Vec<&NearbyPoi>> = BTreeMap::new();
    for poi in pois {
        by_category.entry(poi.category.as_str()).or_default().push(poi);
    }
    for found in by_category.values_mut() {
        found.sort_by(|a, b| a.distance_meters.total_cmp(&b.distance_meters));
    }
    let (mut pros, mut cons) = (Vec::new(), Vec::new());
    for category in categories {
        let Some(found) = by_category.get(category.as_str()) else {
            cons.push(format!("No {} within {}", label(category, 2), km(radius_meters as f64)));
            continue;
        };
        let walkable: Vec<&&NearbyPoi> = found.iter().filter(|p| p.distance_meters <= walking_meters).collect();
        match walkable.first() {
            Some(closest) => pros.push(format!(
                "{} {} within {} (closest: {}, {})",
                walkable.len(),
                label(category, walkable.len()),
                km(walking_meters),
                closest.name,
                km(closest.distance_meters)
            )),
            None => {
                if let Some(nearest) = found.first() {
                    cons.push(format!(
                        "Nearest {} is {} away",
                        label(category, 1),
                        km(nearest.distance_meters)
                    ));
                }
            }
        }
    }
    (pros, cons)
}

pub struct LocationAnalysisWorker {
    source_collection: String,
    output_collection: String,
    config: EnrichmentConfig,
}

impl LocationAnalysisWorker {
    pub fn new(source_collection: impl Into<String>, output_collection: impl Into<String>, config: EnrichmentConfig) -> Self {
        Self {
            source_collection: source_collection.into(),
            output_collection: output_collection.into(),
            config,
        }
    }

    async fn analyse(&self, ctx: &WorkerContext, property: &Property) -> Result<Option<LocationAnalysis>> {
        let caps = ctx.capabilities();
        let Some(at) = caps.geocode(&property.full_address()).await? else {
            warn!(session = %ctx.session_id(), entity = %property.id, "address did not geocode");
            ctx.note(format!("could not geocode {} ({})", property.id, property.full_address()))
                .await?;
            return Ok(None);
        };

        let lookups = self
            .config
            .categories
            .iter()
            .map(|c| caps.nearby(at, c, self.config.radius_meters));
        let results = join_all(lookups).await;

        let mut pois = Vec::new();
        for (category, result) in self.config.categories.iter().zip(results) {
            let mut found: Vec<NearbyPoi> = match result {
                Ok(found) => found.into_iter().map(|p| to_nearby(at, p)).collect(),
                Err(e) if e.is_budget_exhaustion() => return Err(e),
                Err(e) => {
                    warn!(session = %ctx.session_id(), entity = %property.id, category = %category, error = %e, "nearby lookup failed");
                    continue;
                }
            };
            found.sort_by(|a, b| a.distance_meters.total_cmp(&b.distance_meters));
            found.truncate(self.config.per_category_limit);
            pois.extend(found);
        }

        let (pros, cons) = assess(
            &self.config.categories,
            &pois,
            self.config.walking_distance_meters,
            self.config.radius_meters,
        );
        Ok(Some(LocationAnalysis {
            entity_id: property.id.clone(),
            latitude: at.lat,
            longitude: at.lon,
            nearby_pois: pois,
            pros,
            cons,
        }))
    }
}

fn to_nearby(at: GeoPoint, poi: PointOfInterest) -> NearbyPoi {
    NearbyPoi {
        distance_meters: haversine(at, GeoPoint { lat: poi.lat, lon: poi.lon }),
        name: poi.name,
        category: poi.category,
        address: poi.address.unwrap_or_default(),
        latitude: poi.lat,
        longitude: poi.lon,
    }
}

#[async_trait::async_trait]
impl Worker for LocationAnalysisWorker {
    fn name(&self) -> &str {
        "location_analysis"
    }

    fn description(&self) -> &str {
        "Finds nearby points of interest for each approved property and weighs location pros and cons."
    }

    fn capabilities(&self) -> BTreeSet<Capability> {
        [Capability::Geocode, Capability::Nearby].into_iter().collect()
    }

    async fn dispatch(&self, item: &WorkItem, ctx: &WorkerContext) -> Result<Summary> {
        let selection = ApprovedSelection::from_value(&item.criteria)?;
        let mut analysed = Vec::new();

        for id in &selection.entity_ids {
            let Some(payload) = ctx.artifacts().get(&self.source_collection, id).await? else {
                warn!(session = %ctx.session_id(), entity = %id, "approved property has no artifact");
                continue;
            };
            let Some(property) = Property::from_artifact(&payload) else {
                warn!(session = %ctx.session_id(), entity = %id, "stored property is malformed");
                continue;
            };
            if let Some(analysis) = self.analyse(ctx, &property).await? {
                ctx.artifacts()
                    .put(&self.output_collection, id, serde_json::to_value(&analysis)?)
                    .await?;
                analysed.push(id.clone());
            }
        }

        info!(
            session = %ctx.session_id(),
            approved = selection.entity_ids.len(),
            analysed = analysed.len(),
            "location analysis finished"
        );
        Ok(Summary::new(format!(
            "Analysed the location of {} of {} properties.",
            analysed.len(),
            selection.entity_ids.len()
        ))
        .with_entities(analysed))
    }
}
