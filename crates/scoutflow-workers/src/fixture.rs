//! Offline capability provider backed by a JSON fixture.
//!
//! ```json
//! {
//!   "search":    [{ "url": "...", "title": "..." }],
//!   "documents": { "<url>": { "address": "...", "price": 450000 } },
//!   "geocode":   { "<address>": { "lat": 30.26, "lon": -97.74 } },
//!   "pois":      [{ "name": "...", "category": "park", "lat": 30.2, "lon": -97.7 }]
//! }
//! ```

use crate::geo::haversine;
use async_trait::async_trait;
use scoutflow_core::{Error, Result};
use scoutflow_engine::{
    CandidateRef, CapabilitySet, ExtractCapability, GeoPoint, GeocodeCapability, ImageCapability,
    PointOfInterest, ProximityCapability, SearchCapability,
};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct FixtureCapabilities {
    search: Vec<CandidateRef>,
    documents: BTreeMap<String, Value>,
    geocode: BTreeMap<String, GeoPoint>,
    pois: Vec<PointOfInterest>,
}

impl FixtureCapabilities {
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| Error::ConfigError(format!("invalid fixture: {}", e)))
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await?;
        let fixture = Self::from_value(serde_json::from_str(&raw)?)?;
        info!(
            path = %path.display(),
            listings = fixture.search.len(),
            pois = fixture.pois.len(),
            "Loaded capability fixture"
        );
        Ok(fixture)
    }

    /// Every capability served from this fixture.
    pub fn into_capability_set(self) -> CapabilitySet {
        let shared = Arc::new(self);
        CapabilitySet::new()
            .with_search(shared.clone())
            .with_extract(shared.clone())
            .with_geocode(shared.clone())
            .with_nearby(shared.clone())
            .with_image(shared)
    }
}

#[async_trait]
impl SearchCapability for FixtureCapabilities {
    async fn search(&self, _query: &str, limit: usize) -> Result<Vec<CandidateRef>> {
        Ok(self.search.iter().take(limit).cloned().collect())
    }
}

#[async_trait]
impl ExtractCapability for FixtureCapabilities {
    async fn extract(&self, refs: &[CandidateRef]) -> Result<Vec<Value>> {
        Ok(refs
            .iter()
            .filter_map(|r| {
                let mut doc = self.documents.get(&r.url)?.clone();
                if let Some(obj) = doc.as_object_mut() {
                    obj.entry("listing_url").or_insert_with(|| Value::String(r.url.clone()));
                }
                Some(doc)
            })
            .collect())
    }
}

#[async_trait]
impl GeocodeCapability for FixtureCapabilities {
    /// Exact key first, then any key the text starts with.
    async fn geocode(&self, text: &str) -> Result<Option<GeoPoint>> {
        if let Some(p) = self.geocode.get(text) {
            return Ok(Some(*p));
        }
        let lowered = text.to_lowercase();
        Ok(self
            .geocode
            .iter()
            .find(|(k, _)| lowered.starts_with(&k.to_lowercase()))
            .map(|(_, p)| *p))
    }
}

#[async_trait]
impl ProximityCapability for FixtureCapabilities {
    async fn nearby(&self, at: GeoPoint, category: &str, radius_meters: u32) -> Result<Vec<PointOfInterest>> {
        Ok(self
            .pois
            .iter()
            .filter(|p| p.category == category)
            .filter(|p| haversine(at, GeoPoint { lat: p.lat, lon: p.lon }) <= radius_meters as f64)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ImageCapability for FixtureCapabilities {
    async fn generate(&self, image_ref: &str, description: &str) -> Result<String> {
        let slug: String = description
            .split_whitespace()
            .take(6)
            .map(|w| w.trim_matches(|c: char| !c.is_ascii_alphanumeric()).to_lowercase())
            .filter(|w| !w.is_empty())
            .collect::<Vec<_>>()
            .join("-");
        Ok(format!("fixture://generated/{}?source={}", slug, image_ref))
    }
}
