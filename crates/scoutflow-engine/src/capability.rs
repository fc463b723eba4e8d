//! External capability contracts and the budget-metered gateway workers
//! call them through.
//!
//! Concrete vendors (search engines, geocoders, image models) live outside
//! this crate; anything implementing these traits can be plugged into a
//! `CapabilitySet`.

use async_trait::async_trait;
use scoutflow_core::{Budget, Capability, Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// A search hit worth extracting.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CandidateRef {
    pub url: String,
    #[serde(default)]
    pub title: String,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PointOfInterest {
    pub name: String,
    pub category: String,
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub rating: Option<f64>,
}

#[async_trait]
pub trait SearchCapability: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<CandidateRef>>;
}

#[async_trait]
pub trait ExtractCapability: Send + Sync {
    async fn extract(&self, refs: &[CandidateRef]) -> Result<Vec<Value>>;
}

#[async_trait]
pub trait GeocodeCapability: Send + Sync {
    /// `Ok(None)` when the text does not resolve to a location.
    async fn geocode(&self, text: &str) -> Result<Option<GeoPoint>>;
}

#[async_trait]
pub trait ProximityCapability: Send + Sync {
    async fn nearby(&self, at: GeoPoint, category: &str, radius_meters: u32) -> Result<Vec<PointOfInterest>>;
}

#[async_trait]
pub trait ImageCapability: Send + Sync {
    /// Returns a reference to the generated asset.
    async fn generate(&self, image_ref: &str, description: &str) -> Result<String>;
}

/// Providers available to the pipeline. Missing providers surface as
/// `CapabilityUnavailable` when a worker tries to use them.
#[derive(Clone, Default)]
pub struct CapabilitySet {
    pub search: Option<Arc<dyn SearchCapability>>,
    pub extract: Option<Arc<dyn ExtractCapability>>,
    pub geocode: Option<Arc<dyn GeocodeCapability>>,
    pub nearby: Option<Arc<dyn ProximityCapability>>,
    pub image: Option<Arc<dyn ImageCapability>>,
}

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_search(mut self, p: Arc<dyn SearchCapability>) -> Self {
        self.search = Some(p);
        self
    }

    pub fn with_extract(mut self, p: Arc<dyn ExtractCapability>) -> Self {
        self.extract = Some(p);
        self
    }

    pub fn with_geocode(mut self, p: Arc<dyn GeocodeCapability>) -> Self {
        self.geocode = Some(p);
        self
    }

    pub fn with_nearby(mut self, p: Arc<dyn ProximityCapability>) -> Self {
        self.nearby = Some(p);
        self
    }

    pub fn with_image(mut self, p: Arc<dyn ImageCapability>) -> Self {
        self.image = Some(p);
        self
    }

    pub fn provides(&self, capability: Capability) -> bool {
        match capability {
            Capability::Search => self.search.is_some(),
            Capability::Extract => self.extract.is_some(),
            Capability::Geocode => self.geocode.is_some(),
            Capability::Nearby => self.nearby.is_some(),
            Capability::ImageGeneration => self.image.is_some(),
        }
    }
}

/// Per-dispatch call counter. Shared by concurrent calls of one worker.
#[derive(Debug)]
pub struct BudgetMeter {
    limits: Budget,
    used: Mutex<BTreeMap<Capability, u32>>,
}

impl BudgetMeter {
    pub fn new(limits: Budget) -> Self {
        Self {
            limits,
            used: Mutex::new(BTreeMap::new()),
        }
    }

    /// Take one unit of `capability`, or fail without consuming anything.
    pub fn consume(&self, capability: Capability) -> Result<()> {
        let limit = self.limits.limit(capability);
        let mut used = self
            .used
            .lock()
            .map_err(|_| Error::Internal("budget meter poisoned".into()))?;
        let count = used.entry(capability).or_insert(0);
        if *count >= limit {
            return Err(Error::CapabilityBudgetExceeded { capability, limit });
        }
        *count += 1;
        Ok(())
    }

    pub fn used(&self, capability: Capability) -> u32 {
        self.used
            .lock()
            .map(|u| u.get(&capability).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn remaining(&self, capability: Capability) -> u32 {
        self.limits.limit(capability).saturating_sub(self.used(capability))
    }
}

/// What a worker actually calls: permission check, budget accounting and a
/// per-call timeout in front of every provider.
#[derive(Clone)]
pub struct BudgetedCapabilities {
    providers: Arc<CapabilitySet>,
    permitted: BTreeSet<Capability>,
    meter: Arc<BudgetMeter>,
    call_timeout: Duration,
}

impl BudgetedCapabilities {
    pub fn new(
        providers: Arc<CapabilitySet>,
        permitted: BTreeSet<Capability>,
        budget: Budget,
        call_timeout: Duration,
    ) -> Self {
        Self {
            providers,
            permitted,
            meter: Arc::new(BudgetMeter::new(budget)),
            call_timeout,
        }
    }

    pub fn meter(&self) -> &BudgetMeter {
        &self.meter
    }

    pub fn is_permitted(&self, capability: Capability) -> bool {
        self.permitted.contains(&capability)
    }

    fn admit(&self, capability: Capability) -> Result<()> {
        if !self.permitted.contains(&capability) {
            return Err(Error::CapabilityNotPermitted(capability));
        }
        if !self.providers.provides(capability) {
            return Err(Error::CapabilityUnavailable(capability));
        }
        self.meter.consume(capability)?;
        debug!(
            capability = %capability,
            remaining = self.meter.remaining(capability),
            "capability call admitted"
        );
        Ok(())
    }

    async fn bounded<T>(&self, capability: Capability, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.call_timeout, fut)
            .await
            .map_err(|_| Error::timeout(capability.as_str(), self.call_timeout.as_secs()))?
    }

    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<CandidateRef>> {
        self.admit(Capability::Search)?;
        let p = self.providers.search.clone().ok_or(Error::CapabilityUnavailable(Capability::Search))?;
        self.bounded(Capability::Search, p.search(query, limit)).await
    }

    pub async fn extract(&self, refs: &[CandidateRef]) -> Result<Vec<Value>> {
        self.admit(Capability::Extract)?;
        let p = self.providers.extract.clone().ok_or(Error::CapabilityUnavailable(Capability::Extract))?;
        self.bounded(Capability::Extract, p.extract(refs)).await
    }

    pub async fn geocode(&self, text: &str) -> Result<Option<GeoPoint>> {
        self.admit(Capability::Geocode)?;
        let p = self.providers.geocode.clone().ok_or(Error::CapabilityUnavailable(Capability::Geocode))?;
        self.bounded(Capability::Geocode, p.geocode(text)).await
    }

    pub async fn nearby(&self, at: GeoPoint, category: &str, radius_meters: u32) -> Result<Vec<PointOfInterest>> {
        self.admit(Capability::Nearby)?;
        let p = self.providers.nearby.clone().ok_or(Error::CapabilityUnavailable(Capability::Nearby))?;
        self.bounded(Capability::Nearby, p.nearby(at, category, radius_meters)).await
    }

    pub async fn generate(&self, image_ref: &str, description: &str) -> Result<String> {
        self.admit(Capability::ImageGeneration)?;
        let p = self
            .providers
            .image
            .clone()
            .ok_or(Error::CapabilityUnavailable(Capability::ImageGeneration))?;
        self.bounded(Capability::ImageGeneration, p.generate(image_ref, description)).await
    }
}
