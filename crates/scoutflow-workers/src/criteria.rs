//! Search criteria and the inputs handed to enrichment/compile workers.

use crate::property::Property;
use scoutflow_core::{Error, Result};
use scoutflow_engine::CriteriaAdjuster;
use serde::{Deserialize, Serialize};
use serde_json::Value;

fn default_max_results() -> usize {
    10
}

/// What the user is looking for.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SearchCriteria {
    /// City, neighbourhood or zip code.
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_bedrooms: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_bedrooms: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_bathrooms: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub property_types: Vec<String>,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    /// Interior style for staged images; no decoration when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decoration_style: Option<String>,
}

impl SearchCriteria {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            min_price: None,
            max_price: None,
            min_bedrooms: None,
            max_bedrooms: None,
            min_bathrooms: None,
            property_types: Vec::new(),
            max_results: default_max_results(),
            decoration_style: None,
        }
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let criteria: Self = serde_json::from_value(value.clone())
            .map_err(|e| Error::InvalidCriteria(e.to_string()))?;
        if criteria.location.trim().is_empty() {
            return Err(Error::InvalidCriteria("a location is required".into()));
        }
        Ok(criteria)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Free-text query for the search capability.
    pub fn query(&self) -> String {
        let mut parts = Vec::new();
        if let Some(beds) = self.min_bedrooms {
            parts.push(format!("{}+ bedroom", beds));
        }
        if self.property_types.is_empty() {
            parts.push("homes".to_string());
        } else {
            parts.push(self.property_types.join(" or "));
        }
        parts.push(format!("for sale in {}", self.location));
        match (self.min_price, self.max_price) {
            (Some(lo), Some(hi)) => parts.push(format!("between ${:.0} and ${:.0}", lo, hi)),
            (None, Some(hi)) => parts.push(format!("under ${:.0}", hi)),
            (Some(lo), None) => parts.push(format!("over ${:.0}", lo)),
            (None, None) => {}
        }
        parts.join(" ")
    }

    /// Whether a listing satisfies every constraint that is set.
    pub fn matches(&self, p: &Property) -> bool {
        let type_ok = self.property_types.is_empty()
            || self
                .property_types
                .iter()
                .any(|t| t.eq_ignore_ascii_case(&p.property_type));
        self.min_price.map_or(true, |v| p.price >= v)
            && self.max_price.map_or(true, |v| p.price <= v)
            && self.min_bedrooms.map_or(true, |v| p.bedrooms >= v)
            && self.max_bedrooms.map_or(true, |v| p.bedrooms <= v)
            && self.min_bathrooms.map_or(true, |v| p.bathrooms >= v)
            && type_ok
    }

    /// Criteria for a re-dispatch: attempt 2 drops property types, attempt 3
    /// also drops the bedroom and bathroom minimums. Price bounds stay.
    pub fn relaxed(&self, attempt: u32) -> Self {
        let mut out = self.clone();
        if attempt >= 2 {
            out.property_types.clear();
        }
        if attempt >= 3 {
            out.min_bedrooms = None;
            out.min_bathrooms = None;
        }
        out
    }
}

/// Retry adjuster for the search stage.
pub struct RelaxSearchCriteria;

impl CriteriaAdjuster for RelaxSearchCriteria {
    fn adjust(&self, criteria: &Value, attempt: u32) -> Value {
        match SearchCriteria::from_value(criteria) {
            Ok(c) => c.relaxed(attempt).to_value(),
            Err(_) => criteria.clone(),
        }
    }
}

/// Input of stages that run after the review: the original criteria plus
/// the approved entity ids.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ApprovedSelection {
    pub criteria: SearchCriteria,
    #[serde(default)]
    pub entity_ids: Vec<String>,
}

impl ApprovedSelection {
    pub fn from_value(value: &Value) -> Result<Self> {
        let criteria = SearchCriteria::from_value(value.get("criteria").unwrap_or(&Value::Null))?;
        let entity_ids = value
            .get("entity_ids")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).map(String::from).collect())
            .unwrap_or_default();
        Ok(Self { criteria, entity_ids })
    }
}
