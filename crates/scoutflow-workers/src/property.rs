//! Property records normalised from extracted listing documents.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Property {
    pub id: String,
    pub address: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub zip_code: String,
    pub price: f64,
    #[serde(default)]
    pub bedrooms: u32,
    #[serde(default)]
    pub bathrooms: f64,
    #[serde(default)]
    pub square_feet: u32,
    #[serde(default)]
    pub property_type: String,
    #[serde(default)]
    pub listing_url: String,
    #[serde(default)]
    pub image_urls: Vec<String>,
    #[serde(default)]
    pub description: String,
}

fn non_numeric() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^0-9.]").ok()).as_ref()
}

/// Numbers as listing sites print them: `450000`, `"$450,000"`, `"2.5 ba"`.
fn number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned = match non_numeric() {
                Some(re) => re.replace_all(s, "").into_owned(),
                None => s.chars().filter(|c| c.is_ascii_digit() || *c == '.').collect(),
            };
            cleaned.parse().ok()
        }
        _ => None,
    }
}

/// First present field among `keys`.
fn field<'a>(doc: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| doc.get(*k).filter(|v| !v.is_null()))
}

fn text(doc: &Value, keys: &[&str]) -> String {
    field(doc, keys)
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

impl Property {
    /// Normalise an extracted document. Needs at least an address and a
    /// price; everything else falls back to empty/zero.
    pub fn from_document(id: impl Into<String>, doc: &Value) -> Option<Self> {
        let address = text(doc, &["address", "street_address", "street"]);
        let price = field(doc, &["price", "list_price", "listing_price"]).and_then(number)?;
        if address.is_empty() {
            return None;
        }
        let image_urls = field(doc, &["image_urls", "images", "photos"])
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).map(String::from).collect())
            .unwrap_or_default();
        Some(Self {
            id: id.into(),
            address,
            city: text(doc, &["city"]),
            state: text(doc, &["state"]),
            zip_code: match field(doc, &["zip_code", "zip", "postal_code"]) {
                Some(Value::Number(n)) => n.to_string(),
                Some(Value::String(s)) => s.trim().to_string(),
                _ => String::new(),
            },
            price,
            bedrooms: field(doc, &["bedrooms", "beds"]).and_then(number).unwrap_or(0.0) as u32,
            bathrooms: field(doc, &["bathrooms", "baths"]).and_then(number).unwrap_or(0.0),
            square_feet: field(doc, &["square_feet", "sqft", "living_area"])
                .and_then(number)
                .unwrap_or(0.0) as u32,
            property_type: text(doc, &["property_type", "type", "home_type"]).to_lowercase(),
            listing_url: text(doc, &["listing_url", "url"]),
            image_urls,
            description: text(doc, &["description", "content"]),
        })
    }

    /// Read a stored property artifact back.
    pub fn from_artifact(payload: &Value) -> Option<Self> {
        serde_json::from_value(payload.clone()).ok()
    }

    /// One-line address including city/state when known.
    pub fn full_address(&self) -> String {
        let mut parts = vec![self.address.clone()];
        for part in [&self.city, &self.state] {
            if !part.is_empty() && !self.address.contains(part.as_str()) {
                parts.push(part.clone());
            }
        }
        parts.join(", ")
    }

    /// Same listing seen twice under different ids.
    pub fn same_listing(&self, other: &Property) -> bool {
        if !self.listing_url.is_empty() && self.listing_url == other.listing_url {
            return true;
        }
        self.address.eq_ignore_ascii_case(&other.address)
    }

    #[cfg(test)]
    pub(crate) fn placeholder(id: &str) -> Self {
        Self {
            id: id.into(),
            address: "1 Main St".into(),
            city: String::new(),
            state: String::new(),
            zip_code: String::new(),
            price: 0.0,
            bedrooms: 0,
            bathrooms: 0.0,
            square_feet: 0,
            property_type: String::new(),
            listing_url: String::new(),
            image_urls: Vec::new(),
            description: String::new(),
        }
    }
}
