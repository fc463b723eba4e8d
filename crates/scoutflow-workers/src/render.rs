//! Plain-text rendering of a compiled report.

use crate::criteria::SearchCriteria;
use crate::property::Property;
use crate::workers::location::LocationAnalysis;
use scoutflow_core::{Report, ReportSource};
use std::collections::BTreeMap;

const WIDE: usize = 80;
const NARROW: usize = 40;
const DESCRIPTION_LIMIT: usize = 300;

/// `$1,234,567` (whole dollars).
pub fn dollars(amount: f64) -> String {
    let whole = amount.round().abs() as u64;
    let digits = whole.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 2);
    if amount < 0.0 && whole > 0 {
        out.push('-');
    }
    out.push('$');
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

fn grouped(n: u32) -> String {
    dollars(n as f64).trim_start_matches('$').to_string()
}

fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let cut: String = text.chars().take(limit).collect();
    format!("{}...", cut)
}

fn title_case(category: &str) -> String {
    category
        .split('_')
        .map(|w| {
            let mut c = w.chars();
            match c.next() {
                Some(first) => first.to_uppercase().chain(c).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn banner(out: &mut String, ch: char, width: usize) {
    out.push_str(&format!("{}\n", ch.to_string().repeat(width)));
}

fn render_criteria(out: &mut String, report: &Report) {
    match SearchCriteria::from_value(&report.criteria_echo) {
        Ok(c) => {
            out.push_str(&format!("Location: {}\n", c.location));
            if let Some(max) = c.max_price {
                out.push_str(&format!("Price Range: {} - {}\n", dollars(c.min_price.unwrap_or(0.0)), dollars(max)));
            }
            if let Some(beds) = c.min_bedrooms {
                out.push_str(&format!("Bedrooms: {}+\n", beds));
            }
            if let Some(baths) = c.min_bathrooms {
                out.push_str(&format!("Bathrooms: {}+\n", baths));
            }
            if !c.property_types.is_empty() {
                out.push_str(&format!("Property Types: {}\n", c.property_types.join(", ")));
            }
            if let Some(style) = &c.decoration_style {
                out.push_str(&format!("Decoration Style: {}\n", style));
            }
        }
        Err(_) => {
            out.push_str(&format!("{}\n", report.criteria_echo));
        }
    }
}

fn render_location(out: &mut String, analysis: &LocationAnalysis) {
    out.push('\n');
    out.push_str("LOCATION ANALYSIS\n");
    banner(out, '-', NARROW);
    if !analysis.pros.is_empty() {
        out.push_str("Pros:\n");
        for pro in &analysis.pros {
            out.push_str(&format!("  + {}\n", pro));
        }
    }
    if !analysis.cons.is_empty() {
        out.push_str("Cons:\n");
        for con in &analysis.cons {
            out.push_str(&format!("  - {}\n", con));
        }
    }
    if analysis.nearby_pois.is_empty() {
        return;
    }
    out.push('\n');
    out.push_str(&format!("Nearby Points of Interest: {} found\n", analysis.nearby_pois.len()));
    let mut by_category: BTreeMap<&str, Vec<_>> = BTreeMap::new();
    for poi in &analysis.nearby_pois {
        by_category.entry(poi.category.as_str()).or_default().push(poi);
    }
    for (category, mut pois) in by_category {
        pois.sort_by(|a, b| a.distance_meters.total_cmp(&b.distance_meters));
        out.push_str(&format!("  {}: {} locations\n", title_case(category), pois.len()));
        for poi in pois.iter().take(2) {
            out.push_str(&format!("    - {} ({:.1}km)\n", poi.name, poi.distance_meters / 1000.0));
        }
    }
}

/// Human-readable report, one section per entity.
pub fn render_report_text(report: &Report) -> String {
    let mut out = String::new();
    banner(&mut out, '=', WIDE);
    out.push_str("PROPERTY SEARCH REPORT\n");
    banner(&mut out, '=', WIDE);
    if report.degraded {
        let source = match report.source {
            ReportSource::CompletionMarker => "submitted report",
            ReportSource::Synthesized => "stored artifacts",
            ReportSource::Transcript => "session transcript (best effort)",
        };
        out.push_str(&format!("DEGRADED: compiled from {}\n", source));
        for reason in &report.degraded_reasons {
            out.push_str(&format!("  * {}\n", reason));
        }
    }
    out.push('\n');

    out.push_str("SUMMARY\n");
    banner(&mut out, '-', WIDE);
    out.push_str(&format!("{}\n", report.summary));
    out.push('\n');

    out.push_str("SEARCH CRITERIA\n");
    banner(&mut out, '-', WIDE);
    render_criteria(&mut out, report);
    out.push('\n');

    out.push_str("PROPERTIES\n");
    banner(&mut out, '=', WIDE);
    for (idx, entity) in report.entities.iter().enumerate() {
        out.push('\n');
        let enrichment = report.enrichment_by_entity_id.get(&entity.id);
        match Property::from_artifact(&entity.payload) {
            Some(p) => {
                out.push_str(&format!("PROPERTY #{}: {}\n", idx + 1, p.full_address()));
                banner(&mut out, '-', WIDE);
                out.push_str(&format!("Price: {}\n", dollars(p.price)));
                out.push_str(&format!("Bedrooms: {} | Bathrooms: {}\n", p.bedrooms, p.bathrooms));
                if p.square_feet > 0 {
                    out.push_str(&format!("Square Feet: {}\n", grouped(p.square_feet)));
                }
                if !p.property_type.is_empty() {
                    out.push_str(&format!("Type: {}\n", p.property_type));
                }
                if !p.listing_url.is_empty() {
                    out.push_str(&format!("Listing URL: {}\n", p.listing_url));
                }
                if let Some(first) = p.image_urls.first() {
                    out.push_str(&format!("Images: {} available\n", p.image_urls.len()));
                    out.push_str(&format!("  - {}\n", first));
                }
                if !p.description.is_empty() {
                    out.push('\n');
                    out.push_str("Description:\n");
                    out.push_str(&format!("{}\n", truncate(&p.description, DESCRIPTION_LIMIT)));
                }
            }
            None => {
                out.push_str(&format!("PROPERTY #{}: {}\n", idx + 1, entity.id));
                banner(&mut out, '-', WIDE);
                out.push_str(&format!("{}\n", entity.payload));
            }
        }
        if let Some(decoration) = enrichment.and_then(|e| e.get("decorations")) {
            if let Some(asset) = decoration.get("asset_ref").and_then(|v| v.as_str()) {
                let style = decoration.get("style").and_then(|v| v.as_str()).unwrap_or("restyled");
                out.push_str(&format!("Decorated ({}): {}\n", style, asset));
            }
        }
        if let Some(analysis) = enrichment
            .and_then(|e| e.get("locations"))
            .and_then(|v| serde_json::from_value::<LocationAnalysis>(v.clone()).ok())
        {
            render_location(&mut out, &analysis);
        }
    }
    out.push('\n');
    banner(&mut out, '=', WIDE);
    out.push_str(&format!("Report generated: {}\n", report.generated_at.format("%Y-%m-%d %H:%M:%S")));
    banner(&mut out, '=', WIDE);
    out
}
