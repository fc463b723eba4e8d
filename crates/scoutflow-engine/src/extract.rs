//! Best-effort recovery of structured entities from transcript text.
//!
//! Lossy by nature: only used when neither a completion marker nor any
//! entity artifact exists.

use regex::Regex;
use scoutflow_core::{ReportEntity, TranscriptEntry};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::OnceLock;

fn fenced_block() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```(?:json)?[ \t]*\n?(.*?)```").ok())
        .as_ref()
}

/// Every balanced top-level `{...}` span in `text`, string-literal aware.
fn brace_spans(text: &str) -> Vec<&str> {
    let mut spans = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        spans.push(&text[s..=i]);
                    }
                }
            }
            _ => {}
        }
    }
    spans
}

/// JSON values embedded in `text`: fenced blocks first, then bare objects
/// in the text outside the fences.
pub fn json_fragments(text: &str) -> Vec<Value> {
    let mut out = Vec::new();
    let mut rest = String::with_capacity(text.len());
    let mut last = 0;
    let captures = fenced_block().into_iter().flat_map(|re| re.captures_iter(text));
    for cap in captures {
        let (Some(whole), Some(body)) = (cap.get(0), cap.get(1)) else {
            continue;
        };
        rest.push_str(&text[last..whole.start()]);
        last = whole.end();
        if let Ok(v) = serde_json::from_str::<Value>(body.as_str().trim()) {
            out.push(v);
        }
    }
    rest.push_str(&text[last..]);
    for span in brace_spans(&rest) {
        if let Ok(v) = serde_json::from_str::<Value>(span) {
            out.push(v);
        }
    }
    out
}

fn entity_id(v: &Value) -> Option<String> {
    match v.get("id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn collect(v: &Value, found: &mut BTreeMap<String, Value>, anon: &mut usize) {
    if let Some(id) = entity_id(v) {
        found.insert(id, v.clone());
        return;
    }
    for key in ["properties", "entities"] {
        if let Some(items) = v.get(key).and_then(Value::as_array) {
            for item in items.iter().filter(|i| i.is_object()) {
                let id = entity_id(item).unwrap_or_else(|| {
                    *anon += 1;
                    format!("recovered_{:03}", *anon)
                });
                found.insert(id, item.clone());
            }
        }
    }
}

/// Entities recovered from a transcript, deduplicated by id (last mention
/// wins) and ordered by id.
pub fn recover_entities(transcript: &[TranscriptEntry]) -> Vec<ReportEntity> {
    let mut found = BTreeMap::new();
    let mut anon = 0usize;
    for entry in transcript {
        for fragment in json_fragments(&entry.text) {
            match &fragment {
                Value::Array(items) => items.iter().for_each(|i| collect(i, &mut found, &mut anon)),
                other => collect(other, &mut found, &mut anon),
            }
        }
    }
    found
        .into_iter()
        .map(|(id, payload)| ReportEntity { id, payload })
        .collect()
}
