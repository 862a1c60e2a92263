//! Lenient forecast response parsing.
//!
//! The interval array is looked up under `data`, then `forecast`, then the
//! root itself, then the first array found anywhere in the document.
//! Entries without a parseable start time or a finite numeric `value` are
//! skipped; a missing end time defaults to start + 5 minutes.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde_json::Value;
use tracing::debug;

use crate::ForecastPoint;
use carbon_core::SLOT_MINUTES;

const START_KEYS: &[&str] = &["point_time", "start", "timestamp"];
const END_KEYS: &[&str] = &["end", "end_time"];

/// Parse a forecast body into points in document order.
///
/// Malformed JSON yields an empty list.
pub fn parse_forecast(body: &str) -> Vec<ForecastPoint> {
    let root: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, "forecast body is not JSON");
            return Vec::new();
        }
    };

    let Some(entries) = find_interval_array(&root) else {
        return Vec::new();
    };

    entries.iter().filter_map(parse_entry).collect()
}

fn find_interval_array(root: &Value) -> Option<&Vec<Value>> {
    if let Value::Object(map) = root {
        for key in ["data", "forecast"] {
            if let Some(Value::Array(arr)) = map.get(key) {
                return Some(arr);
            }
        }
    }
    first_array(root)
}

/// Depth-first search for the first array in document order, the root included
fn first_array(value: &Value) -> Option<&Vec<Value>> {
    match value {
        Value::Array(arr) => Some(arr),
        Value::Object(map) => map.values().find_map(first_array),
        _ => None,
    }
}

fn parse_entry(entry: &Value) -> Option<ForecastPoint> {
    let obj = entry.as_object()?;

    let start = START_KEYS
        .iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str).and_then(parse_timestamp))?;
    let end = END_KEYS
        .iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str).and_then(parse_timestamp))
        .unwrap_or(start + Duration::minutes(SLOT_MINUTES));

    let value = obj.get("value").and_then(Value::as_f64)?;
    if !value.is_finite() {
        return None;
    }

    Some(ForecastPoint { start, end, value })
}

/// RFC 3339, or a naive timestamp taken as UTC
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}
