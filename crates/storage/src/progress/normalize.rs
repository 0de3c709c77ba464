//! Lenient decoding of persisted or remote progress JSON.
//!
//! Stored snapshots come from older clients and other devices, so every
//! field is optional and loosely typed. Unreadable fields fall back to their
//! zero value instead of failing the whole snapshot.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::btree_map::Entry;

use vocab_core::merge::newer;
use vocab_core::model::{ProgressKey, ProgressMap, ProgressRecord};
use vocab_core::time::epoch;

/// Decode a progress object into normalized records.
///
/// Returns `None` if `value` is not a JSON object. Entries whose value is
/// not an object are dropped. Keys are rewritten to the current layout; when
/// a legacy key and a current key name the same item, the newer record wins.
#[must_use]
pub fn normalize_map(value: &Value) -> Option<ProgressMap> {
    let entries = value.as_object()?;
    let mut map = ProgressMap::new();
    for (key, raw) in entries {
        let Some(record) = normalize_record(raw) else {
            continue;
        };
        insert_canonical(&mut map, ProgressKey::from_raw(key.as_str()), record);
    }
    Some(map)
}

/// Insert under the canonical form of `key`, keeping the newer record on
/// collision.
pub fn insert_canonical(map: &mut ProgressMap, key: ProgressKey, record: ProgressRecord) {
    match map.entry(key.canonical()) {
        Entry::Vacant(slot) => {
            slot.insert(record);
        }
        Entry::Occupied(mut slot) => {
            if newer(slot.get(), &record) == &record {
                slot.insert(record);
            }
        }
    }
}

/// Decode one record, filling missing fields.
///
/// `lastUpdated` falls back to the latest of the other timestamps, then to
/// the epoch.
#[must_use]
pub fn normalize_record(value: &Value) -> Option<ProgressRecord> {
    let fields = value.as_object()?;

    let correct_count = fields.get("correctCount").map_or(0, parse_count);
    let mut record = ProgressRecord {
        correct_count,
        last_correct: fields.get("lastCorrect").and_then(parse_timestamp),
        last_wrong: fields.get("lastWrong").and_then(parse_timestamp),
        next_review_date: fields.get("nextReviewDate").and_then(parse_timestamp),
        last_updated: epoch(),
    };
    record.last_updated = fields
        .get("lastUpdated")
        .and_then(parse_timestamp)
        .or_else(|| record.latest_activity())
        .unwrap_or_else(epoch);

    Some(record)
}

/// Accepts RFC 3339 strings and integer epoch milliseconds.
#[must_use]
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(raw) => DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|ts| ts.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(DateTime::<Utc>::from_timestamp_millis),
        _ => None,
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn parse_count(value: &Value) -> u32 {
    let raw = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match raw {
        Some(n) if n.is_finite() && n > 0.0 => n.floor().min(f64::from(u32::MAX)) as u32,
        _ => 0,
    }
}
