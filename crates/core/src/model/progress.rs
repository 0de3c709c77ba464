use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use crate::intervals::{MAX_PHASE, interval};
use crate::model::item::Direction;
use crate::time::epoch;

/// Progress records keyed by item identity.
///
/// Ordered so that serialized snapshots are stable.
pub type ProgressMap = BTreeMap<ProgressKey, ProgressRecord>;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProgressKeyError {
    #[error("progress key has {found} components, expected 3")]
    ComponentCount { found: usize },
    #[error("progress key ends inside an escape sequence")]
    DanglingEscape,
    #[error("unknown direction in progress key: {0}")]
    Direction(String),
}

//
// ─── PROGRESS KEY ──────────────────────────────────────────────────────────────
//

const SEPARATOR: char = '|';
const ESCAPE: char = '\\';

/// Identity of one item quizzed in one direction.
///
/// Layout is `front||back||direction`. Backslashes and pipes inside `front`
/// and `back` are backslash-escaped, so `||` only ever appears as the
/// separator and distinct triples never share a key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProgressKey(String);

/// Components recovered from a [`ProgressKey`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyParts {
    pub front: String,
    pub back: String,
    pub direction: Direction,
}

impl ProgressKey {
    #[must_use]
    pub fn new(front: &str, back: &str, direction: Direction) -> Self {
        let mut raw = String::with_capacity(front.len() + back.len() + 16);
        push_escaped(&mut raw, front);
        raw.push(SEPARATOR);
        raw.push(SEPARATOR);
        push_escaped(&mut raw, back);
        raw.push(SEPARATOR);
        raw.push(SEPARATOR);
        raw.push_str(direction.as_str());
        Self(raw)
    }

    /// Wrap a key read back from storage without re-validating it.
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split the key back into its components.
    ///
    /// # Errors
    ///
    /// Returns `ProgressKeyError` when the key was not produced by [`ProgressKey::new`].
    pub fn parts(&self) -> Result<KeyParts, ProgressKeyError> {
        let mut components = Vec::with_capacity(3);
        let mut current = String::new();
        let mut chars = self.0.chars().peekable();

        while let Some(ch) = chars.next() {
            match ch {
                ESCAPE => {
                    let escaped = chars.next().ok_or(ProgressKeyError::DanglingEscape)?;
                    current.push(escaped);
                }
                SEPARATOR if chars.peek() == Some(&SEPARATOR) => {
                    chars.next();
                    components.push(std::mem::take(&mut current));
                }
                other => current.push(other),
            }
        }
        components.push(current);

        if components.len() != 3 {
            return Err(ProgressKeyError::ComponentCount {
                found: components.len(),
            });
        }
        let direction_raw = components.pop().unwrap_or_default();
        let direction = direction_raw
            .parse()
            .map_err(|_| ProgressKeyError::Direction(direction_raw.clone()))?;
        let back = components.pop().unwrap_or_default();
        let front = components.pop().unwrap_or_default();

        Ok(KeyParts {
            front,
            back,
            direction,
        })
    }

    /// Re-encode the key in the current layout, renaming legacy direction
    /// names. Keys that do not decode are returned unchanged.
    #[must_use]
    pub fn canonical(&self) -> Self {
        match self.parts() {
            Ok(parts) => Self::new(&parts.front, &parts.back, parts.direction),
            Err(_) => self.clone(),
        }
    }
}

fn push_escaped(out: &mut String, component: &str) {
    for ch in component.chars() {
        if ch == ESCAPE || ch == SEPARATOR {
            out.push(ESCAPE);
        }
        out.push(ch);
    }
}

impl fmt::Display for ProgressKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

//
// ─── PROGRESS RECORD ───────────────────────────────────────────────────────────
//

/// Learning progress of one item in one direction.
///
/// `correct_count` is the phase. A missing `next_review_date` means the item
/// is due now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    pub correct_count: u32,
    pub last_correct: Option<DateTime<Utc>>,
    pub last_wrong: Option<DateTime<Utc>>,
    pub next_review_date: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
}

impl Default for ProgressRecord {
    fn default() -> Self {
        Self::fresh()
    }
}

impl ProgressRecord {
    /// Zero-valued record for an item that was never answered.
    #[must_use]
    pub fn fresh() -> Self {
        Self {
            correct_count: 0,
            last_correct: None,
            last_wrong: None,
            next_review_date: None,
            last_updated: epoch(),
        }
    }

    /// Phase bucket used for display, capped at [`MAX_PHASE`].
    #[must_use]
    pub fn phase(&self) -> u32 {
        self.correct_count.min(MAX_PHASE)
    }

    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.next_review_date {
            None => true,
            Some(next) => now >= next,
        }
    }

    /// Apply one answer given at `now`.
    ///
    /// A correct answer advances the phase and schedules the next review by
    /// the interval table. A wrong answer drops back to phase 0 and makes the
    /// item due immediately.
    pub fn record_answer(&mut self, correct: bool, now: DateTime<Utc>) {
        if correct {
            self.correct_count = self.correct_count.saturating_add(1);
            self.last_correct = Some(now);
            self.next_review_date = Some(now + interval(self.correct_count));
        } else {
            self.correct_count = 0;
            self.last_wrong = Some(now);
            self.next_review_date = Some(now);
        }
        self.last_updated = now;
    }

    /// Move the scheduled review by `delta`. Returns false when nothing is scheduled.
    pub fn shift_review(&mut self, delta: Duration, now: DateTime<Utc>) -> bool {
        let Some(next) = self.next_review_date else {
            return false;
        };
        self.next_review_date = Some(next + delta);
        self.last_updated = now;
        true
    }

    /// Most recent of the answer and scheduling timestamps, if any.
    #[must_use]
    pub fn latest_activity(&self) -> Option<DateTime<Utc>> {
        [self.last_correct, self.last_wrong, self.next_review_date]
            .into_iter()
            .flatten()
            .max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intervals::interval_days;
    use crate::time::fixed_now;

    #[test]
    fn key_round_trips_plain_components() {
        let key = ProgressKey::new("hola", "Hallo", Direction::FrontToBack);
        assert_eq!(key.as_str(), "hola||Hallo||frontToBack");
        let parts = key.parts().unwrap();
        assert_eq!(parts.front, "hola");
        assert_eq!(parts.back, "Hallo");
        assert_eq!(parts.direction, Direction::FrontToBack);
    }

    #[test]
    fn key_escapes_separator_inside_components() {
        let tricky = ProgressKey::new("a||b", "c", Direction::BackToFront);
        let plain = ProgressKey::new("a", "b||c", Direction::BackToFront);
        assert_ne!(tricky, plain);

        let parts = tricky.parts().unwrap();
        assert_eq!(parts.front, "a||b");
        assert_eq!(parts.back, "c");

        let slashed = ProgressKey::new(r"x\", "y", Direction::FrontToBack);
        assert_eq!(slashed.parts().unwrap().front, r"x\");
    }

    #[test]
    fn canonical_renames_legacy_directions() {
        let legacy = ProgressKey::from_raw("hola||Hallo||spanishToGerman");
        assert_eq!(
            legacy.canonical(),
            ProgressKey::new("hola", "Hallo", Direction::FrontToBack)
        );
        assert_eq!(
            ProgressKey::from_raw("hola||Hallo||germanToSpanish").canonical(),
            ProgressKey::new("hola", "Hallo", Direction::BackToFront)
        );

        let foreign = ProgressKey::from_raw("no separators");
        assert_eq!(foreign.canonical(), foreign);
    }

    #[test]
    fn key_parts_rejects_foreign_layouts() {
        assert!(matches!(
            ProgressKey::from_raw("hola||Hallo").parts(),
            Err(ProgressKeyError::ComponentCount { found: 2 })
        ));
        assert!(matches!(
            ProgressKey::from_raw("a||b||upward").parts(),
            Err(ProgressKeyError::Direction(_))
        ));
        assert!(matches!(
            ProgressKey::from_raw("a\\").parts(),
            Err(ProgressKeyError::DanglingEscape)
        ));
    }

    #[test]
    fn correct_answer_advances_phase_and_schedules() {
        let now = fixed_now();
        let mut record = ProgressRecord::fresh();
        record.correct_count = 2;

        record.record_answer(true, now);

        assert_eq!(record.correct_count, 3);
        assert_eq!(record.last_correct, Some(now));
        assert_eq!(
            record.next_review_date,
            Some(now + Duration::days(i64::from(interval_days(3))))
        );
        assert_eq!(record.last_updated, now);
    }

    #[test]
    fn wrong_answer_resets_phase_and_is_due_immediately() {
        let now = fixed_now();
        let mut record = ProgressRecord::fresh();
        record.correct_count = 7;
        record.next_review_date = Some(now + Duration::days(70));

        record.record_answer(false, now);

        assert_eq!(record.correct_count, 0);
        assert_eq!(record.last_wrong, Some(now));
        assert_eq!(record.next_review_date, Some(now));
        assert!(record.is_due(now));
        assert!(record.is_due(now + Duration::seconds(1)));
    }

    #[test]
    fn fresh_record_is_due() {
        assert!(ProgressRecord::fresh().is_due(fixed_now()));
    }

    #[test]
    fn phase_caps_at_max() {
        let mut record = ProgressRecord::fresh();
        record.correct_count = 15;
        assert_eq!(record.phase(), MAX_PHASE);
    }

    #[test]
    fn shift_review_skips_unscheduled_records() {
        let now = fixed_now();
        let mut unscheduled = ProgressRecord::fresh();
        assert!(!unscheduled.shift_review(Duration::days(-1), now));

        let mut scheduled = ProgressRecord::fresh();
        scheduled.record_answer(true, now);
        assert!(scheduled.shift_review(Duration::days(-1), now));
        assert_eq!(scheduled.next_review_date, Some(now));
    }

    #[test]
    fn record_serializes_with_camel_case_fields() {
        let mut record = ProgressRecord::fresh();
        record.record_answer(true, fixed_now());
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["correctCount"], 1);
        assert!(json["lastWrong"].is_null());
        assert!(json["nextReviewDate"].is_string());
    }
}
