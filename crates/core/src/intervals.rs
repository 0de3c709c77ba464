//! Review delays per mastery phase.
//!
//! A phase is the number of consecutive correct answers for one item in one
//! direction. Phase 0 is due immediately; every later phase waits longer,
//! and phases past [`MAX_PHASE`] reuse the last entry.

use chrono::Duration;

/// Highest phase with its own table entry.
pub const MAX_PHASE: u32 = 9;

const INTERVAL_DAYS: [u32; MAX_PHASE as usize + 1] = [0, 1, 3, 7, 14, 29, 50, 70, 100, 300];

/// Number of days to wait before reviewing an item at `phase` again.
///
/// ```
/// # use vocab_core::intervals::interval_days;
/// assert_eq!(interval_days(0), 0);
/// assert_eq!(interval_days(3), 7);
/// assert_eq!(interval_days(42), interval_days(9));
/// ```
#[must_use]
pub fn interval_days(phase: u32) -> u32 {
    let idx = usize::try_from(phase.min(MAX_PHASE)).unwrap_or(INTERVAL_DAYS.len() - 1);
    INTERVAL_DAYS[idx]
}

/// [`interval_days`] as a `chrono::Duration`.
#[must_use]
pub fn interval(phase: u32) -> Duration {
    Duration::days(i64::from(interval_days(phase)))
}
