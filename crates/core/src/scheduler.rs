use chrono::{DateTime, Local, TimeZone, Utc};

use crate::intervals::MAX_PHASE;
use crate::model::{Direction, ProgressMap, ProgressRecord, VocabularyItem};

//
// ─── STATISTICS ────────────────────────────────────────────────────────────────
//

/// Learner-facing totals over every tracked record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProgressStats {
    /// Records answered correctly at least once since their last miss.
    pub learned: usize,
    /// Sum of all phases.
    pub total_reviews: u64,
    /// Number of records in the store.
    pub tracked: usize,
}

/// Count of items per phase, with phases past [`MAX_PHASE`] bucketed together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PhaseHistogram {
    counts: [usize; MAX_PHASE as usize + 1],
}

impl PhaseHistogram {
    /// Items in `phase`; any phase at or beyond [`MAX_PHASE`] reads the last bucket.
    #[must_use]
    pub fn get(&self, phase: u32) -> usize {
        let idx = usize::try_from(phase.min(MAX_PHASE)).unwrap_or(self.counts.len() - 1);
        self.counts[idx]
    }

    /// `(phase, count)` pairs in ascending phase order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, usize)> + '_ {
        (0..=MAX_PHASE).zip(self.counts.iter().copied())
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }

    fn add(&mut self, phase: u32) {
        let idx = usize::try_from(phase.min(MAX_PHASE)).unwrap_or(self.counts.len() - 1);
        self.counts[idx] += 1;
    }
}

//
// ─── SCHEDULER ─────────────────────────────────────────────────────────────────
//

/// Read-only scheduling queries over a progress snapshot.
///
/// Items without a record behave like a fresh record: phase 0 and due now.
///
/// ```
/// # use vocab_core::model::{Direction, ProgressMap, VocabularyItem};
/// # use vocab_core::scheduler::Scheduler;
/// let progress = ProgressMap::new();
/// let item = VocabularyItem::new("hola", "Hallo");
/// let scheduler = Scheduler::new(&progress);
/// assert!(scheduler.is_due(&item, Direction::FrontToBack, chrono::Utc::now()));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Scheduler<'a> {
    progress: &'a ProgressMap,
}

impl<'a> Scheduler<'a> {
    #[must_use]
    pub fn new(progress: &'a ProgressMap) -> Self {
        Self { progress }
    }

    /// Stored record for the item, if it was ever answered.
    #[must_use]
    pub fn record(&self, item: &VocabularyItem, direction: Direction) -> Option<&'a ProgressRecord> {
        self.progress.get(&item.key(direction))
    }

    #[must_use]
    pub fn is_due(&self, item: &VocabularyItem, direction: Direction, now: DateTime<Utc>) -> bool {
        self.record(item, direction)
            .is_none_or(|record| record.is_due(now))
    }

    #[must_use]
    pub fn due_count<'i>(
        &self,
        items: impl IntoIterator<Item = &'i VocabularyItem>,
        direction: Direction,
        now: DateTime<Utc>,
    ) -> usize {
        items
            .into_iter()
            .filter(|item| self.is_due(item, direction, now))
            .count()
    }

    /// Items becoming due on each of the next `horizon_days` local calendar days.
    ///
    /// Index 0 is tomorrow. Items already due are excluded, as are items due
    /// later today.
    #[must_use]
    pub fn forecast(
        &self,
        items: &[VocabularyItem],
        direction: Direction,
        now: DateTime<Utc>,
        horizon_days: u32,
    ) -> Vec<usize> {
        self.forecast_in(items, direction, now, horizon_days, &Local)
    }

    /// [`Scheduler::forecast`] with calendar days taken in `tz`.
    #[must_use]
    pub fn forecast_in<Tz: TimeZone>(
        &self,
        items: &[VocabularyItem],
        direction: Direction,
        now: DateTime<Utc>,
        horizon_days: u32,
        tz: &Tz,
    ) -> Vec<usize> {
        let horizon = usize::try_from(horizon_days).unwrap_or(usize::MAX);
        let mut buckets = vec![0; horizon];
        let today = now.with_timezone(tz).date_naive();

        for item in items {
            let Some(next) = self
                .record(item, direction)
                .and_then(|record| record.next_review_date)
            else {
                continue;
            };
            if now >= next {
                continue;
            }
            let offset = (next.with_timezone(tz).date_naive() - today).num_days();
            let Ok(offset) = usize::try_from(offset) else {
                continue;
            };
            if (1..=horizon).contains(&offset) {
                buckets[offset - 1] += 1;
            }
        }

        buckets
    }

    #[must_use]
    pub fn phase_histogram<'i>(
        &self,
        items: impl IntoIterator<Item = &'i VocabularyItem>,
        direction: Direction,
    ) -> PhaseHistogram {
        let mut histogram = PhaseHistogram::default();
        for item in items {
            let phase = self
                .record(item, direction)
                .map_or(0, ProgressRecord::phase);
            histogram.add(phase);
        }
        histogram
    }

    #[must_use]
    pub fn stats(&self) -> ProgressStats {
        let records = self.progress.values();
        ProgressStats {
            learned: records.clone().filter(|r| r.correct_count > 0).count(),
            total_reviews: records.map(|r| u64::from(r.correct_count)).sum(),
            tracked: self.progress.len(),
        }
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;
    use chrono::Duration;

    fn items(n: usize) -> Vec<VocabularyItem> {
        (0..n)
            .map(|i| VocabularyItem::new(format!("f{i}"), format!("b{i}")))
            .collect()
    }

    fn answer(
        progress: &mut ProgressMap,
        item: &VocabularyItem,
        direction: Direction,
        correct: bool,
        at: DateTime<Utc>,
    ) {
        progress
            .entry(item.key(direction))
            .or_default()
            .record_answer(correct, at);
    }

    #[test]
    fn unknown_items_are_due() {
        let progress = ProgressMap::new();
        let s = Scheduler::new(&progress);
        let item = VocabularyItem::new("x", "y");
        assert!(s.is_due(&item, Direction::FrontToBack, fixed_now()));
        assert!(s.record(&item, Direction::FrontToBack).is_none());
    }

    #[test]
    fn correct_answer_hides_item_until_review_date() {
        let now = fixed_now();
        let item = VocabularyItem::new("hola", "Hallo");
        let mut progress = ProgressMap::new();
        answer(&mut progress, &item, Direction::FrontToBack, true, now);

        let s = Scheduler::new(&progress);
        assert!(!s.is_due(&item, Direction::FrontToBack, now));
        assert!(!s.is_due(&item, Direction::FrontToBack, now + Duration::hours(23)));
        assert!(s.is_due(&item, Direction::FrontToBack, now + Duration::days(1)));
        // the other direction is tracked independently
        assert!(s.is_due(&item, Direction::BackToFront, now));
    }

    #[test]
    fn wrong_answer_is_due_from_then_on() {
        let now = fixed_now();
        let item = VocabularyItem::new("gracias", "danke");
        let mut progress = ProgressMap::new();
        answer(&mut progress, &item, Direction::FrontToBack, true, now);
        answer(&mut progress, &item, Direction::FrontToBack, false, now);

        let s = Scheduler::new(&progress);
        assert!(s.is_due(&item, Direction::FrontToBack, now));
        assert!(s.is_due(&item, Direction::FrontToBack, now + Duration::days(3)));
    }

    #[test]
    fn due_count_counts_only_due_items() {
        let now = fixed_now();
        let all = items(5);
        let mut progress = ProgressMap::new();
        answer(&mut progress, &all[0], Direction::FrontToBack, true, now);
        answer(&mut progress, &all[1], Direction::FrontToBack, true, now);
        answer(&mut progress, &all[2], Direction::FrontToBack, false, now);

        let s = Scheduler::new(&progress);
        assert_eq!(s.due_count(&all, Direction::FrontToBack, now), 3);
        assert_eq!(s.due_count(&all, Direction::BackToFront, now), 5);
    }

    #[test]
    fn forecast_buckets_future_days_only() {
        let now = fixed_now();
        let all = items(4);
        let mut progress = ProgressMap::new();
        // phase 1 -> tomorrow
        answer(&mut progress, &all[0], Direction::FrontToBack, true, now);
        // phase 2 -> in 3 days
        answer(&mut progress, &all[1], Direction::FrontToBack, true, now - Duration::days(1));
        answer(&mut progress, &all[1], Direction::FrontToBack, true, now);
        // wrong -> due now, not forecast
        answer(&mut progress, &all[2], Direction::FrontToBack, false, now);
        // all[3] never answered -> backlog, not forecast

        let s = Scheduler::new(&progress);
        let forecast = s.forecast_in(&all, Direction::FrontToBack, now, 7, &Utc);
        assert_eq!(forecast, vec![1, 0, 1, 0, 0, 0, 0]);
        assert_eq!(s.forecast_in(&all, Direction::FrontToBack, now, 2, &Utc), vec![1, 0]);
        assert!(s.forecast_in(&all, Direction::FrontToBack, now, 0, &Utc).is_empty());
    }

    #[test]
    fn forecast_ignores_items_due_later_today() {
        let now = fixed_now();
        let item = VocabularyItem::new("a", "b");
        let mut progress = ProgressMap::new();
        let mut record = ProgressRecord::fresh();
        record.correct_count = 1;
        record.next_review_date = Some(now + Duration::minutes(1));
        progress.insert(item.key(Direction::FrontToBack), record);

        let s = Scheduler::new(&progress);
        let forecast = s.forecast_in(&[item], Direction::FrontToBack, now, 3, &Utc);
        assert_eq!(forecast, vec![0, 0, 0]);
    }

    #[test]
    fn histogram_buckets_high_phases() {
        let all = items(3);
        let mut progress = ProgressMap::new();
        let mut veteran = ProgressRecord::fresh();
        veteran.correct_count = 12;
        progress.insert(all[0].key(Direction::FrontToBack), veteran);
        let mut learning = ProgressRecord::fresh();
        learning.correct_count = 2;
        progress.insert(all[1].key(Direction::FrontToBack), learning);

        let h = Scheduler::new(&progress).phase_histogram(&all, Direction::FrontToBack);
        assert_eq!(h.get(0), 1);
        assert_eq!(h.get(2), 1);
        assert_eq!(h.get(9), 1);
        assert_eq!(h.get(30), 1);
        assert_eq!(h.total(), 3);
        assert_eq!(h.iter().count(), 10);
    }

    #[test]
    fn stats_sum_phases() {
        let now = fixed_now();
        let all = items(3);
        let mut progress = ProgressMap::new();
        answer(&mut progress, &all[0], Direction::FrontToBack, true, now);
        answer(&mut progress, &all[0], Direction::FrontToBack, true, now);
        answer(&mut progress, &all[1], Direction::BackToFront, true, now);
        answer(&mut progress, &all[2], Direction::FrontToBack, false, now);

        let stats = Scheduler::new(&progress).stats();
        assert_eq!(stats.learned, 2);
        assert_eq!(stats.total_reviews, 3);
        assert_eq!(stats.tracked, 3);
    }
}
