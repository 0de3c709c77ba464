use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::HashSet;

use vocab_core::model::{Direction, ProgressMap, VocabularyItem};
use vocab_core::scheduler::Scheduler;

use crate::error::SessionError;

/// Which items enter a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionMode {
    /// Only items that are due.
    #[default]
    Spaced,
    /// Every selected item, regardless of schedule.
    Random,
}

/// Quiz direction for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DirectionMode {
    #[default]
    FrontToBack,
    BackToFront,
    /// Due-ness is judged front to back; each draw picks a direction at random.
    Mixed,
}

impl DirectionMode {
    /// Direction whose progress decides whether an item enters a spaced pool.
    #[must_use]
    pub fn gate(self) -> Direction {
        match self {
            DirectionMode::FrontToBack | DirectionMode::Mixed => Direction::FrontToBack,
            DirectionMode::BackToFront => Direction::BackToFront,
        }
    }
}

impl From<Direction> for DirectionMode {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::FrontToBack => DirectionMode::FrontToBack,
            Direction::BackToFront => DirectionMode::BackToFront,
        }
    }
}

/// Counts for a progress indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionProgress {
    pub total: usize,
    pub answered: usize,
    pub remaining: usize,
    pub is_complete: bool,
}

/// One draw from a pool: the item and the direction to quiz it in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Drawn {
    pub item: VocabularyItem,
    pub direction: Direction,
}

/// Items eligible in the current sitting, consumed without replacement.
///
/// Answers recorded while the pool is live never put an item back; build a
/// new pool to review again.
#[derive(Debug, Clone)]
pub struct SessionPool {
    items: Vec<VocabularyItem>,
    mode: DirectionMode,
    total: usize,
}

impl SessionPool {
    /// Build a pool from the selected `items`.
    ///
    /// Duplicate pairs (e.g. the same word in two lessons) enter once.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NoItemsSelected` when `items` is empty. A pool
    /// that is empty because nothing is due is not an error.
    pub fn build(
        items: Vec<VocabularyItem>,
        selection: SelectionMode,
        mode: DirectionMode,
        progress: &ProgressMap,
        now: DateTime<Utc>,
    ) -> Result<Self, SessionError> {
        if items.is_empty() {
            return Err(SessionError::NoItemsSelected);
        }

        let scheduler = Scheduler::new(progress);
        let gate = mode.gate();
        let mut seen = HashSet::new();
        let items: Vec<VocabularyItem> = items
            .into_iter()
            .filter(|item| seen.insert((item.front.clone(), item.back.clone())))
            .filter(|item| match selection {
                SelectionMode::Spaced => scheduler.is_due(item, gate, now),
                SelectionMode::Random => true,
            })
            .collect();

        let total = items.len();
        Ok(Self { items, mode, total })
    }

    /// Remove and return a uniformly random item, or `None` once exhausted.
    pub fn draw(&mut self) -> Option<Drawn> {
        self.draw_with(&mut rand::rng())
    }

    pub fn draw_with<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<Drawn> {
        if self.items.is_empty() {
            return None;
        }
        let index = rng.random_range(0..self.items.len());
        let item = self.items.swap_remove(index);
        let direction = match self.mode {
            DirectionMode::Mixed => {
                if rng.random_bool(0.5) {
                    Direction::FrontToBack
                } else {
                    Direction::BackToFront
                }
            }
            fixed => fixed.gate(),
        };
        Some(Drawn { item, direction })
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.total
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn mode(&self) -> DirectionMode {
        self.mode
    }

    #[must_use]
    pub fn progress(&self) -> SessionProgress {
        let remaining = self.remaining();
        SessionProgress {
            total: self.total,
            answered: self.total - remaining,
            remaining,
            is_complete: remaining == 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use vocab_core::model::{ProgressKey, ProgressRecord};
    use vocab_core::time::fixed_now;

    fn items(n: usize) -> Vec<VocabularyItem> {
        (0..n)
            .map(|i| VocabularyItem::new(format!("w{i}"), format!("t{i}")))
            .collect()
    }

    fn answered(item: &VocabularyItem, direction: Direction) -> (ProgressKey, ProgressRecord) {
        let mut record = ProgressRecord::fresh();
        record.record_answer(true, fixed_now());
        (item.key(direction), record)
    }

    #[test]
    fn empty_selection_is_an_error() {
        let err = SessionPool::build(
            Vec::new(),
            SelectionMode::Random,
            DirectionMode::FrontToBack,
            &ProgressMap::new(),
            fixed_now(),
        )
        .unwrap_err();
        assert_eq!(err, SessionError::NoItemsSelected);
    }

    #[test]
    fn draws_every_item_exactly_once() {
        let all = items(25);
        let mut pool = SessionPool::build(
            all.clone(),
            SelectionMode::Spaced,
            DirectionMode::FrontToBack,
            &ProgressMap::new(),
            fixed_now(),
        )
        .unwrap();
        let mut rng = StdRng::seed_from_u64(7);

        let mut seen = HashSet::new();
        while let Some(drawn) = pool.draw_with(&mut rng) {
            assert_eq!(drawn.direction, Direction::FrontToBack);
            assert!(seen.insert(drawn.item.front));
        }
        assert_eq!(seen.len(), 25);
        assert!(pool.is_exhausted());
        assert!(pool.progress().is_complete);
        assert_eq!(pool.draw_with(&mut rng), None);
    }

    #[test]
    fn spaced_pool_excludes_items_not_due() {
        let all = items(3);
        let progress: ProgressMap = [answered(&all[0], Direction::FrontToBack)].into();

        let spaced = SessionPool::build(
            all.clone(),
            SelectionMode::Spaced,
            DirectionMode::FrontToBack,
            &progress,
            fixed_now(),
        )
        .unwrap();
        assert_eq!(spaced.remaining(), 2);

        let reverse = SessionPool::build(
            all.clone(),
            SelectionMode::Spaced,
            DirectionMode::BackToFront,
            &progress,
            fixed_now(),
        )
        .unwrap();
        assert_eq!(reverse.remaining(), 3);

        let random = SessionPool::build(
            all,
            SelectionMode::Random,
            DirectionMode::FrontToBack,
            &progress,
            fixed_now(),
        )
        .unwrap();
        assert_eq!(random.remaining(), 3);
    }

    #[test]
    fn nothing_due_builds_an_exhausted_pool() {
        let all = items(1);
        let progress: ProgressMap = [answered(&all[0], Direction::FrontToBack)].into();
        let mut pool = SessionPool::build(
            all,
            SelectionMode::Spaced,
            DirectionMode::FrontToBack,
            &progress,
            fixed_now(),
        )
        .unwrap();
        assert_eq!(pool.total(), 0);
        assert_eq!(pool.draw(), None);
    }

    #[test]
    fn duplicates_enter_once() {
        let mut all = items(2);
        all.push(all[0].clone());
        let pool = SessionPool::build(
            all,
            SelectionMode::Random,
            DirectionMode::FrontToBack,
            &ProgressMap::new(),
            fixed_now(),
        )
        .unwrap();
        assert_eq!(pool.remaining(), 2);
    }

    #[test]
    fn mixed_mode_uses_both_directions() {
        let mut pool = SessionPool::build(
            items(40),
            SelectionMode::Random,
            DirectionMode::Mixed,
            &ProgressMap::new(),
            fixed_now(),
        )
        .unwrap();
        let mut rng = StdRng::seed_from_u64(42);
        let mut directions = HashSet::new();
        while let Some(drawn) = pool.draw_with(&mut rng) {
            directions.insert(drawn.direction);
        }
        assert_eq!(directions.len(), 2);
    }
}
