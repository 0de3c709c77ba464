//! Lesson content persisted in the local key-value store.
//!
//! Layout: `lectionOrder` holds the ordered list of ids, each lesson lives
//! under `lection_{id}`.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use vocab_core::Clock;
use vocab_core::model::{Lesson, LessonId};

use crate::progress::{ChangeOrigin, parse_timestamp};
use crate::repository::{KeyValueStore, StorageError};

pub const LESSON_ORDER_KEY: &str = "lectionOrder";
pub const LESSONS_UPDATED_KEY: &str = "lastLessonUpdate";
const LESSON_KEY_PREFIX: &str = "lection_";
const EVENT_CAPACITY: usize = 32;

#[must_use]
pub fn lesson_key(id: &LessonId) -> String {
    format!("{LESSON_KEY_PREFIX}{id}")
}

/// Notification published after lesson content was persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LessonEvent {
    Saved { id: LessonId, origin: ChangeOrigin },
    Deleted { id: LessonId, origin: ChangeOrigin },
    Replaced { origin: ChangeOrigin },
}

impl LessonEvent {
    #[must_use]
    pub fn origin(&self) -> ChangeOrigin {
        match self {
            LessonEvent::Saved { origin, .. }
            | LessonEvent::Deleted { origin, .. }
            | LessonEvent::Replaced { origin } => *origin,
        }
    }
}

/// Lesson repository over a [`KeyValueStore`].
///
/// Local-origin changes stamp `lastLessonUpdate`. Clones share the same
/// event channel.
#[derive(Clone)]
pub struct LessonStore {
    kv: Arc<dyn KeyValueStore>,
    clock: Clock,
    events: broadcast::Sender<LessonEvent>,
}

impl LessonStore {
    #[must_use]
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            kv,
            clock: Clock::default(),
            events,
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// When lesson content was last changed on this device.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be read.
    pub async fn last_modified(&self) -> Result<Option<DateTime<Utc>>, StorageError> {
        let Some(raw) = self.kv.get_item(LESSONS_UPDATED_KEY).await? else {
            return Ok(None);
        };
        Ok(serde_json::from_str(&raw)
            .ok()
            .as_ref()
            .and_then(parse_timestamp))
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LessonEvent> {
        self.events.subscribe()
    }

    /// Ordered lesson ids. An unreadable order is treated as empty.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be read.
    pub async fn order(&self) -> Result<Vec<LessonId>, StorageError> {
        let Some(raw) = self.kv.get_item(LESSON_ORDER_KEY).await? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str(&raw) {
            Ok(order) => Ok(order),
            Err(err) => {
                warn!(error = %err, "lesson order unreadable, starting empty");
                Ok(Vec::new())
            }
        }
    }

    /// # Errors
    ///
    /// Returns `StorageError` if the order cannot be persisted.
    pub async fn save_order(
        &self,
        order: &[LessonId],
        origin: ChangeOrigin,
    ) -> Result<(), StorageError> {
        self.write_order(order).await?;
        self.changed(LessonEvent::Replaced { origin }).await
    }

    /// Lesson stored under `id`, or `None` if missing or unreadable.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be read.
    pub async fn get(&self, id: &LessonId) -> Result<Option<Lesson>, StorageError> {
        let Some(raw) = self.kv.get_item(&lesson_key(id)).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(lesson) => Ok(Some(lesson)),
            Err(err) => {
                warn!(%id, error = %err, "skipping unreadable lesson");
                Ok(None)
            }
        }
    }

    /// All lessons in display order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be read.
    pub async fn all(&self) -> Result<Vec<Lesson>, StorageError> {
        let mut lessons = Vec::new();
        for id in self.order().await? {
            if let Some(lesson) = self.get(&id).await? {
                lessons.push(lesson);
            }
        }
        Ok(lessons)
    }

    /// Store `lesson`, appending its id to the order if new.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::QuotaExceeded` when local storage is full.
    pub async fn save(&self, lesson: &Lesson, origin: ChangeOrigin) -> Result<(), StorageError> {
        self.write_lesson(lesson).await?;
        let mut order = self.order().await?;
        if !order.contains(&lesson.id) {
            order.push(lesson.id.clone());
            self.write_order(&order).await?;
        }
        debug!(id = %lesson.id, ?origin, "lesson saved");
        self.changed(LessonEvent::Saved {
            id: lesson.id.clone(),
            origin,
        })
        .await
    }

    /// Remove a lesson and its order entry. Missing ids are ignored.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be written.
    pub async fn delete(&self, id: &LessonId, origin: ChangeOrigin) -> Result<(), StorageError> {
        self.kv.remove_item(&lesson_key(id)).await?;
        let mut order = self.order().await?;
        let before = order.len();
        order.retain(|existing| existing != id);
        if order.len() != before {
            self.write_order(&order).await?;
        }
        self.changed(LessonEvent::Deleted {
            id: id.clone(),
            origin,
        })
        .await
    }

    /// Make `lessons` the complete content, in the given order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if any write fails.
    pub async fn replace_all(
        &self,
        lessons: &[Lesson],
        origin: ChangeOrigin,
    ) -> Result<(), StorageError> {
        let keep: HashSet<&LessonId> = lessons.iter().map(|lesson| &lesson.id).collect();
        for id in self.order().await? {
            if !keep.contains(&id) {
                self.kv.remove_item(&lesson_key(&id)).await?;
            }
        }
        for lesson in lessons {
            self.write_lesson(lesson).await?;
        }
        let order: Vec<LessonId> = lessons.iter().map(|lesson| lesson.id.clone()).collect();
        self.write_order(&order).await?;
        self.changed(LessonEvent::Replaced { origin }).await
    }

    /// Seed the starter lesson when no lessons exist. Returns true if seeded.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the starter cannot be persisted.
    pub async fn ensure_starter(&self) -> Result<bool, StorageError> {
        if !self.all().await?.is_empty() {
            return Ok(false);
        }
        let starter = Lesson::starter(LessonId::generate());
        self.save(&starter, ChangeOrigin::Local).await?;
        Ok(true)
    }

    /// True when the only content is the starter lesson (or nothing at all).
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be read.
    pub async fn only_starter_content(&self) -> Result<bool, StorageError> {
        Ok(self.all().await?.iter().all(Lesson::is_starter))
    }

    async fn write_lesson(&self, lesson: &Lesson) -> Result<(), StorageError> {
        let raw = serde_json::to_string(lesson)?;
        self.kv.set_item(&lesson_key(&lesson.id), &raw).await
    }

    async fn write_order(&self, order: &[LessonId]) -> Result<(), StorageError> {
        let raw = serde_json::to_string(order)?;
        self.kv.set_item(LESSON_ORDER_KEY, &raw).await
    }

    async fn changed(&self, event: LessonEvent) -> Result<(), StorageError> {
        if event.origin() == ChangeOrigin::Local {
            let stamp = serde_json::to_string(&self.clock.now())?;
            self.kv.set_item(LESSONS_UPDATED_KEY, &stamp).await?;
        }
        // no receivers is fine
        let _ = self.events.send(event);
        Ok(())
    }
}
