//! Local progress store: the in-memory map plus its persisted form.
//!
//! Every mutation is written to the local key-value store before it returns
//! and announced on a broadcast channel, so sync code can push it to remote
//! stores without the caller waiting on the network.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use vocab_core::model::{ProgressKey, ProgressMap, ProgressRecord};

use crate::repository::{KeyValueStore, StorageError};

mod normalize;

pub use normalize::{insert_canonical, normalize_map, normalize_record, parse_timestamp};

pub const PROGRESS_KEY: &str = "vocabularyProgress";
pub const LAST_LOCAL_UPDATE_KEY: &str = "lastLocalUpdate";
pub const LAST_RESET_KEY: &str = "lastProgressReset";

const EVENT_CAPACITY: usize = 64;

//
// ─── EVENTS ────────────────────────────────────────────────────────────────────
//

/// Where a change to the store came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    /// Made on this device; remote stores have not seen it yet.
    Local,
    /// Applied from a remote store.
    Remote,
}

/// Notification published after a mutation has been persisted locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Answered { key: ProgressKey, at: DateTime<Utc> },
    Shifted { count: usize, at: DateTime<Utc> },
    Reset { at: DateTime<Utc>, origin: ChangeOrigin },
    Replaced { origin: ChangeOrigin },
}

impl ProgressEvent {
    #[must_use]
    pub fn origin(&self) -> ChangeOrigin {
        match self {
            ProgressEvent::Answered { .. } | ProgressEvent::Shifted { .. } => ChangeOrigin::Local,
            ProgressEvent::Reset { origin, .. } | ProgressEvent::Replaced { origin } => *origin,
        }
    }
}

/// Point-in-time copy of the store used by reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProgressSnapshot {
    pub records: ProgressMap,
    pub last_local_update: Option<DateTime<Utc>>,
    pub last_reset: Option<DateTime<Utc>>,
}

//
// ─── STORE ─────────────────────────────────────────────────────────────────────
//

/// Owner of the progress map for one client instance.
///
/// Mutations persist synchronously with respect to the caller (the local
/// write is awaited) and then notify subscribers.
pub struct ProgressStore {
    kv: Arc<dyn KeyValueStore>,
    records: ProgressMap,
    last_local_update: Option<DateTime<Utc>>,
    last_reset: Option<DateTime<Utc>>,
    events: broadcast::Sender<ProgressEvent>,
}

impl ProgressStore {
    /// Empty store that has not read anything from `kv`.
    #[must_use]
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            kv,
            records: ProgressMap::new(),
            last_local_update: None,
            last_reset: None,
            events,
        }
    }

    /// Read, normalize and re-persist the stored snapshot.
    ///
    /// Unreadable JSON is discarded and the store starts empty.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` only if the key-value backend itself fails.
    pub async fn load(kv: Arc<dyn KeyValueStore>) -> Result<Self, StorageError> {
        let mut store = Self::new(kv);

        if let Some(value) = store.read_json(PROGRESS_KEY).await? {
            match normalize_map(&value) {
                Some(records) => store.records = records,
                None => {
                    warn!(key = PROGRESS_KEY, "stored progress is not an object, discarding");
                    store.kv.remove_item(PROGRESS_KEY).await?;
                }
            }
        }
        store.last_local_update = store.read_timestamp(LAST_LOCAL_UPDATE_KEY).await?;
        store.last_reset = store.read_timestamp(LAST_RESET_KEY).await?;

        if !store.records.is_empty() {
            store.persist_records().await?;
        }
        debug!(records = store.records.len(), "progress loaded");
        Ok(store)
    }

    /// Normalized record for `key`, or a fresh one if the item was never answered.
    ///
    /// Does not insert anything.
    #[must_use]
    pub fn get(&self, key: &ProgressKey) -> ProgressRecord {
        self.records.get(key).cloned().unwrap_or_default()
    }

    #[must_use]
    pub fn records(&self) -> &ProgressMap {
        &self.records
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn last_local_update(&self) -> Option<DateTime<Utc>> {
        self.last_local_update
    }

    #[must_use]
    pub fn last_reset(&self) -> Option<DateTime<Utc>> {
        self.last_reset
    }

    #[must_use]
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            records: self.records.clone(),
            last_local_update: self.last_local_update,
            last_reset: self.last_reset,
        }
    }

    /// Receive an event for every persisted mutation from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.events.subscribe()
    }

    /// Record one answer for `key` at `now` and persist it.
    ///
    /// The in-memory record keeps the answer even if persisting fails.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::QuotaExceeded` when local storage is full, or
    /// other storage errors.
    pub async fn record_answer(
        &mut self,
        key: ProgressKey,
        correct: bool,
        now: DateTime<Utc>,
    ) -> Result<ProgressRecord, StorageError> {
        let record = self.records.entry(key.clone()).or_default();
        record.record_answer(correct, now);
        let updated = record.clone();
        self.touch(now);

        self.persist_records().await?;
        self.persist_last_local_update().await?;
        self.notify(ProgressEvent::Answered { key, at: now });
        Ok(updated)
    }

    /// Move every scheduled review by `delta`. Returns how many moved.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the shifted snapshot cannot be persisted.
    pub async fn shift_review_dates(
        &mut self,
        delta: Duration,
        now: DateTime<Utc>,
    ) -> Result<usize, StorageError> {
        let count = self
            .records
            .values_mut()
            .map(|record| record.shift_review(delta, now))
            .filter(|shifted| *shifted)
            .count();
        if count == 0 {
            return Ok(0);
        }
        self.touch(now);
        self.persist_records().await?;
        self.persist_last_local_update().await?;
        self.notify(ProgressEvent::Shifted { count, at: now });
        Ok(count)
    }

    /// Clear every record and stamp the reset marker.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the cleared state cannot be persisted.
    pub async fn reset_all(&mut self, now: DateTime<Utc>) -> Result<(), StorageError> {
        self.clear(now).await?;
        self.notify(ProgressEvent::Reset {
            at: now,
            origin: ChangeOrigin::Local,
        });
        Ok(())
    }

    /// Apply a reset made on another device at `at`.
    ///
    /// Both the reset marker and `lastLocalUpdate` take the remote reset
    /// time, so remote progress written after the reset still wins.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the cleared state cannot be persisted.
    pub async fn apply_remote_reset(&mut self, at: DateTime<Utc>) -> Result<(), StorageError> {
        self.clear(at).await?;
        self.notify(ProgressEvent::Reset {
            at,
            origin: ChangeOrigin::Remote,
        });
        Ok(())
    }

    /// Replace every record, e.g. with a remote snapshot stamped `stamp`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the new snapshot cannot be persisted.
    pub async fn replace_all(
        &mut self,
        records: ProgressMap,
        stamp: DateTime<Utc>,
        origin: ChangeOrigin,
    ) -> Result<(), StorageError> {
        self.records = records;
        self.last_local_update = Some(stamp);
        self.persist_records().await?;
        self.persist_last_local_update().await?;
        self.notify(ProgressEvent::Replaced { origin });
        Ok(())
    }

    /// Align the local stamp with an upload that carried this store's state.
    ///
    /// Ignored if a newer local mutation happened since `expected`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the stamp cannot be persisted.
    pub async fn mark_uploaded(
        &mut self,
        expected: Option<DateTime<Utc>>,
        uploaded_at: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        if self.last_local_update != expected {
            return Ok(false);
        }
        self.last_local_update = Some(uploaded_at);
        self.persist_last_local_update().await?;
        Ok(true)
    }

    async fn clear(&mut self, at: DateTime<Utc>) -> Result<(), StorageError> {
        self.records.clear();
        self.last_reset = Some(at);
        self.last_local_update = Some(at);
        self.kv.remove_item(PROGRESS_KEY).await?;
        self.write_json(LAST_RESET_KEY, &serde_json::to_value(at)?)
            .await?;
        self.persist_last_local_update().await
    }

    /// Local stamps never move backwards, even if the clock does.
    fn touch(&mut self, now: DateTime<Utc>) {
        self.last_local_update = Some(self.last_local_update.map_or(now, |prev| prev.max(now)));
    }

    fn notify(&self, event: ProgressEvent) {
        // no receivers is fine
        let _ = self.events.send(event);
    }

    async fn persist_records(&self) -> Result<(), StorageError> {
        let value = serde_json::to_value(&self.records)?;
        self.write_json(PROGRESS_KEY, &value).await
    }

    async fn persist_last_local_update(&self) -> Result<(), StorageError> {
        match self.last_local_update {
            Some(ts) => {
                self.write_json(LAST_LOCAL_UPDATE_KEY, &serde_json::to_value(ts)?)
                    .await
            }
            None => self.kv.remove_item(LAST_LOCAL_UPDATE_KEY).await,
        }
    }

    async fn write_json(&self, key: &str, value: &Value) -> Result<(), StorageError> {
        let raw = serde_json::to_string(value)?;
        self.kv.set_item(key, &raw).await
    }

    async fn read_json(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let Some(raw) = self.kv.get_item(key).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                warn!(key, error = %err, "discarding unreadable stored value");
                self.kv.remove_item(key).await?;
                Ok(None)
            }
        }
    }

    async fn read_timestamp(&self, key: &str) -> Result<Option<DateTime<Utc>>, StorageError> {
        Ok(self
            .read_json(key)
            .await?
            .as_ref()
            .and_then(parse_timestamp))
    }
}
