use chrono::{DateTime, Utc};
use std::sync::Arc;

use storage::progress::parse_timestamp;
use storage::repository::{KeyValueStore, StorageError};

pub const PUSH_MARKER_KEY: &str = "lastPushSyncTime";
pub const FILE_MARKER_KEY: &str = "lastSyncTime";

/// Locally persisted time of the last exchange with one sync target.
#[derive(Clone)]
pub struct SyncMarker {
    kv: Arc<dyn KeyValueStore>,
    key: &'static str,
}

impl SyncMarker {
    #[must_use]
    pub fn new(kv: Arc<dyn KeyValueStore>, key: &'static str) -> Self {
        Self { kv, key }
    }

    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be read.
    pub async fn get(&self) -> Result<Option<DateTime<Utc>>, StorageError> {
        let Some(raw) = self.kv.get_item(self.key).await? else {
            return Ok(None);
        };
        Ok(serde_json::from_str(&raw)
            .ok()
            .as_ref()
            .and_then(parse_timestamp))
    }

    /// # Errors
    ///
    /// Returns `StorageError` if the marker cannot be persisted.
    pub async fn set(&self, at: DateTime<Utc>) -> Result<(), StorageError> {
        let raw = serde_json::to_string(&at)?;
        self.kv.set_item(self.key, &raw).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::repository::InMemoryKeyValueStore;
    use vocab_core::time::fixed_now;

    #[tokio::test]
    async fn marker_round_trips_and_ignores_garbage() {
        let kv = Arc::new(InMemoryKeyValueStore::new());
        let marker = SyncMarker::new(kv.clone(), FILE_MARKER_KEY);
        assert_eq!(marker.get().await.unwrap(), None);

        marker.set(fixed_now()).await.unwrap();
        assert_eq!(marker.get().await.unwrap(), Some(fixed_now()));

        kv.set_item(FILE_MARKER_KEY, "garbage").await.unwrap();
        assert_eq!(marker.get().await.unwrap(), None);
    }
}
