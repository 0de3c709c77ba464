use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("storage quota exceeded while writing {key}")]
    QuotaExceeded { key: String },

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Local persistent key-value contract.
///
/// Values are opaque strings; callers store serialized JSON.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be read.
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::QuotaExceeded` when the backend is full, or other storage errors.
    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove `key`. Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be written.
    async fn remove_item(&self, key: &str) -> Result<(), StorageError>;
}

/// Simple in-memory store for testing and prototyping.
///
/// An optional byte quota mimics browser storage limits.
#[derive(Clone, Default)]
pub struct InMemoryKeyValueStore {
    items: Arc<Mutex<HashMap<String, String>>>,
    quota_bytes: Option<usize>,
}

impl InMemoryKeyValueStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject writes that would push the total of keys and values past `bytes`.
    #[must_use]
    pub fn with_quota(mut self, bytes: usize) -> Self {
        self.quota_bytes = Some(bytes);
        self
    }

    /// Raw access for tests that need to plant or inspect persisted values.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.items
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let guard = self
            .items
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut guard = self
            .items
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        if let Some(quota) = self.quota_bytes {
            let others: usize = guard
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            if others + key.len() + value.len() > quota {
                return Err(StorageError::QuotaExceeded {
                    key: key.to_owned(),
                });
            }
        }
        guard.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let mut guard = self
            .items
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.remove(key);
        Ok(())
    }
}

/// Local storage handle behind a trait object for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub kv: Arc<dyn KeyValueStore>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            kv: Arc::new(InMemoryKeyValueStore::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_remove_round_trip() {
        let store = InMemoryKeyValueStore::new();
        assert_eq!(store.get_item("k").await.unwrap(), None);

        store.set_item("k", "v1").await.unwrap();
        store.set_item("k", "v2").await.unwrap();
        assert_eq!(store.get_item("k").await.unwrap().as_deref(), Some("v2"));

        store.remove_item("k").await.unwrap();
        store.remove_item("k").await.unwrap();
        assert_eq!(store.get_item("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn quota_rejects_oversized_writes() {
        let store = InMemoryKeyValueStore::new().with_quota(10);
        store.set_item("a", "1234").await.unwrap();

        let err = store.set_item("b", "123456789").await.unwrap_err();
        assert!(matches!(err, StorageError::QuotaExceeded { ref key } if key == "b"));

        // replacing an existing value only counts the new size
        store.set_item("a", "123456789").await.unwrap();
    }
}
