//! Contracts for the two kinds of remote backing store.
//!
//! Both are external collaborators. Sync code is written against these traits
//! and never sees a concrete network client.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

mod dir;
mod memory;

pub use dir::DirectoryFileStore;
pub use memory::{InMemoryFileStore, InMemoryPushStore};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RemoteError {
    #[error("remote store unavailable: {0}")]
    Unavailable(String),

    #[error("remote store rejected the request: {0}")]
    Rejected(String),

    #[error("remote payload malformed: {0}")]
    Malformed(String),
}

//
// ─── PUSH-STYLE STORE ──────────────────────────────────────────────────────────
//

/// Live listener on one path of a [`PushStore`].
///
/// The current value is delivered first, then every change. `None` means the
/// path does not exist. Dropping the subscription unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    path: String,
    rx: mpsc::UnboundedReceiver<Option<Value>>,
}

impl Subscription {
    #[must_use]
    pub fn new(path: impl Into<String>, rx: mpsc::UnboundedReceiver<Option<Value>>) -> Self {
        Self {
            path: path.into(),
            rx,
        }
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Next snapshot, or `None` once the store closed the subscription.
    pub async fn next(&mut self) -> Option<Option<Value>> {
        self.rx.recv().await
    }
}

/// Real-time tree store with per-path subscriptions.
#[async_trait]
pub trait PushStore: Send + Sync {
    /// # Errors
    ///
    /// Returns `RemoteError` if the store cannot be reached.
    async fn read(&self, path: &str) -> Result<Option<Value>, RemoteError>;

    /// Replace the value at `path`.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError` if the store cannot be reached or refuses the write.
    async fn write(&self, path: &str, value: Value) -> Result<(), RemoteError>;

    /// # Errors
    ///
    /// Returns `RemoteError` if the store cannot be reached.
    async fn delete(&self, path: &str) -> Result<(), RemoteError>;

    /// # Errors
    ///
    /// Returns `RemoteError` if the listener cannot be attached.
    async fn subscribe(&self, path: &str) -> Result<Subscription, RemoteError>;
}

//
// ─── FILE-STYLE STORE ──────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHandle {
    pub id: String,
    pub name: String,
}

/// Single-document cloud store with explicit download and upload.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Locate `name`, creating an empty file if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError` if the store cannot be reached.
    async fn find_or_create(&self, name: &str) -> Result<FileHandle, RemoteError>;

    /// Contents of the file, or `None` if it is empty.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError::Malformed` if the contents are not JSON, or
    /// another `RemoteError` if the store cannot be reached.
    async fn download(&self, file: &FileHandle) -> Result<Option<Value>, RemoteError>;

    /// # Errors
    ///
    /// Returns `RemoteError` if the store cannot be reached or refuses the upload.
    async fn upload(&self, file: &FileHandle, value: &Value) -> Result<(), RemoteError>;
}
