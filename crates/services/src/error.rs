//! Shared error types for the services crate.

use thiserror::Error;

use storage::remote::RemoteError;
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;
use vocab_core::model::LessonError;

/// Errors emitted while building a session pool.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionError {
    #[error("no vocabulary selected for this session")]
    NoItemsSelected,
}

/// A remote progress key that cannot be decoded back to a local key.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum KeyDecodeError {
    #[error("invalid escape sequence at byte {position} in {key:?}")]
    InvalidEscape { key: String, position: usize },
    #[error("decoded key is not valid UTF-8: {key:?}")]
    InvalidUtf8 { key: String },
}

/// Errors emitted by the reconcilers.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SyncError {
    #[error("a sync is already running")]
    Busy,
    #[error("sync target not configured: {0}")]
    NotConfigured(&'static str),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `TrainerService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TrainerError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Lesson(#[from] LessonError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error("progress export is not a JSON object")]
    MalformedImport,
}
