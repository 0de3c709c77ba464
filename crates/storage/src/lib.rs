#![forbid(unsafe_code)]

pub mod lessons;
pub mod progress;
pub mod remote;
pub mod repository;
pub mod sqlite;

pub use lessons::{LessonEvent, LessonStore};
pub use progress::{ChangeOrigin, ProgressEvent, ProgressSnapshot, ProgressStore};
pub use repository::{InMemoryKeyValueStore, KeyValueStore, Storage, StorageError};
