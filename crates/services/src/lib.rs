#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod sessions;
pub mod sync;
pub mod trainer;

pub use vocab_core::Clock;
pub use sessions as session;

pub use config::SyncConfig;
pub use error::{KeyDecodeError, SessionError, SyncError, TrainerError};
pub use sessions::{DirectionMode, Drawn, SelectionMode, SessionPool, SessionProgress};
pub use sync::{FileSync, PushSync, SyncOutcome, SyncStatus};
pub use trainer::{SyncReport, TrainerService};
