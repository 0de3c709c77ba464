use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;

/// Non-blocking sync indicator for one target.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SyncStatus {
    #[default]
    NotSynced,
    Syncing,
    Synced { at: DateTime<Utc> },
    Error { message: String },
}

impl SyncStatus {
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, SyncStatus::Error { .. })
    }
}

/// Shared publisher of a target's [`SyncStatus`].
#[derive(Debug, Clone)]
pub struct StatusHandle {
    tx: Arc<watch::Sender<SyncStatus>>,
}

impl Default for StatusHandle {
    fn default() -> Self {
        let (tx, _) = watch::channel(SyncStatus::NotSynced);
        Self { tx: Arc::new(tx) }
    }
}

impl StatusHandle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.tx.subscribe()
    }

    #[must_use]
    pub fn current(&self) -> SyncStatus {
        self.tx.borrow().clone()
    }

    pub fn set(&self, status: SyncStatus) {
        self.tx.send_replace(status);
    }

    pub fn syncing(&self) {
        self.set(SyncStatus::Syncing);
    }

    pub fn synced(&self, at: DateTime<Utc>) {
        self.set(SyncStatus::Synced { at });
    }

    pub fn failed(&self, err: &impl std::fmt::Display) {
        self.set(SyncStatus::Error {
            message: err.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vocab_core::time::fixed_now;

    #[tokio::test]
    async fn subscribers_observe_transitions() {
        let status = StatusHandle::new();
        let mut rx = status.subscribe();
        assert_eq!(*rx.borrow(), SyncStatus::NotSynced);

        status.syncing();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), SyncStatus::Syncing);

        status.failed(&"offline");
        assert!(status.current().is_error());

        status.synced(fixed_now());
        assert_eq!(status.current(), SyncStatus::Synced { at: fixed_now() });
    }
}
