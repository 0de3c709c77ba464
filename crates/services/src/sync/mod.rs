//! Reconciliation of local progress and lessons with remote stores.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

use storage::progress::ProgressStore;

pub mod codec;
pub mod decision;
mod file;
mod marker;
mod push;
mod status;

pub use decision::{Decision, Stamps};
pub use file::{FilePayload, FileSync};
pub use marker::{FILE_MARKER_KEY, PUSH_MARKER_KEY, SyncMarker};
pub use push::{PushSync, RemoteProgress};
pub use status::{StatusHandle, SyncStatus};

/// Progress store shared by the trainer and every sync target.
pub type SharedProgress = Arc<Mutex<ProgressStore>>;

/// Result of one reconciliation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Another run was in flight; this trigger was coalesced.
    Skipped,
    InSync,
    AdoptedRemote,
    PushedLocal,
    Merged,
    /// A newer remote reset cleared local progress.
    ResetApplied,
    /// A local reset newer than the remote marker was pushed.
    ResetPushed,
    /// The remote file did not exist and was created from local state.
    Created,
}

impl From<Decision> for SyncOutcome {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::AdoptRemote => SyncOutcome::AdoptedRemote,
            Decision::Merge => SyncOutcome::Merged,
            Decision::PushLocal => SyncOutcome::PushedLocal,
            Decision::InSync => SyncOutcome::InSync,
        }
    }
}

/// Per-target busy flag; a second trigger while held is coalesced.
pub(crate) struct BusyGuard(Arc<AtomicBool>);

impl BusyGuard {
    pub(crate) fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        if flag.swap(true, Ordering::AcqRel) {
            None
        } else {
            Some(Self(Arc::clone(flag)))
        }
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_guard_coalesces_until_dropped() {
        let flag = Arc::new(AtomicBool::new(false));
        let guard = BusyGuard::acquire(&flag).unwrap();
        assert!(BusyGuard::acquire(&flag).is_none());
        drop(guard);
        assert!(BusyGuard::acquire(&flag).is_some());
    }
}
