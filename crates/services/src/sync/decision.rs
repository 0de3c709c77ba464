//! Timestamp comparison shared by every sync target.

use chrono::{DateTime, Utc};

use vocab_core::time::epoch;

/// What to do with local and remote progress after comparing their stamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Replace local state with the remote snapshot.
    AdoptRemote,
    /// Both sides changed since the last exchange: merge per record, then push.
    Merge,
    /// Upload local state.
    PushLocal,
    /// Nothing to do.
    InSync,
}

/// Inputs to [`decide`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Stamps {
    /// `lastLocalUpdate`, captured before any live update of this session.
    pub local: Option<DateTime<Utc>>,
    pub local_has_records: bool,
    /// Upload stamp of the remote snapshot; `None` if there is no snapshot.
    pub remote: Option<DateTime<Utc>>,
    /// When this device last exchanged progress with the target.
    pub last_synced: Option<DateTime<Utc>>,
}

impl Stamps {
    fn local_changed_since_sync(&self) -> bool {
        match (self.local, self.last_synced) {
            (Some(local), Some(synced)) => local > synced,
            _ => false,
        }
    }
}

/// Last-write-wins on snapshot stamps.
///
/// A device without a local stamp adopts the remote snapshot, unless it
/// carries records (data from before stamps existed). That case departs
/// from plain last-write-wins, which would adopt the remote snapshot
/// wholesale: the two are merged per record and the result is pushed, so
/// unstamped local answers survive.
#[must_use]
pub fn decide(stamps: Stamps) -> Decision {
    let Some(local) = stamps.local else {
        return match (stamps.remote, stamps.local_has_records) {
            (None, true) => Decision::PushLocal,
            (None, false) => Decision::InSync,
            (Some(_), true) => Decision::Merge,
            (Some(_), false) => Decision::AdoptRemote,
        };
    };
    let remote = stamps.remote.unwrap_or_else(epoch);

    if remote > local {
        if stamps.local_has_records && stamps.local_changed_since_sync() {
            Decision::Merge
        } else {
            Decision::AdoptRemote
        }
    } else if local > remote && stamps.local_has_records {
        Decision::PushLocal
    } else {
        Decision::InSync
    }
}

/// File-store variant of [`decide`].
///
/// When the local device looks freshly provisioned and the file holds data,
/// the file wins even on equal or ambiguous stamps. This is a heuristic
/// about user intent, not a guarantee.
#[must_use]
pub fn decide_file(stamps: Stamps, freshly_provisioned: bool) -> Decision {
    if freshly_provisioned && stamps.remote.is_some() {
        return Decision::AdoptRemote;
    }
    decide(stamps)
}

/// True if a remote reset marker should wipe local progress.
///
/// Resets override whatever [`decide`] produced.
#[must_use]
pub fn remote_reset_wins(
    local_reset: Option<DateTime<Utc>>,
    remote_reset: Option<DateTime<Utc>>,
) -> bool {
    match (local_reset, remote_reset) {
        (_, None) => false,
        (None, Some(_)) => true,
        (Some(local), Some(remote)) => remote > local,
    }
}
