//! Reconciler for single-file cloud stores (manual, periodic and exit-time).

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use storage::lessons::LessonStore;
use storage::progress::{ChangeOrigin, normalize_map, parse_timestamp};
use storage::remote::{FileHandle, FileStore};
use storage::repository::{KeyValueStore, StorageError};
use vocab_core::Clock;
use vocab_core::merge::merge_progress;
use vocab_core::model::{Lesson, ProgressMap};
use vocab_core::time::epoch;

use super::decision::{Decision, Stamps, decide_file, remote_reset_wins};
use super::marker::{FILE_MARKER_KEY, SyncMarker};
use super::status::StatusHandle;
use super::{BusyGuard, SharedProgress, SyncOutcome};
use crate::config::{FILE_FORMAT_VERSION, SyncConfig};
use crate::error::SyncError;

const MIN_AUTO_SYNC_INTERVAL: Duration = Duration::from_secs(1);

//
// ─── PAYLOAD ───────────────────────────────────────────────────────────────────
//

/// Contents of the sync file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FilePayload {
    pub version: String,
    pub last_modified: Option<DateTime<Utc>>,
    /// `None` when the file carries no lesson list at all.
    pub lessons: Option<Vec<Lesson>>,
    pub progress: ProgressMap,
    pub last_reset: Option<DateTime<Utc>>,
}

impl FilePayload {
    /// Lenient decode: unreadable lessons and records are skipped.
    #[must_use]
    pub fn parse(value: &Value) -> Self {
        let lessons = value.get("lections").and_then(Value::as_array).map(|items| {
            items
                .iter()
                .filter_map(|raw| match serde_json::from_value::<Lesson>(raw.clone()) {
                    Ok(lesson) => Some(lesson),
                    Err(err) => {
                        warn!(error = %err, "skipping malformed lesson in sync file");
                        None
                    }
                })
                .collect()
        });
        Self {
            version: value
                .get("version")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
            last_modified: value.get("lastModified").and_then(parse_timestamp),
            lessons,
            progress: value
                .get("progress")
                .and_then(normalize_map)
                .unwrap_or_default(),
            last_reset: value.get("lastProgressReset").and_then(parse_timestamp),
        }
    }

    /// # Errors
    ///
    /// Returns `serde_json::Error` if a lesson or record cannot be serialized.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        let mut value = json!({
            "version": self.version,
            "lastModified": self.last_modified,
            "lections": serde_json::to_value(self.lessons.as_deref().unwrap_or_default())?,
            "progress": serde_json::to_value(&self.progress)?,
        });
        if let (Some(at), Some(fields)) = (self.last_reset, value.as_object_mut()) {
            fields.insert("lastProgressReset".into(), serde_json::to_value(at)?);
        }
        Ok(value)
    }
}

//
// ─── SYNC ──────────────────────────────────────────────────────────────────────
//

struct Shared {
    remote: Arc<dyn FileStore>,
    config: SyncConfig,
    progress: SharedProgress,
    lessons: LessonStore,
    clock: Clock,
    status: StatusHandle,
    marker: SyncMarker,
    busy: Arc<AtomicBool>,
    handle: StdMutex<Option<FileHandle>>,
}

/// Keeps local progress and lessons reconciled with one file in a
/// [`FileStore`].
///
/// Clones share the busy flag, so overlapping triggers are coalesced.
#[derive(Clone)]
pub struct FileSync {
    shared: Arc<Shared>,
}

impl FileSync {
    #[must_use]
    pub fn new(
        remote: Arc<dyn FileStore>,
        config: SyncConfig,
        progress: SharedProgress,
        lessons: LessonStore,
        kv: Arc<dyn KeyValueStore>,
        clock: Clock,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                remote,
                config,
                progress,
                lessons,
                clock,
                status: StatusHandle::new(),
                marker: SyncMarker::new(kv, FILE_MARKER_KEY),
                busy: Arc::new(AtomicBool::new(false)),
                handle: StdMutex::new(None),
            }),
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusHandle {
        self.shared.status.clone()
    }

    /// Download, compare and push or pull as needed.
    ///
    /// Returns `SyncOutcome::Skipped` if another run is in flight.
    ///
    /// # Errors
    ///
    /// Returns `SyncError` if the file store or local storage fails; local
    /// progress is left as it was.
    pub async fn reconcile_now(&self) -> Result<SyncOutcome, SyncError> {
        let Some(_busy) = BusyGuard::acquire(&self.shared.busy) else {
            debug!("file sync already running, trigger coalesced");
            return Ok(SyncOutcome::Skipped);
        };
        self.shared.status.syncing();
        let result = self.shared.reconcile().await;
        match &result {
            Ok(outcome) => {
                info!(?outcome, file = %self.shared.config.file_name, "file sync finished");
                self.shared.status.synced(self.shared.clock.now());
            }
            Err(err) => {
                warn!(error = %err, "file sync failed, keeping local state");
                self.shared.status.failed(err);
            }
        }
        result
    }

    /// Run [`FileSync::reconcile_now`] every auto-sync interval.
    ///
    /// The first run happens one interval after spawning.
    #[must_use]
    pub fn spawn_periodic(&self) -> JoinHandle<()> {
        let sync = self.clone();
        let period = self
            .shared
            .config
            .auto_sync_interval
            .max(MIN_AUTO_SYNC_INTERVAL);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                // failures are logged and published through the status
                let _ = sync.reconcile_now().await;
            }
        })
    }

    /// Best-effort upload on exit, not awaited by the caller.
    ///
    /// Returns `None` when no file is known yet or a sync is in flight. The
    /// spawned task only uploads if something changed since the last sync.
    #[must_use]
    pub fn final_push(&self) -> Option<JoinHandle<()>> {
        let handle = self.shared.known_handle()?;
        let busy = BusyGuard::acquire(&self.shared.busy)?;
        let shared = Arc::clone(&self.shared);
        Some(tokio::spawn(async move {
            let _busy = busy;
            match shared.upload_if_changed(&handle).await {
                Ok(true) => info!("final push uploaded local changes"),
                Ok(false) => debug!("final push skipped, nothing changed"),
                Err(err) => warn!(error = %err, "final push failed"),
            }
        }))
    }
}

impl Shared {
    fn known_handle(&self) -> Option<FileHandle> {
        self.handle.lock().ok().and_then(|slot| slot.clone())
    }

    async fn handle(&self) -> Result<FileHandle, SyncError> {
        if let Some(handle) = self.known_handle() {
            return Ok(handle);
        }
        let handle = self.remote.find_or_create(&self.config.file_name).await?;
        if let Ok(mut slot) = self.handle.lock() {
            *slot = Some(handle.clone());
        }
        Ok(handle)
    }

    async fn reconcile(&self) -> Result<SyncOutcome, SyncError> {
        let handle = self.handle().await?;
        let Some(value) = self.remote.download(&handle).await? else {
            self.upload(&handle).await?;
            return Ok(SyncOutcome::Created);
        };
        let file = FilePayload::parse(&value);
        if file.version != FILE_FORMAT_VERSION {
            debug!(version = %file.version, "sync file has unexpected version");
        }

        let last_synced = self.marker.get().await?;
        let lessons_modified = self.lessons.last_modified().await?;
        let starter_only = self.lessons.only_starter_content().await?;
        let remote_stamp = file.last_modified.unwrap_or_else(epoch);

        let decision = {
            let mut progress = self.progress.lock().await;
            if remote_reset_wins(progress.last_reset(), file.last_reset) {
                let at = file.last_reset.unwrap_or_else(epoch);
                progress.apply_remote_reset(at).await?;
                drop(progress);
                self.marker.set(at).await?;
                info!(%at, "applied progress reset from sync file");
                return Ok(SyncOutcome::ResetApplied);
            }

            let local = [progress.last_local_update(), lessons_modified]
                .into_iter()
                .flatten()
                .max();
            let local_has_data = !progress.is_empty()
                || lessons_modified.is_some()
                || progress.last_reset().is_some();
            let freshly_provisioned =
                last_synced.is_none() && starter_only && progress.is_empty();

            let decision = decide_file(
                Stamps {
                    local,
                    local_has_records: local_has_data,
                    remote: Some(remote_stamp),
                    last_synced,
                },
                freshly_provisioned,
            );
            debug!(?decision, ?local, remote = %remote_stamp, freshly_provisioned, "file comparison");

            match decision {
                Decision::AdoptRemote => {
                    progress
                        .replace_all(file.progress.clone(), remote_stamp, ChangeOrigin::Remote)
                        .await?;
                }
                Decision::Merge => {
                    let merged = merge_progress(progress.records(), &file.progress);
                    let stamp = local
                        .into_iter()
                        .chain([remote_stamp])
                        .fold(self.clock.now(), |latest, ts| latest.max(ts));
                    progress
                        .replace_all(merged, stamp, ChangeOrigin::Remote)
                        .await?;
                }
                Decision::PushLocal | Decision::InSync => {}
            }
            decision
        };

        match decision {
            Decision::AdoptRemote => {
                if let Some(lessons) = file.lessons.filter(|lessons| !lessons.is_empty()) {
                    self.lessons.replace_all(&lessons, ChangeOrigin::Remote).await?;
                }
                self.marker.set(remote_stamp).await?;
                info!(records = file.progress.len(), "adopted sync file");
            }
            Decision::Merge => {
                if let Some(remote_lessons) = file.lessons {
                    self.merge_lessons(remote_lessons).await?;
                }
                self.upload(&handle).await?;
            }
            Decision::PushLocal => self.upload(&handle).await?,
            Decision::InSync => {}
        }
        Ok(decision.into())
    }

    /// Keep every local lesson and append remote ones this device lacks.
    async fn merge_lessons(&self, remote: Vec<Lesson>) -> Result<(), SyncError> {
        let mut lessons = self.lessons.all().await?;
        let known: HashSet<_> = lessons.iter().map(|l| l.id.clone()).collect();
        let before = lessons.len();
        lessons.extend(remote.into_iter().filter(|l| !known.contains(&l.id)));
        if lessons.len() != before {
            self.lessons
                .replace_all(&lessons, ChangeOrigin::Remote)
                .await?;
        }
        Ok(())
    }

    async fn upload(&self, handle: &FileHandle) -> Result<(), SyncError> {
        let (progress, expected, last_reset) = {
            let progress = self.progress.lock().await;
            (
                progress.records().clone(),
                progress.last_local_update(),
                progress.last_reset(),
            )
        };
        let lessons_modified = self.lessons.last_modified().await?;
        let stamp = [expected, lessons_modified]
            .into_iter()
            .flatten()
            .fold(self.clock.now(), |latest, ts| latest.max(ts));

        let payload = FilePayload {
            version: FILE_FORMAT_VERSION.to_owned(),
            last_modified: Some(stamp),
            lessons: Some(self.lessons.all().await?),
            progress,
            last_reset,
        };
        let value = payload.to_value().map_err(StorageError::from)?;
        self.remote.upload(handle, &value).await?;

        self.progress
            .lock()
            .await
            .mark_uploaded(expected, stamp)
            .await?;
        self.marker.set(stamp).await?;
        debug!(records = payload.progress.len(), %stamp, "uploaded sync file");
        Ok(())
    }

    async fn upload_if_changed(&self, handle: &FileHandle) -> Result<bool, SyncError> {
        let last_synced = self.marker.get().await?;
        let local = {
            let progress = self.progress.lock().await;
            progress.last_local_update()
        };
        let local = [local, self.lessons.last_modified().await?]
            .into_iter()
            .flatten()
            .max();
        let changed = match (local, last_synced) {
            (Some(local), Some(synced)) => local > synced,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if changed {
            self.upload(handle).await?;
        }
        Ok(changed)
    }
}
