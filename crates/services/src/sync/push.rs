//! Reconciler for push-style stores with live subscriptions.

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use storage::lessons::{LessonEvent, LessonStore};
use storage::progress::{ChangeOrigin, ProgressEvent, parse_timestamp};
use storage::remote::{PushStore, Subscription};
use storage::repository::{KeyValueStore, StorageError};
use vocab_core::Clock;
use vocab_core::merge::merge_progress;
use vocab_core::model::{Lesson, LessonId, ProgressMap};
use vocab_core::time::epoch;

use super::codec::{decode_map, encode_map};
use super::decision::{Decision, Stamps, decide, remote_reset_wins};
use super::marker::{PUSH_MARKER_KEY, SyncMarker};
use super::status::StatusHandle;
use super::{BusyGuard, SharedProgress, SyncOutcome};
use crate::config::SyncConfig;
use crate::error::SyncError;

//
// ─── PAYLOAD ───────────────────────────────────────────────────────────────────
//

/// Decoded value of the `.../progress` path.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RemoteProgress {
    pub records: ProgressMap,
    /// `None` when the path does not exist; a snapshot without a stamp reads
    /// as the epoch.
    pub last_upload: Option<DateTime<Utc>>,
}

impl RemoteProgress {
    #[must_use]
    pub fn parse(value: Option<&Value>) -> Self {
        let Some(value) = value else {
            return Self::default();
        };
        Self {
            records: value.get("progress").map(decode_map).unwrap_or_default(),
            last_upload: Some(
                value
                    .get("lastUpload")
                    .and_then(parse_timestamp)
                    .unwrap_or_else(epoch),
            ),
        }
    }

    /// # Errors
    ///
    /// Returns `serde_json::Error` if a record cannot be serialized.
    pub fn to_value(records: &ProgressMap, stamp: DateTime<Utc>) -> Result<Value, serde_json::Error> {
        Ok(json!({
            "progress": encode_map(records)?,
            "lastUpload": stamp,
        }))
    }
}

//
// ─── SYNC ──────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy)]
struct LocalStamps {
    last_update: Option<DateTime<Utc>>,
    has_records: bool,
}

struct Shared {
    remote: Arc<dyn PushStore>,
    config: SyncConfig,
    progress: SharedProgress,
    lessons: LessonStore,
    clock: Clock,
    status: StatusHandle,
    marker: SyncMarker,
    busy: Arc<AtomicBool>,
}

/// Keeps local progress and lessons reconciled with a [`PushStore`].
///
/// [`PushSync::start`] runs the startup reconciliation and then attaches
/// live listeners. Remote failures never touch local state; they set the
/// status to `Error` and wait for the next trigger.
pub struct PushSync {
    shared: Arc<Shared>,
    live: StdMutex<Option<JoinHandle<()>>>,
}

impl PushSync {
    #[must_use]
    pub fn new(
        remote: Arc<dyn PushStore>,
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
                marker: SyncMarker::new(kv, PUSH_MARKER_KEY),
                busy: Arc::new(AtomicBool::new(false)),
            }),
            live: StdMutex::new(None),
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusHandle {
        self.shared.status.clone()
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live
            .lock()
            .map(|slot| slot.as_ref().is_some_and(|task| !task.is_finished()))
            .unwrap_or(false)
    }

    /// Reconcile once, then follow remote and local changes until stopped.
    ///
    /// The startup comparison uses local stamps captured before any listener
    /// is attached.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Busy` if live sync is already running, or the
    /// remote/storage error that prevented startup.
    pub async fn start(&self) -> Result<SyncOutcome, SyncError> {
        if self.is_live() {
            return Err(SyncError::Busy);
        }
        let progress_rx = self.shared.progress.lock().await.subscribe();
        let lesson_rx = self.shared.lessons.subscribe();

        let outcome = self.reconcile_on_startup().await?;
        let subscriptions = match Subscriptions::attach(&self.shared).await {
            Ok(subscriptions) => subscriptions,
            Err(err) => {
                self.shared.status.failed(&err);
                return Err(err);
            }
        };

        let task = tokio::spawn(run_live(
            Arc::clone(&self.shared),
            subscriptions,
            progress_rx,
            lesson_rx,
        ));
        if let Ok(mut slot) = self.live.lock() {
            *slot = Some(task);
        }
        info!(user = %self.shared.config.user_id, "live sync attached");
        Ok(outcome)
    }

    /// Detach live listeners. Local state is kept as is.
    pub fn stop(&self) {
        if let Ok(mut slot) = self.live.lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
    }

    /// One-shot reconciliation against the pre-session local stamps.
    ///
    /// # Errors
    ///
    /// Returns `SyncError` if the remote store or local storage fails.
    pub async fn reconcile_on_startup(&self) -> Result<SyncOutcome, SyncError> {
        let Some(_busy) = BusyGuard::acquire(&self.shared.busy) else {
            return Ok(SyncOutcome::Skipped);
        };
        let pre_session = {
            let progress = self.shared.progress.lock().await;
            LocalStamps {
                last_update: progress.last_local_update(),
                has_records: !progress.is_empty(),
            }
        };
        self.shared.status.syncing();
        let result = self.shared.reconcile(Some(pre_session)).await;
        self.shared.finish(&result);
        result
    }

    /// Re-run the comparison against current local state.
    ///
    /// # Errors
    ///
    /// Returns `SyncError` if the remote store or local storage fails.
    pub async fn reconcile_now(&self) -> Result<SyncOutcome, SyncError> {
        let Some(_busy) = BusyGuard::acquire(&self.shared.busy) else {
            return Ok(SyncOutcome::Skipped);
        };
        self.shared.status.syncing();
        let result = self.shared.reconcile(None).await;
        self.shared.finish(&result);
        result
    }
}

impl Drop for PushSync {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Shared {
    fn finish(&self, result: &Result<SyncOutcome, SyncError>) {
        match result {
            Ok(outcome) => {
                info!(?outcome, "push sync finished");
                self.status.synced(self.clock.now());
            }
            Err(err) => {
                warn!(error = %err, "push sync failed, keeping local state");
                self.status.failed(err);
            }
        }
    }

    async fn reconcile(&self, pre_session: Option<LocalStamps>) -> Result<SyncOutcome, SyncError> {
        let progress = self.remote.read(&self.config.progress_path()).await?;
        let reset = self.remote.read(&self.config.reset_path()).await?;
        let lessons = self.remote.read(&self.config.lessons_path()).await?;
        let order = self.remote.read(&self.config.lesson_order_path()).await?;

        // a newer remote reset overrides the progress comparison
        let outcome = if self.apply_remote_reset(reset.as_ref()).await? {
            SyncOutcome::ResetApplied
        } else if self.push_pending_reset(reset.as_ref()).await? {
            SyncOutcome::ResetPushed
        } else {
            self.apply_remote_progress(progress.as_ref(), pre_session)
                .await?
                .into()
        };
        self.apply_remote_lessons(lessons.as_ref(), true).await?;
        self.apply_remote_order(order.as_ref()).await?;
        Ok(outcome)
    }

    // ─── progress ───

    async fn apply_remote_progress(
        &self,
        value: Option<&Value>,
        pre_session: Option<LocalStamps>,
    ) -> Result<Decision, SyncError> {
        let remote = RemoteProgress::parse(value);
        let last_synced = self.marker.get().await?;

        let decision = {
            let mut progress = self.progress.lock().await;
            let local = pre_session.unwrap_or(LocalStamps {
                last_update: progress.last_local_update(),
                has_records: !progress.is_empty(),
            });
            let decision = decide(Stamps {
                local: local.last_update,
                local_has_records: local.has_records,
                remote: remote.last_upload,
                last_synced,
            });
            debug!(
                ?decision,
                local = ?local.last_update,
                remote = ?remote.last_upload,
                "progress comparison"
            );

            match decision {
                Decision::AdoptRemote => {
                    let stamp = remote.last_upload.unwrap_or_else(epoch);
                    let count = remote.records.len();
                    progress
                        .replace_all(remote.records, stamp, ChangeOrigin::Remote)
                        .await?;
                    self.marker.set(stamp).await?;
                    info!(records = count, "adopted remote progress");
                }
                Decision::Merge => {
                    let merged = merge_progress(progress.records(), &remote.records);
                    let stamp = [progress.last_local_update(), remote.last_upload]
                        .into_iter()
                        .flatten()
                        .fold(self.clock.now(), |latest, ts| latest.max(ts));
                    progress
                        .replace_all(merged, stamp, ChangeOrigin::Remote)
                        .await?;
                    info!(records = progress.records().len(), "merged local and remote progress");
                }
                Decision::PushLocal | Decision::InSync => {}
            }
            decision
        };

        if matches!(decision, Decision::Merge | Decision::PushLocal) {
            self.push_progress().await?;
        }
        Ok(decision)
    }

    async fn apply_remote_reset(&self, value: Option<&Value>) -> Result<bool, SyncError> {
        let Some(remote_reset) = value.and_then(parse_timestamp) else {
            return Ok(false);
        };
        {
            let mut progress = self.progress.lock().await;
            if !remote_reset_wins(progress.last_reset(), Some(remote_reset)) {
                return Ok(false);
            }
            progress.apply_remote_reset(remote_reset).await?;
        }
        self.marker.set(remote_reset).await?;
        info!(at = %remote_reset, "applied remote progress reset");
        Ok(true)
    }

    async fn push_progress(&self) -> Result<(), SyncError> {
        let (records, expected) = {
            let progress = self.progress.lock().await;
            (progress.records().clone(), progress.last_local_update())
        };
        let now = self.clock.now();
        let stamp = expected.map_or(now, |local| local.max(now));
        let value = RemoteProgress::to_value(&records, stamp).map_err(StorageError::from)?;

        self.remote
            .write(&self.config.progress_path(), value)
            .await?;
        self.progress
            .lock()
            .await
            .mark_uploaded(expected, stamp)
            .await?;
        self.marker.set(stamp).await?;
        debug!(records = records.len(), %stamp, "pushed progress");
        Ok(())
    }

    /// Push the local reset if the remote marker is older or missing.
    ///
    /// A reset whose live push failed or was coalesced is retried here on
    /// the next trigger.
    async fn push_pending_reset(&self, remote_reset: Option<&Value>) -> Result<bool, SyncError> {
        let remote_reset = remote_reset.and_then(parse_timestamp);
        let Some(local_reset) = self.progress.lock().await.last_reset() else {
            return Ok(false);
        };
        if remote_reset.is_some_and(|remote| remote >= local_reset) {
            return Ok(false);
        }
        debug!(%local_reset, ?remote_reset, "remote reset marker is behind");
        self.push_reset(local_reset).await?;
        Ok(true)
    }

    async fn push_reset(&self, at: DateTime<Utc>) -> Result<(), SyncError> {
        self.remote
            .write(&self.config.reset_path(), json!(at))
            .await?;
        info!(%at, "pushed progress reset");
        self.push_progress().await
    }

    // ─── lessons ───

    /// Store remote lessons locally. With `upload_if_empty`, an empty remote
    /// collection is seeded from local lessons instead.
    async fn apply_remote_lessons(
        &self,
        value: Option<&Value>,
        upload_if_empty: bool,
    ) -> Result<(), SyncError> {
        let Some(entries) = value.and_then(Value::as_object) else {
            if !upload_if_empty {
                return Ok(());
            }
            let local = self.lessons.all().await?;
            if !local.is_empty() {
                debug!(lessons = local.len(), "remote has no lessons, uploading local ones");
                self.upload_lessons(&local).await?;
            }
            return Ok(());
        };

        for (id, raw) in entries {
            let lesson: Lesson = match serde_json::from_value(raw.clone()) {
                Ok(lesson) => lesson,
                Err(err) => {
                    warn!(%id, error = %err, "skipping malformed remote lesson");
                    continue;
                }
            };
            if self.lessons.get(&lesson.id).await?.as_ref() != Some(&lesson) {
                self.lessons.save(&lesson, ChangeOrigin::Remote).await?;
            }
        }
        Ok(())
    }

    async fn apply_remote_order(&self, value: Option<&Value>) -> Result<(), SyncError> {
        let Some(value) = value else {
            return Ok(());
        };
        let order: Vec<LessonId> = match serde_json::from_value(value.clone()) {
            Ok(order) => order,
            Err(err) => {
                warn!(error = %err, "ignoring malformed remote lesson order");
                return Ok(());
            }
        };
        if order != self.lessons.order().await? {
            self.lessons.save_order(&order, ChangeOrigin::Remote).await?;
        }
        Ok(())
    }

    async fn upload_lessons(&self, lessons: &[Lesson]) -> Result<(), SyncError> {
        for lesson in lessons {
            let value = serde_json::to_value(lesson).map_err(StorageError::from)?;
            self.remote
                .write(&self.config.lesson_path(lesson.id.as_str()), value)
                .await?;
        }
        self.push_order().await
    }

    async fn push_order(&self) -> Result<(), SyncError> {
        let order = self.lessons.order().await?;
        let value = serde_json::to_value(&order).map_err(StorageError::from)?;
        self.remote
            .write(&self.config.lesson_order_path(), value)
            .await?;
        Ok(())
    }

    async fn push_lesson_event(&self, event: LessonEvent) -> Result<(), SyncError> {
        match event {
            LessonEvent::Saved { id, .. } => {
                if let Some(lesson) = self.lessons.get(&id).await? {
                    let value = serde_json::to_value(&lesson).map_err(StorageError::from)?;
                    self.remote
                        .write(&self.config.lesson_path(id.as_str()), value)
                        .await?;
                }
                self.push_order().await
            }
            LessonEvent::Deleted { id, .. } => {
                self.remote
                    .delete(&self.config.lesson_path(id.as_str()))
                    .await?;
                self.push_order().await
            }
            LessonEvent::Replaced { .. } => {
                let local = self.lessons.all().await?;
                let keep: HashSet<&str> = local.iter().map(|l| l.id.as_str()).collect();
                if let Some(Value::Object(remote)) =
                    self.remote.read(&self.config.lessons_path()).await?
                {
                    for id in remote.keys().filter(|id| !keep.contains(id.as_str())) {
                        self.remote.delete(&self.config.lesson_path(id)).await?;
                    }
                }
                self.upload_lessons(&local).await
            }
        }
    }

    // ─── live handlers ───

    async fn on_remote_progress(&self, value: Option<Value>) -> Result<(), SyncError> {
        let Some(_busy) = BusyGuard::acquire(&self.busy) else {
            debug!("remote progress change coalesced with running sync");
            return Ok(());
        };
        let reset = self.remote.read(&self.config.reset_path()).await?;
        if !self.push_pending_reset(reset.as_ref()).await? {
            self.apply_remote_progress(value.as_ref(), None).await?;
        }
        self.status.synced(self.clock.now());
        Ok(())
    }

    async fn on_remote_reset(&self, value: Option<Value>) -> Result<(), SyncError> {
        let Some(_busy) = BusyGuard::acquire(&self.busy) else {
            return Ok(());
        };
        self.apply_remote_reset(value.as_ref()).await?;
        Ok(())
    }

    async fn on_remote_lessons(&self, value: Option<Value>) -> Result<(), SyncError> {
        let Some(_busy) = BusyGuard::acquire(&self.busy) else {
            return Ok(());
        };
        // live deletions must not be undone by re-uploading local copies
        self.apply_remote_lessons(value.as_ref(), false).await
    }

    async fn on_remote_order(&self, value: Option<Value>) -> Result<(), SyncError> {
        let Some(_busy) = BusyGuard::acquire(&self.busy) else {
            return Ok(());
        };
        self.apply_remote_order(value.as_ref()).await
    }

    async fn on_local_progress(&self, event: Option<ProgressEvent>) -> Result<(), SyncError> {
        let Some(_busy) = BusyGuard::acquire(&self.busy) else {
            debug!("local change coalesced with running sync");
            return Ok(());
        };
        self.status.syncing();
        match event {
            Some(ProgressEvent::Reset { at, .. }) => self.push_reset(at).await?,
            _ => {
                let reset = self.remote.read(&self.config.reset_path()).await?;
                if !self.push_pending_reset(reset.as_ref()).await? {
                    self.push_progress().await?;
                }
            }
        }
        self.status.synced(self.clock.now());
        Ok(())
    }

    async fn on_local_lessons(&self, event: LessonEvent) -> Result<(), SyncError> {
        let Some(_busy) = BusyGuard::acquire(&self.busy) else {
            return Ok(());
        };
        self.push_lesson_event(event).await
    }
}

//
// ─── LIVE LOOP ─────────────────────────────────────────────────────────────────
//

struct Subscriptions {
    progress: Subscription,
    reset: Subscription,
    lessons: Subscription,
    order: Subscription,
}

impl Subscriptions {
    async fn attach(shared: &Shared) -> Result<Self, SyncError> {
        Ok(Self {
            progress: shared.remote.subscribe(&shared.config.progress_path()).await?,
            reset: shared.remote.subscribe(&shared.config.reset_path()).await?,
            lessons: shared.remote.subscribe(&shared.config.lessons_path()).await?,
            order: shared
                .remote
                .subscribe(&shared.config.lesson_order_path())
                .await?,
        })
    }
}

async fn run_live(
    shared: Arc<Shared>,
    mut subs: Subscriptions,
    mut progress_rx: broadcast::Receiver<ProgressEvent>,
    mut lesson_rx: broadcast::Receiver<LessonEvent>,
) {
    loop {
        // resets first, so a cleared snapshot is never answered with a push
        let result = tokio::select! {
            biased;
            change = subs.reset.next() => match change {
                Some(value) => shared.on_remote_reset(value).await,
                None => break,
            },
            change = subs.progress.next() => match change {
                Some(value) => shared.on_remote_progress(value).await,
                None => break,
            },
            change = subs.order.next() => match change {
                Some(value) => shared.on_remote_order(value).await,
                None => break,
            },
            change = subs.lessons.next() => match change {
                Some(value) => shared.on_remote_lessons(value).await,
                None => break,
            },
            event = progress_rx.recv() => match event {
                Ok(event) if event.origin() == ChangeOrigin::Local => {
                    shared.on_local_progress(Some(event)).await
                }
                Ok(_) => Ok(()),
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "progress events lagged, pushing full snapshot");
                    shared.on_local_progress(None).await
                }
                Err(RecvError::Closed) => break,
            },
            event = lesson_rx.recv() => match event {
                Ok(event) if event.origin() == ChangeOrigin::Local => {
                    shared.on_local_lessons(event).await
                }
                Ok(_) => Ok(()),
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "lesson events lagged, uploading all lessons");
                    shared
                        .on_local_lessons(LessonEvent::Replaced { origin: ChangeOrigin::Local })
                        .await
                }
                Err(RecvError::Closed) => break,
            },
        };
        if let Err(err) = result {
            warn!(error = %err, "live sync step failed, keeping local state");
            shared.status.failed(&err);
        }
    }
    debug!("live sync stopped");
}
