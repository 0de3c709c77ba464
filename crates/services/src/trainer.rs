use chrono::Duration;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use storage::lessons::LessonStore;
use storage::progress::{ChangeOrigin, ProgressStore, normalize_map};
use storage::remote::{FileStore, PushStore};
use storage::repository::{KeyValueStore, Storage};
use vocab_core::Clock;
use vocab_core::merge::merge_progress;
use vocab_core::model::{
    Direction, Lesson, LessonId, ProgressRecord, VocabularyItem, selected_items,
};
use vocab_core::scheduler::{PhaseHistogram, ProgressStats, Scheduler};

use crate::config::{FILE_FORMAT_VERSION, SyncConfig};
use crate::error::{SyncError, TrainerError};
use crate::sessions::{DirectionMode, Drawn, SelectionMode, SessionPool, SessionProgress};
use crate::sync::{FileSync, PushSync, SharedProgress, StatusHandle, SyncOutcome};

/// Per-target results of one reconciliation trigger. `None` means the
/// target is not configured.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub push: Option<Result<SyncOutcome, SyncError>>,
    pub file: Option<Result<SyncOutcome, SyncError>>,
}

impl SyncReport {
    #[must_use]
    pub fn has_errors(&self) -> bool {
        [&self.push, &self.file]
            .into_iter()
            .flatten()
            .any(Result::is_err)
    }
}

/// Entry point for collaborators: answers, scheduling queries, session
/// pools, lessons and reconciliation.
pub struct TrainerService {
    clock: Clock,
    config: SyncConfig,
    kv: Arc<dyn KeyValueStore>,
    progress: SharedProgress,
    lessons: LessonStore,
    pool: StdMutex<Option<SessionPool>>,
    push: Option<PushSync>,
    file: Option<FileSync>,
}

impl TrainerService {
    /// Load local progress from `storage`.
    ///
    /// # Errors
    ///
    /// Returns `TrainerError::Storage` if the local backend cannot be read.
    pub async fn load(
        storage: &Storage,
        config: SyncConfig,
        clock: Clock,
    ) -> Result<Self, TrainerError> {
        let kv = Arc::clone(&storage.kv);
        let progress = ProgressStore::load(Arc::clone(&kv)).await?;
        debug!(records = progress.records().len(), "trainer loaded");
        Ok(Self {
            clock,
            config,
            lessons: LessonStore::new(Arc::clone(&kv)).with_clock(clock),
            kv,
            progress: Arc::new(Mutex::new(progress)),
            pool: StdMutex::new(None),
            push: None,
            file: None,
        })
    }

    /// Build a trainer backed by `SQLite` storage.
    ///
    /// # Errors
    ///
    /// Returns `TrainerError` if storage initialization fails.
    pub async fn new_sqlite(
        db_url: &str,
        config: SyncConfig,
        clock: Clock,
    ) -> Result<Self, TrainerError> {
        let storage = Storage::sqlite(db_url).await?;
        Self::load(&storage, config, clock).await
    }

    #[must_use]
    pub fn with_push_store(mut self, remote: Arc<dyn PushStore>) -> Self {
        self.push = Some(PushSync::new(
            remote,
            self.config.clone(),
            Arc::clone(&self.progress),
            self.lessons.clone(),
            Arc::clone(&self.kv),
            self.clock,
        ));
        self
    }

    #[must_use]
    pub fn with_file_store(mut self, remote: Arc<dyn FileStore>) -> Self {
        self.file = Some(FileSync::new(
            remote,
            self.config.clone(),
            Arc::clone(&self.progress),
            self.lessons.clone(),
            Arc::clone(&self.kv),
            self.clock,
        ));
        self
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    #[must_use]
    pub fn progress(&self) -> SharedProgress {
        Arc::clone(&self.progress)
    }

    #[must_use]
    pub fn lessons(&self) -> &LessonStore {
        &self.lessons
    }

    #[must_use]
    pub fn push_status(&self) -> Option<StatusHandle> {
        self.push.as_ref().map(PushSync::status)
    }

    #[must_use]
    pub fn file_status(&self) -> Option<StatusHandle> {
        self.file.as_ref().map(FileSync::status)
    }

    //
    // ─── ANSWERS AND QUERIES ───────────────────────────────────────────────────
    //

    /// Record one answer and persist it locally before returning.
    ///
    /// Remote stores are updated in the background.
    ///
    /// # Errors
    ///
    /// Returns `TrainerError::Storage` (e.g. quota exceeded) if the answer
    /// could not be made durable.
    pub async fn record_answer(
        &self,
        item: &VocabularyItem,
        direction: Direction,
        correct: bool,
    ) -> Result<ProgressRecord, TrainerError> {
        let now = self.clock.now();
        let record = self
            .progress
            .lock()
            .await
            .record_answer(item.key(direction), correct, now)
            .await?;
        Ok(record)
    }

    pub async fn is_due(&self, item: &VocabularyItem, direction: Direction) -> bool {
        let progress = self.progress.lock().await;
        Scheduler::new(progress.records()).is_due(item, direction, self.clock.now())
    }

    pub async fn due_count(&self, items: &[VocabularyItem], direction: Direction) -> usize {
        let progress = self.progress.lock().await;
        Scheduler::new(progress.records()).due_count(items, direction, self.clock.now())
    }

    /// Items coming due on each of the next `horizon_days` days, tomorrow first.
    pub async fn forecast(
        &self,
        items: &[VocabularyItem],
        direction: Direction,
        horizon_days: u32,
    ) -> Vec<usize> {
        let progress = self.progress.lock().await;
        Scheduler::new(progress.records()).forecast(
            items,
            direction,
            self.clock.now(),
            horizon_days,
        )
    }

    pub async fn phase_histogram(
        &self,
        items: &[VocabularyItem],
        direction: Direction,
    ) -> PhaseHistogram {
        let progress = self.progress.lock().await;
        Scheduler::new(progress.records()).phase_histogram(items, direction)
    }

    pub async fn stats(&self) -> ProgressStats {
        let progress = self.progress.lock().await;
        Scheduler::new(progress.records()).stats()
    }

    //
    // ─── SESSION POOL ──────────────────────────────────────────────────────────
    //

    /// Replace the current session pool.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NoItemsSelected` when `items` is empty.
    pub async fn build_session_pool(
        &self,
        items: Vec<VocabularyItem>,
        selection: SelectionMode,
        mode: DirectionMode,
    ) -> Result<SessionProgress, TrainerError> {
        let pool = {
            let progress = self.progress.lock().await;
            SessionPool::build(items, selection, mode, progress.records(), self.clock.now())?
        };
        let summary = pool.progress();
        if let Ok(mut slot) = self.pool.lock() {
            *slot = Some(pool);
        }
        Ok(summary)
    }

    /// Next item of the current pool; `None` once exhausted or if no pool
    /// was built.
    #[must_use]
    pub fn draw_next(&self) -> Option<Drawn> {
        self.pool.lock().ok()?.as_mut()?.draw()
    }

    #[must_use]
    pub fn session_progress(&self) -> Option<SessionProgress> {
        self.pool.lock().ok()?.as_ref().map(SessionPool::progress)
    }

    //
    // ─── BULK PROGRESS CHANGES ─────────────────────────────────────────────────
    //

    /// Clear all progress and propagate the reset to remote stores.
    ///
    /// # Errors
    ///
    /// Returns `TrainerError::Storage` if the reset cannot be persisted.
    pub async fn reset_progress(&self) -> Result<(), TrainerError> {
        let now = self.clock.now();
        self.progress.lock().await.reset_all(now).await?;
        info!(%now, "progress reset");
        Ok(())
    }

    /// Move every scheduled review one day earlier. Returns how many moved.
    ///
    /// # Errors
    ///
    /// Returns `TrainerError::Storage` if the change cannot be persisted.
    pub async fn skip_one_day(&self) -> Result<usize, TrainerError> {
        let now = self.clock.now();
        let shifted = self
            .progress
            .lock()
            .await
            .shift_review_dates(Duration::days(-1), now)
            .await?;
        info!(shifted, "skipped one day");
        Ok(shifted)
    }

    /// Snapshot of all progress as JSON.
    ///
    /// # Errors
    ///
    /// Returns `TrainerError::Storage` if a record cannot be serialized.
    pub async fn export_progress(&self) -> Result<Value, TrainerError> {
        let progress = self.progress.lock().await;
        let records = serde_json::to_value(progress.records())
            .map_err(storage::repository::StorageError::from)?;
        Ok(json!({
            "version": FILE_FORMAT_VERSION,
            "exportedAt": self.clock.now(),
            "progress": records,
        }))
    }

    /// Merge an exported snapshot into local progress, record by record.
    ///
    /// Accepts the output of [`TrainerService::export_progress`] or a bare
    /// progress map. Returns the number of records after merging.
    ///
    /// # Errors
    ///
    /// Returns `TrainerError::MalformedImport` if `value` holds no progress
    /// object, or `TrainerError::Storage` if the merge cannot be persisted.
    pub async fn import_progress(&self, value: &Value) -> Result<usize, TrainerError> {
        let source = value.get("progress").unwrap_or(value);
        let imported = normalize_map(source).ok_or(TrainerError::MalformedImport)?;
        let now = self.clock.now();

        let mut progress = self.progress.lock().await;
        let merged = merge_progress(progress.records(), &imported);
        let count = merged.len();
        progress
            .replace_all(merged, now, ChangeOrigin::Local)
            .await?;
        info!(imported = imported.len(), total = count, "progress imported");
        Ok(count)
    }

    //
    // ─── LESSONS ───────────────────────────────────────────────────────────────
    //

    /// # Errors
    ///
    /// Returns `TrainerError::Storage` if lessons cannot be read.
    pub async fn all_lessons(&self) -> Result<Vec<Lesson>, TrainerError> {
        Ok(self.lessons.all().await?)
    }

    /// Create a lesson from `front ## back` lines.
    ///
    /// # Errors
    ///
    /// Returns `TrainerError::Lesson` for a blank name or no parsable line,
    /// or `TrainerError::Storage` if it cannot be saved.
    pub async fn add_lesson(&self, name: &str, content: &str) -> Result<Lesson, TrainerError> {
        let lesson = Lesson::from_text(LessonId::generate(), name, content)?;
        self.lessons.save(&lesson, ChangeOrigin::Local).await?;
        info!(id = %lesson.id, words = lesson.vocabularies.len(), "lesson added");
        Ok(lesson)
    }

    /// # Errors
    ///
    /// Returns `TrainerError::Storage` if the lesson cannot be removed.
    pub async fn delete_lesson(&self, id: &LessonId) -> Result<(), TrainerError> {
        self.lessons.delete(id, ChangeOrigin::Local).await?;
        Ok(())
    }

    /// Seed the starter lesson on a device without content.
    ///
    /// # Errors
    ///
    /// Returns `TrainerError::Storage` if the starter cannot be saved.
    pub async fn ensure_starter_lesson(&self) -> Result<bool, TrainerError> {
        Ok(self.lessons.ensure_starter().await?)
    }

    /// Items of the chosen lessons, in lesson order.
    ///
    /// # Errors
    ///
    /// Returns `TrainerError::Storage` if lessons cannot be read.
    pub async fn selected_items(
        &self,
        selected: &HashSet<LessonId>,
    ) -> Result<Vec<VocabularyItem>, TrainerError> {
        let lessons = self.lessons.all().await?;
        Ok(selected_items(&lessons, selected))
    }

    //
    // ─── SYNC ──────────────────────────────────────────────────────────────────
    //

    /// Run the one-shot startup reconciliation against every configured
    /// target and attach live listeners to the push-style store.
    ///
    /// Target failures are reported per target and leave local state as is.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::NotConfigured` if no remote store was attached.
    pub async fn reconcile_on_startup(&self) -> Result<SyncReport, TrainerError> {
        self.ensure_sync_configured()?;
        let mut report = SyncReport::default();
        if let Some(push) = &self.push {
            report.push = Some(push.start().await);
        }
        if let Some(file) = &self.file {
            report.file = Some(file.reconcile_now().await);
        }
        Ok(report)
    }

    /// Manual reconciliation of every configured target.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::NotConfigured` if no remote store was attached.
    pub async fn reconcile_now(&self) -> Result<SyncReport, TrainerError> {
        self.ensure_sync_configured()?;
        let mut report = SyncReport::default();
        if let Some(push) = &self.push {
            report.push = Some(push.reconcile_now().await);
        }
        if let Some(file) = &self.file {
            report.file = Some(file.reconcile_now().await);
        }
        Ok(report)
    }

    /// Start the periodic file sync, if a file store is attached.
    #[must_use]
    pub fn spawn_auto_sync(&self) -> Option<JoinHandle<()>> {
        self.file.as_ref().map(FileSync::spawn_periodic)
    }

    /// Fire-and-forget upload to the file store before exiting.
    #[must_use]
    pub fn final_push(&self) -> Option<JoinHandle<()>> {
        self.file.as_ref().and_then(FileSync::final_push)
    }

    /// Detach live listeners from the push-style store.
    pub fn stop_live_sync(&self) {
        if let Some(push) = &self.push {
            push.stop();
        }
    }

    fn ensure_sync_configured(&self) -> Result<(), SyncError> {
        if self.push.is_none() && self.file.is_none() {
            return Err(SyncError::NotConfigured("no remote store attached"));
        }
        Ok(())
    }
}
