use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::{Mutex, Notify};

use services::sync::{FilePayload, FileSync, SharedProgress};
use services::{Clock, SyncConfig, SyncError, SyncOutcome, SyncStatus, TrainerService};
use storage::lessons::LessonStore;
use storage::progress::ProgressStore;
use storage::remote::{FileHandle, FileStore, InMemoryFileStore, RemoteError};
use storage::repository::{InMemoryKeyValueStore, Storage};
use vocab_core::model::{Direction, Lesson, LessonId, ProgressMap, ProgressRecord, VocabularyItem};
use vocab_core::time::fixed_now;

fn config() -> SyncConfig {
    SyncConfig::new("user-1")
}

async fn device(remote: &InMemoryFileStore, now: DateTime<Utc>) -> TrainerService {
    TrainerService::load(&Storage::in_memory(), config(), Clock::fixed(now))
        .await
        .unwrap()
        .with_file_store(Arc::new(remote.clone()))
}

fn record(answered_at: DateTime<Utc>) -> ProgressRecord {
    let mut record = ProgressRecord::fresh();
    record.record_answer(true, answered_at);
    record
}

fn remote_file(
    last_modified: DateTime<Utc>,
    lessons: Option<Vec<Lesson>>,
    progress: ProgressMap,
) -> Value {
    FilePayload {
        version: "1.0".into(),
        last_modified: Some(last_modified),
        lessons,
        progress,
        last_reset: None,
    }
    .to_value()
    .unwrap()
}

fn uploaded(remote: &InMemoryFileStore) -> FilePayload {
    FilePayload::parse(&remote.contents(&config().file_name).unwrap())
}

#[tokio::test]
async fn missing_file_is_created_from_local_state() {
    let remote = InMemoryFileStore::new();
    let trainer = device(&remote, fixed_now()).await;
    let item = VocabularyItem::new("pan", "Brot");
    trainer
        .record_answer(&item, Direction::FrontToBack, true)
        .await
        .unwrap();
    let lesson = trainer.add_lesson("Essen", "pan ## Brot").await.unwrap();

    let report = trainer.reconcile_on_startup().await.unwrap();
    assert_eq!(report.file.unwrap().unwrap(), SyncOutcome::Created);
    assert!(report.push.is_none());

    let raw = remote.contents(&config().file_name).unwrap();
    assert_eq!(raw["version"], "1.0");
    assert!(raw.get("lastModified").is_some());
    let file = FilePayload::parse(&raw);
    assert_eq!(file.last_modified, Some(fixed_now()));
    assert_eq!(file.lessons, Some(vec![lesson]));
    assert!(file.progress.contains_key(&item.key(Direction::FrontToBack)));
    assert_eq!(
        trainer.file_status().unwrap().current(),
        SyncStatus::Synced { at: fixed_now() }
    );
}

#[tokio::test]
async fn newer_file_replaces_progress_and_lessons() {
    let remote = InMemoryFileStore::new();
    let t1 = fixed_now();
    let t2 = t1 + Duration::hours(2);
    let shared_lesson = Lesson::from_text(LessonId::new("shared"), "Tiere", "gato ## Katze").unwrap();
    let mut progress = ProgressMap::new();
    progress.insert(
        VocabularyItem::new("gato", "Katze").key(Direction::BackToFront),
        record(t1),
    );
    remote.put(
        &config().file_name,
        remote_file(t2, Some(vec![shared_lesson.clone()]), progress.clone()),
    );

    let trainer = device(&remote, t1).await;
    trainer
        .record_answer(&VocabularyItem::new("perro", "Hund"), Direction::FrontToBack, false)
        .await
        .unwrap();
    trainer.add_lesson("Alt", "perro ## Hund").await.unwrap();

    assert_eq!(
        trainer.reconcile_now().await.unwrap().file.unwrap().unwrap(),
        SyncOutcome::AdoptedRemote
    );
    let shared = trainer.progress();
    let local = shared.lock().await;
    assert_eq!(local.records(), &progress);
    assert_eq!(local.last_local_update(), Some(t2));
    drop(local);
    assert_eq!(trainer.all_lessons().await.unwrap(), vec![shared_lesson]);
    assert_eq!(remote.uploads(), 0);
}

#[tokio::test]
async fn fresh_device_adopts_file_despite_newer_starter() {
    let remote = InMemoryFileStore::new();
    let t0 = fixed_now();
    let lesson = Lesson::from_text(LessonId::new("l1"), "Zahlen", "uno ## eins").unwrap();
    remote.put(&config().file_name, remote_file(t0, Some(vec![lesson.clone()]), ProgressMap::new()));

    let trainer = device(&remote, t0 + Duration::days(30)).await;
    assert!(trainer.ensure_starter_lesson().await.unwrap());

    assert_eq!(
        trainer.reconcile_now().await.unwrap().file.unwrap().unwrap(),
        SyncOutcome::AdoptedRemote
    );
    assert_eq!(trainer.all_lessons().await.unwrap(), vec![lesson]);
}

#[tokio::test]
async fn newer_local_progress_is_uploaded() {
    let remote = InMemoryFileStore::new();
    let t0 = fixed_now();
    let t1 = t0 + Duration::hours(1);
    remote.put(&config().file_name, remote_file(t0, Some(Vec::new()), ProgressMap::new()));

    let trainer = device(&remote, t1).await;
    let item = VocabularyItem::new("cielo", "Himmel");
    trainer
        .record_answer(&item, Direction::FrontToBack, true)
        .await
        .unwrap();

    assert_eq!(
        trainer.reconcile_now().await.unwrap().file.unwrap().unwrap(),
        SyncOutcome::PushedLocal
    );
    let file = uploaded(&remote);
    assert_eq!(file.last_modified, Some(t1));
    assert!(file.progress.contains_key(&item.key(Direction::FrontToBack)));

    // a second run sees matching stamps
    assert_eq!(
        trainer.reconcile_now().await.unwrap().file.unwrap().unwrap(),
        SyncOutcome::InSync
    );
    assert_eq!(remote.uploads(), 1);
}

#[tokio::test]
async fn reset_in_file_clears_local_progress() {
    let remote = InMemoryFileStore::new();
    let t0 = fixed_now();
    let mut file = FilePayload::parse(&remote_file(t0, None, ProgressMap::new()));
    file.last_reset = Some(t0);
    remote.put(&config().file_name, file.to_value().unwrap());

    let trainer = device(&remote, t0 + Duration::hours(1)).await;
    trainer
        .record_answer(&VocabularyItem::new("mar", "Meer"), Direction::FrontToBack, true)
        .await
        .unwrap();

    assert_eq!(
        trainer.reconcile_now().await.unwrap().file.unwrap().unwrap(),
        SyncOutcome::ResetApplied
    );
    let progress = trainer.progress();
    let progress = progress.lock().await;
    assert!(progress.is_empty());
    assert_eq!(progress.last_reset(), Some(t0));
}

#[tokio::test]
async fn both_sides_changed_since_last_sync_are_merged() {
    let remote = InMemoryFileStore::new();
    let kv = Arc::new(InMemoryKeyValueStore::new());
    let t1 = fixed_now();
    let progress: SharedProgress = Arc::new(Mutex::new(ProgressStore::load(kv.clone()).await.unwrap()));
    let sync = FileSync::new(
        Arc::new(remote.clone()),
        config(),
        Arc::clone(&progress),
        LessonStore::new(kv.clone()),
        kv,
        Clock::fixed(t1),
    );

    let x = VocabularyItem::new("x", "X").key(Direction::FrontToBack);
    let y = VocabularyItem::new("y", "Y").key(Direction::FrontToBack);
    let z = VocabularyItem::new("z", "Z").key(Direction::FrontToBack);

    progress.lock().await.record_answer(x.clone(), true, t1).await.unwrap();
    assert_eq!(sync.reconcile_now().await.unwrap(), SyncOutcome::Created);

    // this device answers Y while another one uploads Z
    let t2 = t1 + Duration::minutes(10);
    let t3 = t1 + Duration::minutes(20);
    progress.lock().await.record_answer(y.clone(), false, t2).await.unwrap();
    let mut other = uploaded(&remote).progress;
    other.insert(z.clone(), record(t3));
    remote.put(&config().file_name, remote_file(t3, None, other));

    assert_eq!(sync.reconcile_now().await.unwrap(), SyncOutcome::Merged);
    let merged = progress.lock().await.records().clone();
    assert!(merged.contains_key(&x) && merged.contains_key(&y) && merged.contains_key(&z));

    let file = uploaded(&remote);
    assert_eq!(file.progress, merged);
    assert!(file.last_modified >= Some(t3));
}

/// File store whose lookup blocks until released.
struct GatedFileStore {
    inner: InMemoryFileStore,
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl FileStore for GatedFileStore {
    async fn find_or_create(&self, name: &str) -> Result<FileHandle, RemoteError> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.find_or_create(name).await
    }

    async fn download(&self, file: &FileHandle) -> Result<Option<Value>, RemoteError> {
        self.inner.download(file).await
    }

    async fn upload(&self, file: &FileHandle, value: &Value) -> Result<(), RemoteError> {
        self.inner.upload(file, value).await
    }
}

#[tokio::test]
async fn overlapping_triggers_are_coalesced() {
    let inner = InMemoryFileStore::new();
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let gated = GatedFileStore {
        inner: inner.clone(),
        entered: Arc::clone(&entered),
        release: Arc::clone(&release),
    };
    let trainer = TrainerService::load(&Storage::in_memory(), config(), Clock::fixed(fixed_now()))
        .await
        .unwrap()
        .with_file_store(Arc::new(gated));
    let trainer = Arc::new(trainer);

    let first = tokio::spawn({
        let trainer = Arc::clone(&trainer);
        async move { trainer.reconcile_now().await }
    });
    entered.notified().await;

    let second = trainer.reconcile_now().await.unwrap();
    assert_eq!(second.file.unwrap().unwrap(), SyncOutcome::Skipped);
    assert!(trainer.final_push().is_none());

    release.notify_one();
    let first = first.await.unwrap().unwrap();
    assert_eq!(first.file.unwrap().unwrap(), SyncOutcome::Created);
    assert_eq!(inner.uploads(), 1);
}

#[tokio::test(start_paused = true)]
async fn periodic_sync_runs_every_interval() {
    let remote = InMemoryFileStore::new();
    let trainer = device(&remote, fixed_now()).await;
    let task = trainer.spawn_auto_sync().unwrap();

    tokio::time::sleep(StdDuration::from_secs(10)).await;
    assert_eq!(remote.uploads(), 0);

    tokio::time::sleep(StdDuration::from_secs(291)).await;
    assert_eq!(remote.uploads(), 1);
    assert!(matches!(
        trainer.file_status().unwrap().current(),
        SyncStatus::Synced { .. }
    ));
    task.abort();
}

#[tokio::test]
async fn final_push_uploads_only_unsynced_changes() {
    let remote = InMemoryFileStore::new();
    let t = fixed_now();
    let trainer = device(&remote, t).await;
    assert!(trainer.final_push().is_none());

    trainer.reconcile_now().await.unwrap();
    assert_eq!(remote.uploads(), 1);
    trainer.final_push().unwrap().await.unwrap();
    assert_eq!(remote.uploads(), 1);

    let key = VocabularyItem::new("flor", "Blume").key(Direction::FrontToBack);
    trainer
        .progress()
        .lock()
        .await
        .record_answer(key.clone(), true, t + Duration::minutes(1))
        .await
        .unwrap();
    trainer.final_push().unwrap().await.unwrap();
    assert_eq!(remote.uploads(), 2);
    assert!(uploaded(&remote).progress.contains_key(&key));
}

#[tokio::test]
async fn unavailable_store_leaves_local_progress_alone() {
    let remote = InMemoryFileStore::new();
    remote.set_available(false);
    let trainer = device(&remote, fixed_now()).await;
    let item = VocabularyItem::new("rio", "Fluss");
    trainer
        .record_answer(&item, Direction::FrontToBack, true)
        .await
        .unwrap();

    let report = trainer.reconcile_now().await.unwrap();
    assert!(matches!(
        report.file,
        Some(Err(SyncError::Remote(RemoteError::Unavailable(_))))
    ));
    assert!(trainer.file_status().unwrap().current().is_error());
    assert!(!trainer.is_due(&item, Direction::FrontToBack).await);
}
