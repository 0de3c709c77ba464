use std::sync::Arc;

use storage::lessons::LessonStore;
use storage::progress::{ChangeOrigin, PROGRESS_KEY, ProgressStore};
use storage::repository::{KeyValueStore, Storage};
use storage::sqlite::SqliteRepository;
use vocab_core::model::{Direction, Lesson, LessonId, VocabularyItem};
use vocab_core::time::fixed_now;

async fn connect(name: &str) -> SqliteRepository {
    let url = format!("sqlite:file:{name}?mode=memory&cache=shared");
    let repo = SqliteRepository::connect(&url).await.expect("connect");
    repo.migrate().await.expect("migrate");
    repo
}

#[tokio::test]
async fn sqlite_kv_round_trip_and_upsert() {
    let repo = connect("memdb_kv_round_trip").await;

    assert_eq!(repo.get_item("missing").await.unwrap(), None);
    repo.set_item("k", "one").await.unwrap();
    repo.set_item("k", "two").await.unwrap();
    assert_eq!(repo.get_item("k").await.unwrap().as_deref(), Some("two"));

    repo.remove_item("k").await.unwrap();
    repo.remove_item("k").await.unwrap();
    assert_eq!(repo.get_item("k").await.unwrap(), None);
}

#[tokio::test]
async fn migrations_are_idempotent() {
    let repo = connect("memdb_migrate_twice").await;
    repo.set_item("k", "v").await.unwrap();
    repo.migrate().await.expect("second migrate");
    assert_eq!(repo.get_item("k").await.unwrap().as_deref(), Some("v"));
}

#[tokio::test]
async fn progress_survives_reload_through_sqlite() {
    let repo = connect("memdb_progress_reload").await;
    let kv: Arc<dyn KeyValueStore> = Arc::new(repo);
    let key = VocabularyItem::new("hola", "Hallo").key(Direction::BackToFront);

    let mut progress = ProgressStore::load(kv.clone()).await.unwrap();
    progress.record_answer(key.clone(), true, fixed_now()).await.unwrap();
    progress.record_answer(key.clone(), true, fixed_now()).await.unwrap();

    let reloaded = ProgressStore::load(kv.clone()).await.unwrap();
    assert_eq!(reloaded.get(&key).correct_count, 2);
    assert_eq!(reloaded.last_local_update(), Some(fixed_now()));

    kv.set_item(PROGRESS_KEY, "[[[").await.unwrap();
    let recovered = ProgressStore::load(kv.clone()).await.unwrap();
    assert!(recovered.is_empty());
    assert_eq!(kv.get_item(PROGRESS_KEY).await.unwrap(), None);
}

#[tokio::test]
async fn lessons_through_storage_handle() {
    let storage = Storage::sqlite("sqlite:file:memdb_lessons?mode=memory&cache=shared")
        .await
        .expect("storage");
    let lessons = LessonStore::new(storage.kv.clone());

    let lesson = Lesson::from_text(LessonId::new("l1"), "Colores", "rojo ## rot\nazul ## blau")
        .unwrap();
    lessons.save(&lesson, ChangeOrigin::Local).await.unwrap();

    let all = lessons.all().await.unwrap();
    assert_eq!(all, vec![lesson]);
}

#[tokio::test]
async fn two_handles_on_one_file_share_items() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("vocab.sqlite3").display());
    let first = SqliteRepository::connect(&url).await.expect("connect first");
    first.migrate().await.expect("migrate");
    let second = SqliteRepository::connect(&url).await.expect("connect second");
    second.migrate().await.expect("migrate again");

    first.set_item("lastLocalUpdate", "\"2024-01-01T00:00:00Z\"").await.unwrap();
    second.set_item("lessonOrder", "[\"l1\"]").await.unwrap();

    assert_eq!(
        second.get_item("lastLocalUpdate").await.unwrap().as_deref(),
        Some("\"2024-01-01T00:00:00Z\"")
    );
    assert_eq!(
        first.get_item("lessonOrder").await.unwrap().as_deref(),
        Some("[\"l1\"]")
    );
}
