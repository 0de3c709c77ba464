use std::collections::HashSet;

use services::{Clock, DirectionMode, SelectionMode, SyncConfig, TrainerService};
use vocab_core::model::{Direction, LessonId};
use vocab_core::time::fixed_now;

const DB_URL: &str = "sqlite:file:session_smoke?mode=memory&cache=shared";

#[tokio::test]
async fn sitting_over_a_lesson_persists_and_schedules() {
    let now = fixed_now();
    let trainer = TrainerService::new_sqlite(DB_URL, SyncConfig::new("smoke"), Clock::fixed(now))
        .await
        .unwrap();

    let lesson = trainer
        .add_lesson("Smoke", "uno ## eins\ndos ## zwei\ntres ## drei")
        .await
        .unwrap();
    let selected: HashSet<LessonId> = [lesson.id.clone()].into();
    let items = trainer.selected_items(&selected).await.unwrap();
    assert_eq!(items.len(), 3);

    let summary = trainer
        .build_session_pool(items.clone(), SelectionMode::Spaced, DirectionMode::FrontToBack)
        .await
        .unwrap();
    assert_eq!(summary.total, 3);

    while let Some(drawn) = trainer.draw_next() {
        assert_eq!(drawn.direction, Direction::FrontToBack);
        trainer
            .record_answer(&drawn.item, drawn.direction, true)
            .await
            .unwrap();
    }
    assert!(trainer.session_progress().unwrap().is_complete);
    assert_eq!(trainer.due_count(&items, Direction::FrontToBack).await, 0);
    assert_eq!(trainer.due_count(&items, Direction::BackToFront).await, 3);

    let forecast = trainer.forecast(&items, Direction::FrontToBack, 7).await;
    assert_eq!(forecast.len(), 7);
    assert_eq!(forecast.iter().sum::<usize>(), 3);

    // a spaced pool built now has nothing left to review
    let spaced = trainer
        .build_session_pool(items.clone(), SelectionMode::Spaced, DirectionMode::FrontToBack)
        .await
        .unwrap();
    assert_eq!(spaced.total, 0);
    assert!(spaced.is_complete);

    let random = trainer
        .build_session_pool(items, SelectionMode::Random, DirectionMode::FrontToBack)
        .await
        .unwrap();
    assert_eq!(random.total, 3);

    let reopened = TrainerService::new_sqlite(DB_URL, SyncConfig::new("smoke"), Clock::fixed(now))
        .await
        .unwrap();
    assert_eq!(reopened.stats().await.tracked, 3);
    assert_eq!(reopened.all_lessons().await.unwrap(), vec![lesson]);
}
