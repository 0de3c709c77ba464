mod args;

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use services::{
    Clock, DirectionMode, SelectionMode, SyncConfig, SyncError, SyncOutcome, SyncReport,
    TrainerError, TrainerService,
};
use storage::remote::DirectoryFileStore;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use vocab_core::model::{Direction, LessonId, VocabularyItem};

use args::{ArgsError, Cli, Command, Settings, print_usage};

async fn open_trainer(settings: &Settings) -> Result<TrainerService, Box<dyn std::error::Error>> {
    // Open + migrate SQLite in the binary glue.
    prepare_sqlite_file(&settings.db_url)?;
    let config = SyncConfig::new(settings.user_id.clone());
    let mut trainer =
        TrainerService::new_sqlite(&settings.db_url, config, Clock::default_clock()).await?;
    if let Some(dir) = &settings.sync_dir {
        trainer = trainer.with_file_store(Arc::new(DirectoryFileStore::new(dir)));
    }
    if trainer.ensure_starter_lesson().await? {
        info!("seeded starter lesson");
    }
    Ok(trainer)
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse(std::env::args().skip(1), |key| std::env::var(key).ok()).map_err(
        |e| {
            eprintln!("{e}");
            print_usage();
            e
        },
    )?;
    if cli.command == Command::Help {
        print_usage();
        return Ok(());
    }

    let trainer = open_trainer(&cli.settings).await?;
    let mutates = matches!(
        cli.command,
        Command::Import { .. }
            | Command::Study { .. }
            | Command::Reset
            | Command::SkipDay
            | Command::Restore { .. }
    );
    if mutates && cli.settings.sync_dir.is_some() {
        report_sync(&trainer.reconcile_on_startup().await?);
    }

    match cli.command {
        Command::Help => {}
        Command::Stats => stats(&trainer).await?,
        Command::Lessons => {
            for lesson in trainer.all_lessons().await? {
                println!(
                    "{}  {}  ({} words)",
                    lesson.id,
                    lesson.name,
                    lesson.vocabularies.len()
                );
            }
        }
        Command::Import { path, name } => {
            let content = tokio::fs::read_to_string(&path).await?;
            let name = name.unwrap_or_else(|| lesson_name(&path));
            let lesson = trainer.add_lesson(&name, &content).await?;
            println!(
                "imported {} words into {} ({})",
                lesson.vocabularies.len(),
                lesson.name,
                lesson.id
            );
        }
        Command::Study {
            selection,
            mode,
            lessons,
        } => study(&trainer, selection, mode, lessons).await?,
        Command::Forecast { days, mode } => {
            let days = days.unwrap_or(trainer.config().forecast_days);
            let items = all_items(&trainer).await?;
            let forecast = trainer.forecast(&items, mode.gate(), days).await;
            println!("due now: {}", trainer.due_count(&items, mode.gate()).await);
            for (offset, count) in forecast.iter().enumerate() {
                println!("in {} day(s): {count}", offset + 1);
            }
        }
        Command::Sync => {
            let report = trainer.reconcile_now().await.map_err(|err| match err {
                TrainerError::Sync(SyncError::NotConfigured(_)) => {
                    Box::<dyn std::error::Error>::from("sync needs --sync-dir or VOCAB_SYNC_DIR")
                }
                other => other.into(),
            })?;
            report_sync(&report);
            if report.has_errors() {
                return Err("sync failed, local progress kept".into());
            }
        }
        Command::Reset => {
            trainer.reset_progress().await?;
            println!("progress cleared");
        }
        Command::SkipDay => {
            let shifted = trainer.skip_one_day().await?;
            println!("moved {shifted} review(s) one day forward");
        }
        Command::Export { path } => {
            let snapshot = trainer.export_progress().await?;
            let text = serde_json::to_string_pretty(&snapshot)?;
            match path {
                Some(path) => tokio::fs::write(&path, text).await?,
                None => println!("{text}"),
            }
        }
        Command::Restore { path } => {
            let raw = tokio::fs::read_to_string(&path).await?;
            let value: Value = serde_json::from_str(&raw)?;
            let total = trainer.import_progress(&value).await?;
            println!("progress now tracks {total} item(s)");
        }
    }

    if mutates {
        if let Some(task) = trainer.final_push() {
            // the process exits right after, so wait for the upload here
            if let Err(err) = task.await {
                warn!(error = %err, "final push task failed");
            }
        }
    }
    Ok(())
}

fn report_sync(report: &SyncReport) {
    if let Some(result) = &report.file {
        match result {
            Ok(SyncOutcome::Skipped) => println!("sync: already running"),
            Ok(outcome) => println!("sync: {outcome:?}"),
            Err(err) => eprintln!("sync failed: {err}"),
        }
    }
}

fn lesson_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "Imported".into())
}

async fn all_items(
    trainer: &TrainerService,
) -> Result<Vec<VocabularyItem>, Box<dyn std::error::Error>> {
    let ids: HashSet<LessonId> = trainer
        .all_lessons()
        .await?
        .into_iter()
        .map(|lesson| lesson.id)
        .collect();
    Ok(trainer.selected_items(&ids).await?)
}

async fn stats(trainer: &TrainerService) -> Result<(), Box<dyn std::error::Error>> {
    let items = all_items(trainer).await?;
    let stats = trainer.stats().await;
    println!("tracked: {}", stats.tracked);
    println!("learned: {}", stats.learned);
    println!("total reviews: {}", stats.total_reviews);
    for direction in Direction::ALL {
        println!(
            "{direction}: {} of {} due",
            trainer.due_count(&items, direction).await,
            items.len()
        );
        let histogram = trainer.phase_histogram(&items, direction).await;
        let phases: Vec<String> = histogram
            .iter()
            .map(|(phase, count)| format!("{phase}:{count}"))
            .collect();
        println!("  phases {}", phases.join(" "));
    }
    Ok(())
}

/// Case and surrounding whitespace do not matter.
fn is_correct(given: &str, expected: &str) -> bool {
    given.trim().to_lowercase() == expected.trim().to_lowercase()
}

async fn study(
    trainer: &TrainerService,
    selection: SelectionMode,
    mode: DirectionMode,
    lessons: Vec<LessonId>,
) -> Result<(), Box<dyn std::error::Error>> {
    let items = if lessons.is_empty() {
        all_items(trainer).await?
    } else {
        trainer
            .selected_items(&lessons.into_iter().collect())
            .await?
    };
    let summary = trainer.build_session_pool(items, selection, mode).await?;
    if summary.total == 0 {
        println!("nothing due, try --random");
        return Ok(());
    }
    println!("{} item(s), empty line to stop", summary.total);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut correct = 0usize;
    while let Some(drawn) = trainer.draw_next() {
        println!("{}", drawn.item.prompt(drawn.direction));
        let Some(given) = lines.next_line().await? else {
            break;
        };
        if given.trim().is_empty() {
            break;
        }
        let expected = drawn.item.answer(drawn.direction);
        let right = is_correct(&given, expected);
        trainer
            .record_answer(&drawn.item, drawn.direction, right)
            .await?;
        if right {
            correct += 1;
            println!("  correct");
        } else {
            println!("  wrong, expected: {expected}");
        }
    }

    if let Some(progress) = trainer.session_progress() {
        println!(
            "{correct} of {} correct, {} left",
            progress.answered, progress.remaining
        );
    }
    Ok(())
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answers_ignore_case_and_padding() {
        assert!(is_correct("  Der Hund ", "der hund"));
        assert!(!is_correct("die Katze", "der hund"));
    }

    #[test]
    fn lesson_name_defaults_to_file_stem() {
        assert_eq!(lesson_name(Path::new("/tmp/week-1.txt")), "week-1");
    }

    #[test]
    fn sqlite_file_is_created_with_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/vocab.sqlite3");
        prepare_sqlite_file(&format!("sqlite://{}", path.display())).unwrap();
        assert!(path.exists());
        assert!(prepare_sqlite_file("postgres://nope").is_err());
        assert!(prepare_sqlite_file("sqlite::memory:").is_ok());
    }
}
