use std::fmt;
use std::path::PathBuf;

use services::{DirectionMode, SelectionMode};
use vocab_core::model::LessonId;

pub const DB_URL_ENV: &str = "VOCAB_DB_URL";
pub const SYNC_DIR_ENV: &str = "VOCAB_SYNC_DIR";
pub const USER_ID_ENV: &str = "VOCAB_USER_ID";

const DEFAULT_DB_URL: &str = "sqlite://vocab.sqlite3";
const DEFAULT_USER_ID: &str = "local";

#[derive(Debug, PartialEq, Eq)]
pub enum ArgsError {
    MissingValue { flag: &'static str },
    MissingArgument { what: &'static str },
    UnknownArg(String),
    UnknownCommand(String),
    InvalidDbUrl { raw: String },
    InvalidDays { raw: String },
    InvalidMode { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingArgument { what } => write!(f, "missing {what}"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::UnknownCommand(cmd) => write!(f, "unknown subcommand: {cmd}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidDays { raw } => write!(f, "invalid --days value: {raw}"),
            ArgsError::InvalidMode { raw } => {
                write!(f, "invalid --mode value (expected front, back or mixed): {raw}")
            }
        }
    }
}

impl std::error::Error for ArgsError {}

/// Where local and remote state live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub db_url: String,
    pub sync_dir: Option<PathBuf>,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Stats,
    Lessons,
    Import {
        path: PathBuf,
        name: Option<String>,
    },
    Study {
        selection: SelectionMode,
        mode: DirectionMode,
        lessons: Vec<LessonId>,
    },
    Forecast {
        days: Option<u32>,
        mode: DirectionMode,
    },
    Sync,
    Reset,
    SkipDay,
    Export {
        path: Option<PathBuf>,
    },
    Restore {
        path: PathBuf,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cli {
    pub settings: Settings,
    pub command: Command,
}

pub fn print_usage() {
    eprintln!("Usage: vocab [--db <sqlite_url>] [--sync-dir <dir>] [--user <id>] <command>");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  stats                                  progress summary");
    eprintln!("  lessons                                list lessons");
    eprintln!("  import <file> [--name <name>]          add a lesson from `front ## back` lines");
    eprintln!("  study [--random] [--mode <m>] [--lesson <id>]...");
    eprintln!("  forecast [--days <n>] [--mode <m>]     reviews coming due per day");
    eprintln!("  sync                                   reconcile with the sync directory");
    eprintln!("  reset                                  clear all progress");
    eprintln!("  skip-day                               bring every review one day forward");
    eprintln!("  export [<file>]                        write progress as JSON");
    eprintln!("  restore <file>                         merge an exported progress file");
    eprintln!();
    eprintln!("Modes: front, back, mixed");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  {DB_URL_ENV} (default {DEFAULT_DB_URL}), {SYNC_DIR_ENV}, {USER_ID_ENV} (default {DEFAULT_USER_ID})");
    eprintln!("  RUST_LOG (default info)");
}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn parse_mode(raw: String) -> Result<DirectionMode, ArgsError> {
    match raw.as_str() {
        "front" => Ok(DirectionMode::FrontToBack),
        "back" => Ok(DirectionMode::BackToFront),
        "mixed" => Ok(DirectionMode::Mixed),
        _ => Err(ArgsError::InvalidMode { raw }),
    }
}

impl Cli {
    /// Parse `args` (without the program name), reading defaults through `env`.
    pub fn parse(
        args: impl IntoIterator<Item = String>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ArgsError> {
        let mut settings = Settings {
            db_url: env(DB_URL_ENV).map_or_else(|| DEFAULT_DB_URL.into(), normalize_sqlite_url),
            sync_dir: env(SYNC_DIR_ENV)
                .filter(|dir| !dir.trim().is_empty())
                .map(PathBuf::from),
            user_id: env(USER_ID_ENV).unwrap_or_else(|| DEFAULT_USER_ID.into()),
        };

        // global flags come first, the subcommand keeps the rest
        let mut args = args.into_iter();
        let name = loop {
            let Some(arg) = args.next() else {
                break None;
            };
            match arg.as_str() {
                "--db" => {
                    let value = require_value(&mut args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    settings.db_url = normalize_sqlite_url(value);
                }
                "--sync-dir" => {
                    settings.sync_dir = Some(require_value(&mut args, "--sync-dir")?.into());
                }
                "--user" => settings.user_id = require_value(&mut args, "--user")?,
                "--help" | "-h" => break Some("help".to_owned()),
                _ if arg.starts_with("--") => return Err(ArgsError::UnknownArg(arg)),
                _ => break Some(arg),
            }
        };

        let command = match name.as_deref() {
            None | Some("help") => Command::Help,
            Some("stats") => Self::no_args(args, Command::Stats)?,
            Some("lessons") => Self::no_args(args, Command::Lessons)?,
            Some("sync") => Self::no_args(args, Command::Sync)?,
            Some("reset") => Self::no_args(args, Command::Reset)?,
            Some("skip-day") => Self::no_args(args, Command::SkipDay)?,
            Some("import") => Self::parse_import(args)?,
            Some("study") => Self::parse_study(args)?,
            Some("forecast") => Self::parse_forecast(args)?,
            Some("export") => Command::Export {
                path: Self::optional_path(args)?,
            },
            Some("restore") => Command::Restore {
                path: Self::optional_path(args)?.ok_or(ArgsError::MissingArgument {
                    what: "file to restore",
                })?,
            },
            Some(other) => return Err(ArgsError::UnknownCommand(other.to_owned())),
        };
        Ok(Self { settings, command })
    }

    fn no_args(
        mut args: impl Iterator<Item = String>,
        command: Command,
    ) -> Result<Command, ArgsError> {
        match args.next() {
            Some(arg) => Err(ArgsError::UnknownArg(arg)),
            None => Ok(command),
        }
    }

    fn optional_path(mut args: impl Iterator<Item = String>) -> Result<Option<PathBuf>, ArgsError> {
        let path = args.next().map(PathBuf::from);
        Self::no_args(args, Command::Help)?;
        Ok(path)
    }

    fn parse_import(mut args: impl Iterator<Item = String>) -> Result<Command, ArgsError> {
        let mut path = None;
        let mut name = None;
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--name" => name = Some(require_value(&mut args, "--name")?),
                _ if arg.starts_with("--") || path.is_some() => {
                    return Err(ArgsError::UnknownArg(arg));
                }
                _ => path = Some(PathBuf::from(arg)),
            }
        }
        let path = path.ok_or(ArgsError::MissingArgument {
            what: "lesson file to import",
        })?;
        Ok(Command::Import { path, name })
    }

    fn parse_study(mut args: impl Iterator<Item = String>) -> Result<Command, ArgsError> {
        let mut selection = SelectionMode::Spaced;
        let mut mode = DirectionMode::FrontToBack;
        let mut lessons = Vec::new();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--random" => selection = SelectionMode::Random,
                "--mode" => mode = parse_mode(require_value(&mut args, "--mode")?)?,
                "--lesson" => lessons.push(LessonId::new(require_value(&mut args, "--lesson")?)),
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }
        Ok(Command::Study {
            selection,
            mode,
            lessons,
        })
    }

    fn parse_forecast(mut args: impl Iterator<Item = String>) -> Result<Command, ArgsError> {
        let mut days = None;
        let mut mode = DirectionMode::FrontToBack;
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--days" => {
                    let value = require_value(&mut args, "--days")?;
                    let parsed = value
                        .parse::<u32>()
                        .ok()
                        .filter(|days| *days > 0)
                        .ok_or(ArgsError::InvalidDays { raw: value })?;
                    days = Some(parsed);
                }
                "--mode" => mode = parse_mode(require_value(&mut args, "--mode")?)?,
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }
        Ok(Command::Forecast { days, mode })
    }
}

pub fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = std::path::Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}
