use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::model::progress::ProgressKey;

//
// ─── DIRECTION ─────────────────────────────────────────────────────────────────
//

/// Which side of a vocabulary pair is shown as the prompt.
///
/// Progress is tracked independently per direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    /// Show `front`, expect `back`.
    FrontToBack,
    /// Show `back`, expect `front`.
    BackToFront,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::FrontToBack, Direction::BackToFront];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::FrontToBack => "frontToBack",
            Direction::BackToFront => "backToFront",
        }
    }

    #[must_use]
    pub fn reversed(self) -> Self {
        match self {
            Direction::FrontToBack => Direction::BackToFront,
            Direction::BackToFront => Direction::FrontToBack,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for parsing a direction from its persisted name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseDirectionError {
    raw: String,
}

impl fmt::Display for ParseDirectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown direction: {}", self.raw)
    }
}

impl std::error::Error for ParseDirectionError {}

impl FromStr for Direction {
    type Err = ParseDirectionError;

    // Older stores name the directions after the language pair.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "frontToBack" | "spanishToGerman" => Ok(Direction::FrontToBack),
            "backToFront" | "germanToSpanish" => Ok(Direction::BackToFront),
            _ => Err(ParseDirectionError { raw: s.to_owned() }),
        }
    }
}

//
// ─── VOCABULARY ITEM ───────────────────────────────────────────────────────────
//

/// A term pair, e.g. a source-language word and its translation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VocabularyItem {
    #[serde(alias = "spanish")]
    pub front: String,
    #[serde(alias = "german")]
    pub back: String,
}

impl VocabularyItem {
    #[must_use]
    pub fn new(front: impl Into<String>, back: impl Into<String>) -> Self {
        Self {
            front: front.into(),
            back: back.into(),
        }
    }

    /// Text shown to the learner for the given direction.
    #[must_use]
    pub fn prompt(&self, direction: Direction) -> &str {
        match direction {
            Direction::FrontToBack => &self.front,
            Direction::BackToFront => &self.back,
        }
    }

    /// Text expected as the answer for the given direction.
    #[must_use]
    pub fn answer(&self, direction: Direction) -> &str {
        self.prompt(direction.reversed())
    }

    /// Progress identity of this item quizzed in `direction`.
    #[must_use]
    pub fn key(&self, direction: Direction) -> ProgressKey {
        ProgressKey::new(&self.front, &self.back, direction)
    }
}
