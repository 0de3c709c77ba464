use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

use crate::model::ids::LessonId;
use crate::model::item::VocabularyItem;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum LessonError {
    #[error("lesson name cannot be empty")]
    EmptyName,

    #[error("no valid vocabulary found, expected lines like `front ## back`")]
    NoVocabulary,
}

//
// ─── LINE FORMAT ───────────────────────────────────────────────────────────────
//

const PAIR_SEPARATOR: &str = "##";

/// Parse `front ## back` lines into vocabulary items.
///
/// Blank lines and lines without exactly one separator are skipped.
#[must_use]
pub fn parse_vocabulary(content: &str) -> Vec<VocabularyItem> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let mut parts = line.split(PAIR_SEPARATOR);
            let front = parts.next()?;
            let back = parts.next()?;
            if parts.next().is_some() {
                return None;
            }
            Some(VocabularyItem::new(front.trim(), back.trim()))
        })
        .collect()
}

/// Inverse of [`parse_vocabulary`].
#[must_use]
pub fn vocabulary_to_text(items: &[VocabularyItem]) -> String {
    items
        .iter()
        .map(|item| format!("{} {PAIR_SEPARATOR} {}", item.front, item.back))
        .collect::<Vec<_>>()
        .join("\n")
}

//
// ─── LESSON ────────────────────────────────────────────────────────────────────
//

/// Named list of vocabulary items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lesson {
    pub id: LessonId,
    pub name: String,
    pub vocabularies: Vec<VocabularyItem>,
}

impl Lesson {
    /// Build a lesson from a name and `front ## back` text.
    ///
    /// # Errors
    ///
    /// Returns `LessonError::EmptyName` for a blank name and
    /// `LessonError::NoVocabulary` when no line parses.
    pub fn from_text(id: LessonId, name: &str, content: &str) -> Result<Self, LessonError> {
        Self::new(id, name, parse_vocabulary(content))
    }

    /// # Errors
    ///
    /// Returns `LessonError` when the name is blank or `vocabularies` is empty.
    pub fn new(
        id: LessonId,
        name: &str,
        vocabularies: Vec<VocabularyItem>,
    ) -> Result<Self, LessonError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(LessonError::EmptyName);
        }
        if vocabularies.is_empty() {
            return Err(LessonError::NoVocabulary);
        }
        Ok(Self {
            id,
            name: name.to_owned(),
            vocabularies,
        })
    }

    /// Starter lesson created on a device that has no content yet.
    #[must_use]
    pub fn starter(id: LessonId) -> Self {
        Self {
            id,
            name: STARTER_NAME.to_owned(),
            vocabularies: starter_vocabulary(),
        }
    }

    /// True if this lesson is exactly the starter content.
    #[must_use]
    pub fn is_starter(&self) -> bool {
        self.name == STARTER_NAME && self.vocabularies == starter_vocabulary()
    }
}

const STARTER_NAME: &str = "Para Empezar";

fn starter_vocabulary() -> Vec<VocabularyItem> {
    vec![
        VocabularyItem::new("hola", "Hallo"),
        VocabularyItem::new("buenos días", "Guten Morgen"),
        VocabularyItem::new("gracias", "danke"),
        VocabularyItem::new("por favor", "bitte"),
    ]
}

/// Items of the selected lessons, in lesson order.
#[must_use]
pub fn selected_items(lessons: &[Lesson], selected: &HashSet<LessonId>) -> Vec<VocabularyItem> {
    lessons
        .iter()
        .filter(|lesson| selected.contains(&lesson.id))
        .flat_map(|lesson| lesson.vocabularies.iter().cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_skips_malformed_lines() {
        let content = "hola ## Hallo\n\n  gracias##danke  \nno separator\na ## b ## c\n";
        let items = parse_vocabulary(content);
        assert_eq!(
            items,
            vec![
                VocabularyItem::new("hola", "Hallo"),
                VocabularyItem::new("gracias", "danke"),
            ]
        );
    }

    #[test]
    fn text_round_trip_preserves_items() {
        let items = vec![
            VocabularyItem::new("el perro", "der Hund"),
            VocabularyItem::new("la casa", "das Haus"),
        ];
        let text = vocabulary_to_text(&items);
        assert_eq!(text, "el perro ## der Hund\nla casa ## das Haus");
        assert_eq!(parse_vocabulary(&text), items);
    }

    #[test]
    fn lesson_requires_name_and_vocabulary() {
        assert_eq!(
            Lesson::from_text(LessonId::new("1"), "  ", "a ## b").unwrap_err(),
            LessonError::EmptyName
        );
        assert_eq!(
            Lesson::from_text(LessonId::new("1"), "Empty", "nothing here").unwrap_err(),
            LessonError::NoVocabulary
        );
        let lesson = Lesson::from_text(LessonId::new("1"), " Basics ", "a ## b").unwrap();
        assert_eq!(lesson.name, "Basics");
    }

    #[test]
    fn starter_lesson_is_recognized() {
        let starter = Lesson::starter(LessonId::new("seed"));
        assert!(starter.is_starter());

        let mut edited = starter.clone();
        edited.vocabularies.pop();
        assert!(!edited.is_starter());
    }

    #[test]
    fn selected_items_follow_selection() {
        let a = Lesson::from_text(LessonId::new("a"), "A", "uno ## eins").unwrap();
        let b = Lesson::from_text(LessonId::new("b"), "B", "dos ## zwei\ntres ## drei").unwrap();
        let selected: HashSet<_> = [LessonId::new("b")].into_iter().collect();

        let items = selected_items(&[a, b], &selected);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].front, "dos");
    }
}
