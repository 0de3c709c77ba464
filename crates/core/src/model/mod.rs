mod ids;
pub mod item;
pub mod lesson;
pub mod progress;

pub use ids::LessonId;
pub use item::{Direction, ParseDirectionError, VocabularyItem};
pub use lesson::{Lesson, LessonError, parse_vocabulary, selected_items, vocabulary_to_text};
pub use progress::{KeyParts, ProgressKey, ProgressKeyError, ProgressMap, ProgressRecord};
