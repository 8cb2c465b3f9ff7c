//! Domain models for twinkle-eval.
//!
//! Canonical definitions for the core entities:
//! - `Question`: one multiple-choice item and its option labels
//! - `AnswerRecord`: the scored outcome of one question, persisted per line
//! - `FileResult` / `DatasetResult` / `FinalReport`: derived summaries

pub mod error;
pub mod question;
pub mod record;
pub mod report;

pub use error::{ConfigError, Result, TwinkleError};
pub use question::{index_to_label, label_to_index, option_labels, Question, QuestionField};
pub use record::{is_correct, AnswerRecord, TokenUsage};
pub use report::{mean, population_std, DatasetResult, FileResult, FinalReport, IndividualRuns};
