//! Survey flow graph validation and respondent navigation.
//!
//! Survey definitions are loaded from TOML into immutable [`Survey`]
//! snapshots. [`FlowValidator`] gates activation (no cycles, every question
//! can reach the end), and [`SurveyEngine`] moves respondents through an
//! active survey one answer at a time.

pub mod config;
pub mod conversation;
pub mod error;
pub mod flow;
pub mod navigation;
pub mod survey;

pub use config::Config;
pub use conversation::{
    BackOutcome, ConversationState, ConversationStatus, MemoryStateStore, NextOutcome,
    SqliteStateStore, StateStore, SurveyEngine,
};
pub use error::{EngineError, ErrorClass, Outcome};
pub use flow::{FlowError, FlowValidator, FlowVerdict};
pub use navigation::{AnswerSubmission, SubmittedAnswer};
pub use survey::{NextDeterminant, Question, QuestionKind, Survey, SurveyCatalog, SurveyStore};
