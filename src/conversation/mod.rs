pub mod db;
pub mod engine;
pub mod locks;
pub mod state;
pub mod store;

pub use db::SqliteStateStore;
pub use engine::{BackOutcome, SurveyEngine};
pub use locks::RespondentLocks;
pub use state::{ConversationState, ConversationStatus, NextOutcome, TransitionError};
pub use store::{MemoryStateStore, StateStore};
