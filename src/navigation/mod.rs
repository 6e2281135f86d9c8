pub mod answer;
pub mod resolve;

pub use answer::{AnswerSubmission, SubmittedAnswer};
pub use resolve::{resolve, NavigationError, NavigationResolver};
