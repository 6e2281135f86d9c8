use crate::survey::{QuestionId, RespondentId};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// An answer that has already passed format validation upstream.
///
/// Option indices are zero-based positions in display order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum SubmittedAnswer {
    Text(String),
    Number(f64),
    Date(NaiveDate),
    Location { latitude: f64, longitude: f64 },
    Choice(usize),
    Choices(Vec<usize>),
    Rating(u8),
}

impl SubmittedAnswer {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Number(_) => "number",
            Self::Date(_) => "date",
            Self::Location { .. } => "location",
            Self::Choice(_) => "choice",
            Self::Choices(_) => "choices",
            Self::Rating(_) => "rating",
        }
    }
}

/// One inbound answer event from the submission boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerSubmission {
    pub respondent_id: RespondentId,
    /// The question the respondent was answering. When present it must match
    /// the conversation's current question, which rejects stray duplicates.
    #[serde(default)]
    pub question_id: Option<QuestionId>,
    pub answer: SubmittedAnswer,
}

impl AnswerSubmission {
    pub fn new(respondent_id: RespondentId, answer: SubmittedAnswer) -> Self {
        Self {
            respondent_id,
            question_id: None,
            answer,
        }
    }

    pub fn for_question(mut self, question_id: QuestionId) -> Self {
        self.question_id = Some(question_id);
        self
    }
}
