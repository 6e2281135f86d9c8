use crate::survey::{NextDeterminant, Question, QuestionId, RespondentId, SurveyId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Idle,
    Active,
    Completed,
    Expired,
    Cancelled,
}

impl ConversationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Expired | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(Self::Idle),
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            "expired" => Some(Self::Expired),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Expected, recoverable navigation outcomes plus illegal-transition guards.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("no previous question to go back to")]
    NoHistory,
    #[error("cannot {action} a conversation that is {from}")]
    InvalidTransition {
        from: ConversationStatus,
        action: &'static str,
    },
    #[error("question {0} is required and cannot be skipped")]
    NotOptional(QuestionId),
    #[error("question {found} is not the current question ({expected:?})")]
    QuestionMismatch {
        expected: Option<QuestionId>,
        found: QuestionId,
    },
    #[error("question {0} has no default determinant")]
    MissingDeterminant(QuestionId),
}

/// Where a forward move landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "question_id", rename_all = "snake_case")]
pub enum NextOutcome {
    Question(QuestionId),
    Completed,
}

/// Per-respondent position within one survey.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationState {
    pub respondent_id: RespondentId,
    pub survey_id: SurveyId,
    pub current_question: Option<QuestionId>,
    /// Previously visited questions, most recent last.
    pub history: Vec<QuestionId>,
    pub status: ConversationStatus,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl ConversationState {
    pub fn new(respondent_id: RespondentId, survey_id: SurveyId, now: DateTime<Utc>) -> Self {
        Self {
            respondent_id,
            survey_id,
            current_question: None,
            history: Vec::new(),
            status: ConversationStatus::Idle,
            started_at: now,
            last_activity: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn require(
        &self,
        expected: ConversationStatus,
        action: &'static str,
    ) -> Result<(), TransitionError> {
        if self.status == expected {
            Ok(())
        } else {
            Err(TransitionError::InvalidTransition {
                from: self.status,
                action,
            })
        }
    }

    /// Idle -> Active at the survey's start question.
    pub fn start(
        &mut self,
        start_question: QuestionId,
        now: DateTime<Utc>,
    ) -> Result<QuestionId, TransitionError> {
        self.require(ConversationStatus::Idle, "start")?;
        self.status = ConversationStatus::Active;
        self.current_question = Some(start_question);
        self.history.clear();
        self.started_at = now;
        self.last_activity = now;
        Ok(start_question)
    }

    /// Apply a resolved determinant to the current question.
    pub fn advance(
        &mut self,
        determinant: NextDeterminant,
        now: DateTime<Utc>,
    ) -> Result<NextOutcome, TransitionError> {
        self.require(ConversationStatus::Active, "advance")?;
        self.last_activity = now;
        match determinant {
            NextDeterminant::GoToQuestion(next) => {
                if let Some(current) = self.current_question.replace(next) {
                    self.history.push(current);
                }
                Ok(NextOutcome::Question(next))
            }
            NextDeterminant::EndSurvey => {
                self.status = ConversationStatus::Completed;
                Ok(NextOutcome::Completed)
            }
        }
    }

    /// Return to the previously visited question.
    pub fn back(&mut self, now: DateTime<Utc>) -> Result<QuestionId, TransitionError> {
        self.require(ConversationStatus::Active, "go back in")?;
        let previous = self.history.pop().ok_or(TransitionError::NoHistory)?;
        self.current_question = Some(previous);
        self.last_activity = now;
        Ok(previous)
    }

    /// Advance past an optional question using its default determinant.
    pub fn skip(
        &mut self,
        question: &Question,
        now: DateTime<Utc>,
    ) -> Result<NextOutcome, TransitionError> {
        self.require(ConversationStatus::Active, "skip in")?;
        if self.current_question != Some(question.id) {
            return Err(TransitionError::QuestionMismatch {
                expected: self.current_question,
                found: question.id,
            });
        }
        if !question.is_optional() {
            return Err(TransitionError::NotOptional(question.id));
        }
        let next = question
            .default_next
            .ok_or(TransitionError::MissingDeterminant(question.id))?;
        self.advance(next, now)
    }

    /// True when an active conversation has been idle longer than `window`.
    pub fn is_expired(&self, window: Duration, now: DateTime<Utc>) -> bool {
        if self.status != ConversationStatus::Active {
            return false;
        }
        now.signed_duration_since(self.last_activity)
            .to_std()
            .map(|idle| idle > window)
            .unwrap_or(false)
    }

    /// Active -> Expired if the inactivity window has passed. Returns whether
    /// the conversation expired; Idle is left alone.
    pub fn timeout(&mut self, window: Duration, now: DateTime<Utc>) -> Result<bool, TransitionError> {
        if self.is_terminal() {
            return Err(TransitionError::InvalidTransition {
                from: self.status,
                action: "time out",
            });
        }
        if self.is_expired(window, now) {
            self.status = ConversationStatus::Expired;
            return Ok(true);
        }
        Ok(false)
    }

    /// Idle/Active -> Cancelled, discarding history. Cancelling twice is a no-op.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        match self.status {
            ConversationStatus::Cancelled => Ok(()),
            ConversationStatus::Idle | ConversationStatus::Active => {
                self.status = ConversationStatus::Cancelled;
                self.history.clear();
                self.last_activity = now;
                Ok(())
            }
            from => Err(TransitionError::InvalidTransition {
                from,
                action: "cancel",
            }),
        }
    }
}
