use crate::conversation::{ConversationStatus, TransitionError};
use crate::flow::FlowError;
use crate::navigation::NavigationError;
use crate::survey::{QuestionId, RespondentId, SurveyId};
use serde::Serialize;

/// Error family, used to decide how the caller should react.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// The flow graph is malformed; activation must be blocked.
    Structural,
    /// A dangling id in data that should be consistent. Never defaulted.
    Reference,
    /// Expected, user-facing condition ("already at the first question").
    Navigation,
    /// The conversation has ended; restart to continue.
    Lifecycle,
    /// The caller's request does not fit the current conversation.
    Request,
    /// A collaborator store failed.
    Store,
}

/// The distinguishable results reported upward to a transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    NotFound,
    BadRequest,
    Conflict,
    Gone,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("survey {0} not found")]
    SurveyNotFound(SurveyId),
    #[error("no conversation for respondent {0}")]
    RespondentNotFound(RespondentId),
    #[error("question {0} not found")]
    QuestionNotFound(QuestionId),
    #[error("invalid determinant (target {target}): {reason}")]
    InvalidDeterminant { target: i64, reason: String },
    #[error("{0}")]
    CycleDetected(FlowError),
    #[error("{0}")]
    UnreachableQuestions(FlowError),
    #[error("survey {0} has no questions")]
    EmptySurvey(SurveyId),
    #[error("question {question_id}: {reason}")]
    AnswerMismatch {
        question_id: QuestionId,
        reason: String,
    },
    #[error("answer for question {submitted} is stale (current: {current:?})")]
    StaleAnswer {
        submitted: QuestionId,
        current: Option<QuestionId>,
    },
    #[error("survey {0} is not active")]
    SurveyInactive(SurveyId),
    #[error("no previous question to go back to")]
    NoHistory,
    #[error("question {0} is required and cannot be skipped")]
    NotOptional(QuestionId),
    #[error("cannot {action} a conversation that is {from}")]
    InvalidTransition {
        from: ConversationStatus,
        action: &'static str,
    },
    #[error("conversation for respondent {0} has expired")]
    SessionExpired(RespondentId),
    #[error("store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl EngineError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::CycleDetected(_) | Self::UnreachableQuestions(_) | Self::EmptySurvey(_) => {
                ErrorClass::Structural
            }
            Self::QuestionNotFound(_) | Self::InvalidDeterminant { .. } => ErrorClass::Reference,
            Self::NoHistory | Self::NotOptional(_) | Self::InvalidTransition { .. } => {
                ErrorClass::Navigation
            }
            Self::SessionExpired(_) | Self::SurveyInactive(_) => ErrorClass::Lifecycle,
            Self::SurveyNotFound(_)
            | Self::RespondentNotFound(_)
            | Self::AnswerMismatch { .. }
            | Self::StaleAnswer { .. } => ErrorClass::Request,
            Self::Store(_) => ErrorClass::Store,
        }
    }

    pub fn outcome(&self) -> Outcome {
        match self {
            Self::SurveyNotFound(_) | Self::RespondentNotFound(_) | Self::QuestionNotFound(_) => {
                Outcome::NotFound
            }
            Self::AnswerMismatch { .. } => Outcome::BadRequest,
            Self::CycleDetected(_)
            | Self::UnreachableQuestions(_)
            | Self::EmptySurvey(_)
            | Self::StaleAnswer { .. }
            | Self::SurveyInactive(_)
            | Self::NoHistory
            | Self::NotOptional(_)
            | Self::InvalidTransition { .. } => Outcome::Conflict,
            Self::SessionExpired(_) => Outcome::Gone,
            Self::InvalidDeterminant { .. } | Self::Store(_) => Outcome::Internal,
        }
    }

    /// Log reference errors before handing them back.
    pub(crate) fn logged(self) -> Self {
        if self.class() == ErrorClass::Reference {
            tracing::error!(error = %self, "reference error");
        }
        self
    }
}

impl From<FlowError> for EngineError {
    fn from(err: FlowError) -> Self {
        match err {
            FlowError::QuestionNotFound(id) => Self::QuestionNotFound(id),
            FlowError::InvalidDeterminant { target, reason } => {
                Self::InvalidDeterminant { target, reason }
            }
            e @ FlowError::CycleDetected { .. } => Self::CycleDetected(e),
            e @ FlowError::UnreachableQuestions { .. } => Self::UnreachableQuestions(e),
            FlowError::EmptySurvey(id) => Self::EmptySurvey(id),
            FlowError::SurveyNotFound(id) => Self::SurveyNotFound(id),
        }
        .logged()
    }
}

impl From<NavigationError> for EngineError {
    fn from(err: NavigationError) -> Self {
        match err {
            NavigationError::AnswerMismatch {
                question_id,
                reason,
            } => Self::AnswerMismatch {
                question_id,
                reason,
            },
            NavigationError::MissingDeterminant(question_id) => Self::InvalidDeterminant {
                target: question_id,
                reason: "no determinant applies to this answer".into(),
            },
        }
        .logged()
    }
}

impl From<TransitionError> for EngineError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::NoHistory => Self::NoHistory,
            TransitionError::InvalidTransition { from, action } => {
                Self::InvalidTransition { from, action }
            }
            TransitionError::NotOptional(id) => Self::NotOptional(id),
            TransitionError::QuestionMismatch { expected, found } => Self::StaleAnswer {
                submitted: found,
                current: expected,
            },
            TransitionError::MissingDeterminant(id) => Self::InvalidDeterminant {
                target: id,
                reason: "optional question has no default determinant".into(),
            },
        }
        .logged()
    }
}
