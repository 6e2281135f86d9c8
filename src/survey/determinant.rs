use super::types::QuestionId;
use crate::flow::FlowError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What happens after a question (or one of its options) is answered.
///
/// Values are only built through [`NextDeterminant::to_question`] and
/// [`NextDeterminant::end`], so a `GoToQuestion` never carries a
/// non-positive id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "DeterminantToml", into = "DeterminantToml")]
pub enum NextDeterminant {
    GoToQuestion(QuestionId),
    EndSurvey,
}

impl NextDeterminant {
    /// Go to question `id`. Fails for `id <= 0`.
    pub fn to_question(id: QuestionId) -> Result<Self, FlowError> {
        if id <= 0 {
            return Err(FlowError::InvalidDeterminant {
                target: id,
                reason: "question id must be positive".into(),
            });
        }
        Ok(Self::GoToQuestion(id))
    }

    pub fn end() -> Self {
        Self::EndSurvey
    }

    /// The target question, if this is not a sink.
    pub fn target(&self) -> Option<QuestionId> {
        match self {
            Self::GoToQuestion(id) => Some(*id),
            Self::EndSurvey => None,
        }
    }

    pub fn is_end(&self) -> bool {
        matches!(self, Self::EndSurvey)
    }
}

impl fmt::Display for NextDeterminant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GoToQuestion(id) => write!(f, "-> Q{id}"),
            Self::EndSurvey => write!(f, "-> end"),
        }
    }
}

// ── TOML form ───────────────────────────────────────────────────

/// `next = 3` or `next = "end"` in survey files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeterminantToml {
    Question(i64),
    Keyword(String),
}

impl TryFrom<DeterminantToml> for NextDeterminant {
    type Error = FlowError;

    fn try_from(value: DeterminantToml) -> Result<Self, Self::Error> {
        match value {
            DeterminantToml::Question(id) => Self::to_question(id),
            DeterminantToml::Keyword(word) if word.eq_ignore_ascii_case("end") => Ok(Self::end()),
            DeterminantToml::Keyword(word) => Err(FlowError::InvalidDeterminant {
                target: 0,
                reason: format!("unknown keyword '{word}' (expected a question id or \"end\")"),
            }),
        }
    }
}

impl From<NextDeterminant> for DeterminantToml {
    fn from(value: NextDeterminant) -> Self {
        match value {
            NextDeterminant::GoToQuestion(id) => Self::Question(id),
            NextDeterminant::EndSurvey => Self::Keyword("end".into()),
        }
    }
}
