use super::determinant::NextDeterminant;
use crate::flow::{FlowError, FlowValidator};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type QuestionId = i64;
pub type SurveyId = i64;
pub type RespondentId = i64;

// ── TOML-parsed types ───────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SurveyDefinitionToml {
    pub survey: SurveyMeta,
    #[serde(default)]
    pub questions: Vec<QuestionToml>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SurveyMeta {
    pub id: SurveyId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Explicit start question; defaults to the lowest position.
    #[serde(default)]
    pub start: Option<QuestionId>,
    #[serde(default)]
    pub active: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QuestionToml {
    pub id: QuestionId,
    pub position: i32,
    pub kind: QuestionKind,
    pub text: String,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub next: Option<NextDeterminant>,
    #[serde(default)]
    pub options: Vec<OptionToml>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OptionToml {
    pub text: String,
    #[serde(default)]
    pub next: Option<NextDeterminant>,
}

fn default_required() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    Text,
    Number,
    Date,
    Location,
    SingleChoice,
    Rating,
    MultipleChoice,
}

/// How a question kind selects among its options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMode {
    FreeForm,
    Single,
    Multiple,
}

impl QuestionKind {
    pub fn selection_mode(&self) -> SelectionMode {
        match self {
            Self::Text | Self::Number | Self::Date | Self::Location => SelectionMode::FreeForm,
            Self::SingleChoice | Self::Rating => SelectionMode::Single,
            Self::MultipleChoice => SelectionMode::Multiple,
        }
    }

    /// Kinds that cannot be answered without at least one option.
    pub fn requires_options(&self) -> bool {
        matches!(self, Self::SingleChoice | Self::MultipleChoice)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Number => "number",
            Self::Date => "date",
            Self::Location => "location",
            Self::SingleChoice => "single_choice",
            Self::Rating => "rating",
            Self::MultipleChoice => "multiple_choice",
        }
    }
}

// ── Validated runtime types ─────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct QuestionOption {
    pub text: String,
    /// Overrides the question default when this option is chosen.
    pub next: Option<NextDeterminant>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Question {
    pub id: QuestionId,
    pub position: i32,
    pub kind: QuestionKind,
    pub text: String,
    pub required: bool,
    /// `None` means the author never set one; such a question is dead.
    pub default_next: Option<NextDeterminant>,
    pub options: Vec<QuestionOption>,
}

impl Question {
    pub fn is_optional(&self) -> bool {
        !self.required
    }

    /// The determinant that applies when option `index` is chosen.
    pub fn option_next(&self, index: usize) -> Option<NextDeterminant> {
        self.options
            .get(index)
            .and_then(|opt| opt.next.or(self.default_next))
    }

    /// True if some valid way of leaving this question has no determinant:
    /// no default, and either the question can be skipped, it takes free-form
    /// or unscaled answers, or one of its options has no override.
    pub fn has_unset_route(&self) -> bool {
        if self.default_next.is_some() {
            return false;
        }
        if self.is_optional() {
            return true;
        }
        match self.kind.selection_mode() {
            SelectionMode::FreeForm => true,
            SelectionMode::Single | SelectionMode::Multiple => {
                self.options.is_empty() || self.options.iter().any(|o| o.next.is_none())
            }
        }
    }

    /// Every determinant leaving this question: the default first, then each
    /// option's effective determinant in display order. Unset entries are skipped.
    pub fn outgoing(&self) -> Vec<NextDeterminant> {
        let mut out = Vec::with_capacity(self.options.len() + 1);
        if let Some(default) = self.default_next {
            out.push(default);
        }
        if self.kind.selection_mode() != SelectionMode::FreeForm {
            for i in 0..self.options.len() {
                if let Some(next) = self.option_next(i) {
                    out.push(next);
                }
            }
        }
        out
    }
}

/// An immutable snapshot of a survey's questions, ordered by position.
#[derive(Debug, Clone)]
pub struct Survey {
    pub id: SurveyId,
    pub title: String,
    pub description: Option<String>,
    pub start_question: Option<QuestionId>,
    active: bool,
    questions: Vec<Question>,
    index: HashMap<QuestionId, usize>,
}

impl Survey {
    /// Assemble a survey. Callers are expected to have run
    /// [`super::validate::build_survey`] checks; this only orders and indexes.
    pub(crate) fn assemble(
        id: SurveyId,
        title: String,
        description: Option<String>,
        start_question: Option<QuestionId>,
        active: bool,
        mut questions: Vec<Question>,
    ) -> Self {
        questions.sort_by_key(|q| q.position);
        let index = questions
            .iter()
            .enumerate()
            .map(|(i, q)| (q.id, i))
            .collect();
        let start_question = start_question.or_else(|| questions.first().map(|q| q.id));
        Self {
            id,
            title,
            description,
            start_question,
            active,
            questions,
            index,
        }
    }

    /// Parse and build a survey from TOML text.
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let def: SurveyDefinitionToml = toml::from_str(content)?;
        super::validate::build_survey(&def).map_err(|errors| {
            let msgs: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            anyhow::anyhow!("survey validation errors:\n  {}", msgs.join("\n  "))
        })
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    pub fn question(&self, id: QuestionId) -> Option<&Question> {
        self.index.get(&id).map(|&i| &self.questions[i])
    }

    pub fn contains(&self, id: QuestionId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Activation gate: refuses empty surveys and any flow that fails
    /// validation, reporting the failing check verbatim.
    pub fn activate(&mut self) -> Result<(), FlowError> {
        if self.is_empty() {
            return Err(FlowError::EmptySurvey(self.id));
        }
        if let Err(e) = FlowValidator::validate(self)?.into_result() {
            tracing::warn!(survey_id = self.id, error = %e, "activation refused");
            return Err(e);
        }
        self.active = true;
        tracing::info!(survey_id = self.id, "survey activated");
        Ok(())
    }
}
