use super::answer::SubmittedAnswer;
use crate::survey::{NextDeterminant, Question, QuestionId, QuestionKind, SelectionMode};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NavigationError {
    /// The answer cannot be matched to this question or any of its options.
    #[error("question {question_id}: {reason}")]
    AnswerMismatch {
        question_id: QuestionId,
        reason: String,
    },
    /// The determinant that applies was never set.
    #[error("question {0} has no determinant for this answer")]
    MissingDeterminant(QuestionId),
}

fn mismatch(question: &Question, reason: impl Into<String>) -> NavigationError {
    NavigationError::AnswerMismatch {
        question_id: question.id,
        reason: reason.into(),
    }
}

/// Stateless answer-to-edge resolution.
pub struct NavigationResolver;

impl NavigationResolver {
    pub fn resolve(
        question: &Question,
        answer: &SubmittedAnswer,
    ) -> Result<NextDeterminant, NavigationError> {
        resolve(question, answer)
    }
}

/// Pick the next-question determinant for an answer.
///
/// - Free-form kinds always take the question default.
/// - Single choice and rating take the chosen option's override, else the default.
/// - Multiple choice: the first selected option **in display order** that
///   carries its own determinant wins; with no overrides among the selection
///   the default applies. Selection order and duplicates do not matter.
///
/// Pure: the same `(question, answer)` always yields the same result.
pub fn resolve(
    question: &Question,
    answer: &SubmittedAnswer,
) -> Result<NextDeterminant, NavigationError> {
    let chosen = match question.kind.selection_mode() {
        SelectionMode::FreeForm => {
            check_free_form(question, answer)?;
            None
        }
        SelectionMode::Single => selected_option(question, answer)?,
        SelectionMode::Multiple => winning_option(question, answer)?,
    };

    chosen
        .and_then(|index| question.options[index].next)
        .or(question.default_next)
        .ok_or(NavigationError::MissingDeterminant(question.id))
}

fn check_free_form(question: &Question, answer: &SubmittedAnswer) -> Result<(), NavigationError> {
    let ok = matches!(
        (question.kind, answer),
        (QuestionKind::Text, SubmittedAnswer::Text(_))
            | (QuestionKind::Number, SubmittedAnswer::Number(_))
            | (QuestionKind::Date, SubmittedAnswer::Date(_))
            | (QuestionKind::Location, SubmittedAnswer::Location { .. })
    );
    if ok {
        Ok(())
    } else {
        Err(mismatch(
            question,
            format!(
                "{} answer given to a {} question",
                answer.kind_name(),
                question.kind.as_str()
            ),
        ))
    }
}

/// Option index for single-selection kinds. `None` means "no option applies"
/// (a rating question without a declared scale).
fn selected_option(
    question: &Question,
    answer: &SubmittedAnswer,
) -> Result<Option<usize>, NavigationError> {
    match (question.kind, answer) {
        (QuestionKind::SingleChoice, SubmittedAnswer::Choice(index)) => {
            if *index < question.options.len() {
                Ok(Some(*index))
            } else {
                Err(mismatch(
                    question,
                    format!(
                        "option {index} out of range ({} options)",
                        question.options.len()
                    ),
                ))
            }
        }
        (QuestionKind::Rating, SubmittedAnswer::Rating(value)) => {
            let value = usize::from(*value);
            if value == 0 {
                return Err(mismatch(question, "rating must be at least 1"));
            }
            if question.options.is_empty() {
                return Ok(None);
            }
            if value <= question.options.len() {
                Ok(Some(value - 1))
            } else {
                Err(mismatch(
                    question,
                    format!(
                        "rating {value} outside scale 1..={}",
                        question.options.len()
                    ),
                ))
            }
        }
        _ => Err(mismatch(
            question,
            format!(
                "{} answer given to a {} question",
                answer.kind_name(),
                question.kind.as_str()
            ),
        )),
    }
}

fn winning_option(
    question: &Question,
    answer: &SubmittedAnswer,
) -> Result<Option<usize>, NavigationError> {
    let SubmittedAnswer::Choices(selected) = answer else {
        return Err(mismatch(
            question,
            format!(
                "{} answer given to a multiple_choice question",
                answer.kind_name()
            ),
        ));
    };
    if selected.is_empty() {
        return Err(mismatch(question, "no options selected"));
    }
    if let Some(bad) = selected.iter().find(|&&i| i >= question.options.len()) {
        return Err(mismatch(
            question,
            format!(
                "option {bad} out of range ({} options)",
                question.options.len()
            ),
        ));
    }

    let mut in_display_order = selected.clone();
    in_display_order.sort_unstable();
    in_display_order.dedup();

    Ok(in_display_order
        .into_iter()
        .find(|&i| question.options[i].next.is_some()))
}
