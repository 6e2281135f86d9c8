use super::determinant::NextDeterminant;
use super::types::*;
use std::collections::HashSet;

/// Schema errors that prevent a survey definition from loading.
///
/// These are distinct from flow errors: a survey can load with a cycle or a
/// dead question, it just cannot be activated.
#[derive(Debug, Clone, thiserror::Error)]
#[error("survey {survey_id}: {message}")]
pub struct SurveyValidationError {
    pub survey_id: SurveyId,
    pub message: String,
}

/// Build a `Survey` from a parsed TOML definition, collecting every schema
/// problem rather than stopping at the first.
pub fn build_survey(toml: &SurveyDefinitionToml) -> Result<Survey, Vec<SurveyValidationError>> {
    let mut errors = Vec::new();
    let survey_id = toml.survey.id;
    let mut push = |message: String| {
        errors.push(SurveyValidationError { survey_id, message });
    };

    if survey_id <= 0 {
        push(format!("survey id must be positive (found {survey_id})"));
    }

    let mut seen_ids = HashSet::new();
    let mut seen_positions = HashSet::new();
    for q in &toml.questions {
        if q.id <= 0 {
            push(format!("question id must be positive (found {})", q.id));
        }
        if !seen_ids.insert(q.id) {
            push(format!("duplicate question id {}", q.id));
        }
        if !seen_positions.insert(q.position) {
            push(format!("duplicate question position {}", q.position));
        }
    }

    if let Some(start) = toml.survey.start {
        if !seen_ids.contains(&start) {
            push(format!("start question {start} does not exist"));
        }
    }

    let check_target = |next: &Option<NextDeterminant>| -> Option<QuestionId> {
        next.and_then(|d| d.target()).filter(|t| !seen_ids.contains(t))
    };

    for q in &toml.questions {
        if let Some(missing) = check_target(&q.next) {
            push(format!(
                "question {}: determinant targets question {missing} outside this survey",
                q.id
            ));
        }
        for (i, opt) in q.options.iter().enumerate() {
            if let Some(missing) = check_target(&opt.next) {
                push(format!(
                    "question {} option {i}: determinant targets question {missing} outside this survey",
                    q.id
                ));
            }
        }

        if q.kind.requires_options() && q.options.is_empty() {
            push(format!(
                "question {}: {} question requires at least one option",
                q.id,
                q.kind.as_str()
            ));
        }
        if q.kind.selection_mode() == SelectionMode::FreeForm && !q.options.is_empty() {
            tracing::warn!(
                "survey {}, question {}: options on a {} question are ignored",
                survey_id,
                q.id,
                q.kind.as_str()
            );
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    let questions = toml
        .questions
        .iter()
        .map(|q| Question {
            id: q.id,
            position: q.position,
            kind: q.kind,
            text: q.text.clone(),
            required: q.required,
            default_next: q.next,
            options: q
                .options
                .iter()
                .map(|o| QuestionOption {
                    text: o.text.clone(),
                    next: o.next,
                })
                .collect(),
        })
        .collect();

    Ok(Survey::assemble(
        survey_id,
        toml.survey.title.clone(),
        toml.survey.description.clone(),
        toml.survey.start,
        toml.survey.active,
        questions,
    ))
}
