use super::locks::RespondentLocks;
use super::state::{ConversationState, ConversationStatus, NextOutcome, TransitionError};
use super::store::StateStore;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::flow::{FlowValidator, FlowVerdict};
use crate::navigation::{resolve, AnswerSubmission};
use crate::survey::{NextDeterminant, QuestionId, RespondentId, Survey, SurveyId, SurveyStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Result of a back navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "question_id", rename_all = "snake_case")]
pub enum BackOutcome {
    Previous(QuestionId),
    NoHistory,
}

/// Drives respondents through surveys.
///
/// Survey snapshots are loaded before a respondent's lock is taken; state is
/// read, transitioned and saved while holding it.
pub struct SurveyEngine {
    surveys: Arc<dyn SurveyStore>,
    states: Arc<dyn StateStore>,
    locks: RespondentLocks,
    inactivity_window: Duration,
}

impl SurveyEngine {
    pub fn new(
        surveys: Arc<dyn SurveyStore>,
        states: Arc<dyn StateStore>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            surveys,
            states,
            locks: RespondentLocks::new(config.lock_prune_threshold),
            inactivity_window: config.inactivity_window(),
        }
    }

    pub fn inactivity_window(&self) -> Duration {
        self.inactivity_window
    }

    async fn load_survey(&self, survey_id: SurveyId) -> Result<Arc<Survey>, EngineError> {
        self.surveys
            .load_survey(survey_id)
            .await?
            .ok_or(EngineError::SurveyNotFound(survey_id))
    }

    async fn read_state(
        &self,
        respondent_id: RespondentId,
    ) -> Result<ConversationState, EngineError> {
        self.states
            .get_state(respondent_id)
            .await?
            .ok_or(EngineError::RespondentNotFound(respondent_id))
    }

    // ── Survey-level operations ──────────────────────────────────

    /// Run the activation checks without changing anything.
    pub async fn validate_flow(&self, survey_id: SurveyId) -> Result<FlowVerdict, EngineError> {
        let survey = self.load_survey(survey_id).await?;
        let verdict = FlowValidator::validate(&survey)?;
        tracing::info!(survey_id, valid = verdict.is_valid(), "flow validated");
        Ok(verdict)
    }

    /// Gate a survey for activation. Returns the activated copy; the caller
    /// decides where to publish it.
    pub async fn activate(&self, survey_id: SurveyId) -> Result<Survey, EngineError> {
        let snapshot = self.load_survey(survey_id).await?;
        let mut survey = (*snapshot).clone();
        survey.activate()?;
        Ok(survey)
    }

    // ── Respondent operations ────────────────────────────────────

    /// Open a conversation at the survey's start question.
    ///
    /// A finished or expired conversation is archived first. An unexpired
    /// active one is left alone and the call is refused.
    pub async fn start(
        &self,
        respondent_id: RespondentId,
        survey_id: SurveyId,
    ) -> Result<QuestionId, EngineError> {
        let survey = self.load_survey(survey_id).await?;
        if !survey.is_active() {
            return Err(EngineError::SurveyInactive(survey_id));
        }
        let start = survey
            .start_question
            .ok_or(EngineError::EmptySurvey(survey_id))?;

        let _guard = self.locks.acquire(respondent_id).await;
        let now = Utc::now();

        if let Some(mut existing) = self.states.get_state(respondent_id).await? {
            if existing.status == ConversationStatus::Active {
                if !existing.timeout(self.inactivity_window, now)? {
                    return Err(TransitionError::InvalidTransition {
                        from: existing.status,
                        action: "start",
                    }
                    .into());
                }
                tracing::info!(
                    respondent_id,
                    survey_id = existing.survey_id,
                    "conversation expired on restart"
                );
                self.states.save_state(&existing).await?;
            }
            self.states.archive_state(respondent_id).await?;
        }

        let mut state = ConversationState::new(respondent_id, survey_id, now);
        let first = state.start(start, now)?;
        self.states.save_state(&state).await?;
        tracing::info!(
            respondent_id,
            survey_id,
            question_id = first,
            "conversation started"
        );
        Ok(first)
    }

    /// Resolve an answer to the current question and move forward.
    pub async fn get_next(&self, submission: AnswerSubmission) -> Result<NextOutcome, EngineError> {
        let respondent_id = submission.respondent_id;
        self.with_survey_state(respondent_id, |state, survey, now| {
            let current = current_question(state, "answer")?;
            if let Some(submitted) = submission.question_id {
                if submitted != current {
                    tracing::debug!(
                        respondent_id,
                        question_id = submitted,
                        current,
                        "stale answer rejected"
                    );
                    return Err(EngineError::StaleAnswer {
                        submitted,
                        current: Some(current),
                    });
                }
            }
            let question = survey
                .question(current)
                .ok_or_else(|| EngineError::QuestionNotFound(current).logged())?;
            let determinant = resolve(question, &submission.answer)?;
            ensure_target(survey, determinant)?;
            let outcome = state.advance(determinant, now)?;
            log_outcome(state, current, outcome);
            Ok(outcome)
        })
        .await
    }

    /// Step back to the previous question.
    pub async fn go_back(&self, respondent_id: RespondentId) -> Result<BackOutcome, EngineError> {
        self.with_state(respondent_id, |state, now| match state.back(now) {
            Ok(previous) => {
                tracing::debug!(respondent_id, question_id = previous, "went back");
                Ok(BackOutcome::Previous(previous))
            }
            Err(TransitionError::NoHistory) => Ok(BackOutcome::NoHistory),
            Err(e) => Err(e.into()),
        })
        .await
    }

    /// Skip the current question if it is optional.
    pub async fn skip(&self, respondent_id: RespondentId) -> Result<NextOutcome, EngineError> {
        self.with_survey_state(respondent_id, |state, survey, now| {
            let current = current_question(state, "skip in")?;
            let question = survey
                .question(current)
                .ok_or_else(|| EngineError::QuestionNotFound(current).logged())?;
            if let Some(next) = question.default_next {
                ensure_target(survey, next)?;
            }
            let outcome = state.skip(question, now)?;
            log_outcome(state, current, outcome);
            Ok(outcome)
        })
        .await
    }

    /// Cancel the conversation. Cancelling an already cancelled one is a no-op.
    pub async fn cancel(
        &self,
        respondent_id: RespondentId,
    ) -> Result<ConversationStatus, EngineError> {
        self.with_state(respondent_id, |state, now| {
            let was = state.status;
            state.cancel(now)?;
            if was != ConversationStatus::Cancelled {
                tracing::info!(respondent_id, survey_id = state.survey_id, "conversation cancelled");
            }
            Ok(state.status)
        })
        .await
    }

    /// Current state, with lazy expiry applied.
    pub async fn state(
        &self,
        respondent_id: RespondentId,
    ) -> Result<Option<ConversationState>, EngineError> {
        let _guard = self.locks.acquire(respondent_id).await;
        let Some(mut state) = self.states.get_state(respondent_id).await? else {
            return Ok(None);
        };
        if self.expire_if_idle(&mut state, Utc::now()).await? {
            tracing::info!(respondent_id, survey_id = state.survey_id, "conversation expired");
        }
        Ok(Some(state))
    }

    // ── Locked sections ──────────────────────────────────────────

    /// Returns true if the conversation was just expired (and saved).
    async fn expire_if_idle(
        &self,
        state: &mut ConversationState,
        now: DateTime<Utc>,
    ) -> Result<bool, EngineError> {
        if !state.is_expired(self.inactivity_window, now) {
            return Ok(false);
        }
        state.timeout(self.inactivity_window, now)?;
        self.states.save_state(state).await?;
        Ok(true)
    }

    /// Apply `f` under the respondent's lock and persist any change.
    async fn with_state<T, F>(&self, respondent_id: RespondentId, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&mut ConversationState, DateTime<Utc>) -> Result<T, EngineError>,
    {
        let _guard = self.locks.acquire(respondent_id).await;
        let state = self.read_state(respondent_id).await?;
        self.apply(state, f).await
    }

    /// Like [`Self::with_state`], with the conversation's survey snapshot
    /// loaded before the lock is taken.
    async fn with_survey_state<T, F>(
        &self,
        respondent_id: RespondentId,
        f: F,
    ) -> Result<T, EngineError>
    where
        F: FnOnce(&mut ConversationState, &Survey, DateTime<Utc>) -> Result<T, EngineError>,
    {
        let peek = self.read_state(respondent_id).await?;
        let mut survey = self.load_survey(peek.survey_id).await?;
        let mut retried = false;

        let (_guard, state) = loop {
            let guard = self.locks.acquire(respondent_id).await;
            let state = self.read_state(respondent_id).await?;
            if state.survey_id == survey.id {
                break (guard, state);
            }
            if retried {
                survey = self.load_survey(state.survey_id).await?;
                break (guard, state);
            }
            // Restarted on another survey between peek and lock.
            drop(guard);
            retried = true;
            survey = self.load_survey(state.survey_id).await?;
        };

        self.apply(state, |state, now| f(state, &*survey, now)).await
    }

    async fn apply<T, F>(&self, mut state: ConversationState, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&mut ConversationState, DateTime<Utc>) -> Result<T, EngineError>,
    {
        let now = Utc::now();
        if self.expire_if_idle(&mut state, now).await? {
            tracing::info!(
                respondent_id = state.respondent_id,
                survey_id = state.survey_id,
                "conversation expired"
            );
            return Err(EngineError::SessionExpired(state.respondent_id));
        }

        let before = state.clone();
        let out = f(&mut state, now)?;
        if state != before {
            self.states.save_state(&state).await?;
        }
        Ok(out)
    }
}

fn current_question(
    state: &ConversationState,
    action: &'static str,
) -> Result<QuestionId, EngineError> {
    match (state.status, state.current_question) {
        (ConversationStatus::Active, Some(id)) => Ok(id),
        (from, _) => Err(EngineError::InvalidTransition { from, action }),
    }
}

fn ensure_target(survey: &Survey, determinant: NextDeterminant) -> Result<(), EngineError> {
    match determinant.target() {
        Some(target) if !survey.contains(target) => {
            Err(EngineError::QuestionNotFound(target).logged())
        }
        _ => Ok(()),
    }
}

fn log_outcome(state: &ConversationState, from: QuestionId, outcome: NextOutcome) {
    match outcome {
        NextOutcome::Question(next) => tracing::debug!(
            respondent_id = state.respondent_id,
            survey_id = state.survey_id,
            question_id = from,
            next,
            "advanced"
        ),
        NextOutcome::Completed => tracing::info!(
            respondent_id = state.respondent_id,
            survey_id = state.survey_id,
            "survey completed"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::MemoryStateStore;
    use crate::navigation::SubmittedAnswer;
    use crate::survey::SurveyCatalog;

    const BRANCHING: &str = r#"
[survey]
id = 1
title = "Branching"

[[questions]]
id = 1
position = 1
kind = "single_choice"
text = "Pick"
next = 3

[[questions.options]]
text = "A"
next = 2

[[questions.options]]
text = "B"
next = 3

[[questions]]
id = 2
position = 2
kind = "text"
text = "Why A?"
required = false
next = 3

[[questions]]
id = 3
position = 3
kind = "number"
text = "How many?"
next = "end"
"#;

    fn engine() -> (SurveyEngine, Arc<MemoryStateStore>) {
        let catalog = Arc::new(SurveyCatalog::new());
        catalog.insert(Survey::from_toml_str(BRANCHING).unwrap());
        catalog.activate(1).unwrap();
        let states = Arc::new(MemoryStateStore::new());
        let engine = SurveyEngine::new(catalog, states.clone(), &EngineConfig::default());
        (engine, states)
    }

    #[tokio::test]
    async fn start_requires_active_survey() {
        let catalog = Arc::new(SurveyCatalog::new());
        catalog.insert(Survey::from_toml_str(BRANCHING).unwrap());
        let engine = SurveyEngine::new(
            catalog,
            Arc::new(MemoryStateStore::new()),
            &EngineConfig::default(),
        );
        assert!(matches!(
            engine.start(5, 1).await,
            Err(EngineError::SurveyInactive(1))
        ));
        assert!(matches!(
            engine.start(5, 2).await,
            Err(EngineError::SurveyNotFound(2))
        ));
    }

    #[tokio::test]
    async fn start_refuses_while_active() {
        let (engine, _) = engine();
        assert_eq!(engine.start(5, 1).await.unwrap(), 1);
        let err = engine.start(5, 1).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn restart_after_completion_archives() {
        let (engine, states) = engine();
        engine.start(5, 1).await.unwrap();
        engine
            .get_next(AnswerSubmission::new(5, SubmittedAnswer::Choice(1)))
            .await
            .unwrap();
        engine
            .get_next(AnswerSubmission::new(5, SubmittedAnswer::Number(2.0)))
            .await
            .unwrap();
        engine.start(5, 1).await.unwrap();
        assert_eq!(states.archived().len(), 1);
        assert_eq!(states.archived()[0].status, ConversationStatus::Completed);
    }

    #[tokio::test]
    async fn skip_optional_and_required() {
        let (engine, _) = engine();
        engine.start(5, 1).await.unwrap();
        assert!(matches!(
            engine.skip(5).await,
            Err(EngineError::NotOptional(1))
        ));
        engine
            .get_next(AnswerSubmission::new(5, SubmittedAnswer::Choice(0)))
            .await
            .unwrap();
        assert_eq!(engine.skip(5).await.unwrap(), NextOutcome::Question(3));
    }

    #[tokio::test]
    async fn unknown_respondent_is_not_found() {
        let (engine, _) = engine();
        let err = engine.go_back(77).await.unwrap_err();
        assert!(matches!(err, EngineError::RespondentNotFound(77)));
        assert!(engine.state(77).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rejected_answer_leaves_state_untouched() {
        let (engine, states) = engine();
        engine.start(5, 1).await.unwrap();
        let before = states.get_state(5).await.unwrap();
        let err = engine
            .get_next(AnswerSubmission::new(5, SubmittedAnswer::Text("A".into())))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::AnswerMismatch { .. }));
        assert_eq!(states.get_state(5).await.unwrap(), before);
    }

    #[tokio::test]
    async fn validate_and_activate() {
        let (engine, _) = engine();
        assert_eq!(engine.validate_flow(1).await.unwrap(), FlowVerdict::Valid);
        assert!(engine.activate(1).await.unwrap().is_active());
        assert!(matches!(
            engine.validate_flow(9).await,
            Err(EngineError::SurveyNotFound(9))
        ));
    }
}
