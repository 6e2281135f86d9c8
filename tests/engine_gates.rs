use chrono::{TimeDelta, Utc};
use std::sync::Arc;
use surveyflow::config::EngineConfig;
use surveyflow::navigation::resolve;
use surveyflow::{
    AnswerSubmission, BackOutcome, ConversationStatus, EngineError, MemoryStateStore,
    NextDeterminant, NextOutcome, Outcome, StateStore, SubmittedAnswer, Survey, SurveyCatalog,
    SurveyEngine,
};

const LINEAR: &str = r#"
[survey]
id = 1
title = "Linear"

[[questions]]
id = 1
position = 1
kind = "text"
text = "Name?"
next = 2

[[questions]]
id = 2
position = 2
kind = "number"
text = "Age?"
next = 3

[[questions]]
id = 3
position = 3
kind = "date"
text = "Start date?"
next = "end"
"#;

const BRANCHING: &str = r#"
[survey]
id = 2
title = "Branching"

[[questions]]
id = 1
position = 1
kind = "single_choice"
text = "Pick one"
next = "end"

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
next = "end"

[[questions]]
id = 3
position = 3
kind = "text"
text = "Why B?"
next = "end"
"#;

const MULTI: &str = r#"
[survey]
id = 3
title = "Multi"

[[questions]]
id = 1
position = 1
kind = "multiple_choice"
text = "Which apply?"
next = 4

[[questions.options]]
text = "none of these"

[[questions.options]]
text = "pets"
next = 2

[[questions.options]]
text = "garden"
next = 3

[[questions]]
id = 2
position = 2
kind = "text"
text = "Pets?"
next = "end"

[[questions]]
id = 3
position = 3
kind = "text"
text = "Garden?"
next = "end"

[[questions]]
id = 4
position = 4
kind = "text"
text = "Anything else?"
next = "end"
"#;

fn setup(config: EngineConfig) -> (Arc<SurveyEngine>, Arc<MemoryStateStore>) {
    let catalog = Arc::new(SurveyCatalog::new());
    for src in [LINEAR, BRANCHING, MULTI] {
        let id = catalog.insert(Survey::from_toml_str(src).unwrap()).id;
        catalog.activate(id).unwrap();
    }
    let states = Arc::new(MemoryStateStore::new());
    let engine = Arc::new(SurveyEngine::new(catalog, states.clone(), &config));
    (engine, states)
}

fn answer(respondent: i64, a: SubmittedAnswer) -> AnswerSubmission {
    AnswerSubmission::new(respondent, a)
}

// ── Gate 1: linear traversal ─────────────────────────────────────

#[tokio::test]
async fn gate1_linear_traversal_visits_each_once() {
    let (engine, _) = setup(EngineConfig::default());
    let mut visited = vec![engine.start(10, 1).await.unwrap()];

    let script = [
        SubmittedAnswer::Text("Ada".into()),
        SubmittedAnswer::Number(36.0),
        SubmittedAnswer::Date(chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()),
    ];
    let mut completed = false;
    for a in script {
        match engine.get_next(answer(10, a)).await.unwrap() {
            NextOutcome::Question(id) => visited.push(id),
            NextOutcome::Completed => completed = true,
        }
    }
    assert_eq!(visited, vec![1, 2, 3]);
    assert!(completed);
    let state = engine.state(10).await.unwrap().unwrap();
    assert_eq!(state.status, ConversationStatus::Completed);
}

// ── Gate 2: branching ────────────────────────────────────────────

#[tokio::test]
async fn gate2_branching_follows_option() {
    let (engine, _) = setup(EngineConfig::default());
    engine.start(1, 2).await.unwrap();
    engine.start(2, 2).await.unwrap();

    assert_eq!(
        engine
            .get_next(answer(1, SubmittedAnswer::Choice(0)))
            .await
            .unwrap(),
        NextOutcome::Question(2)
    );
    assert_eq!(
        engine
            .get_next(answer(2, SubmittedAnswer::Choice(1)))
            .await
            .unwrap(),
        NextOutcome::Question(3)
    );
}

// ── Gate 3: advance/back round trip ──────────────────────────────

#[tokio::test]
async fn gate3_advance_then_back_round_trips() {
    let (engine, states) = setup(EngineConfig::default());
    engine.start(1, 1).await.unwrap();
    engine
        .get_next(answer(1, SubmittedAnswer::Text("x".into())))
        .await
        .unwrap();
    let before = states.get_state(1).await.unwrap().unwrap();

    engine
        .get_next(answer(1, SubmittedAnswer::Number(1.0)))
        .await
        .unwrap();
    assert_eq!(engine.go_back(1).await.unwrap(), BackOutcome::Previous(2));

    let after = states.get_state(1).await.unwrap().unwrap();
    assert_eq!(after.current_question, before.current_question);
    assert_eq!(after.history.len(), before.history.len());
}

#[tokio::test]
async fn gate3_back_on_first_question_is_no_history() {
    let (engine, _) = setup(EngineConfig::default());
    engine.start(1, 1).await.unwrap();
    assert_eq!(engine.go_back(1).await.unwrap(), BackOutcome::NoHistory);
    let state = engine.state(1).await.unwrap().unwrap();
    assert_eq!(state.current_question, Some(1));
    assert_eq!(state.status, ConversationStatus::Active);
}

// ── Gate 4: cancel idempotence ───────────────────────────────────

#[tokio::test]
async fn gate4_cancel_twice_is_noop() {
    let (engine, states) = setup(EngineConfig::default());
    engine.start(1, 1).await.unwrap();
    engine
        .get_next(answer(1, SubmittedAnswer::Text("x".into())))
        .await
        .unwrap();

    assert_eq!(engine.cancel(1).await.unwrap(), ConversationStatus::Cancelled);
    let first = states.get_state(1).await.unwrap();
    assert_eq!(engine.cancel(1).await.unwrap(), ConversationStatus::Cancelled);
    assert_eq!(states.get_state(1).await.unwrap(), first);
    assert!(first.unwrap().history.is_empty());
}

#[tokio::test]
async fn gate4_terminal_conversation_rejects_transitions() {
    let (engine, _) = setup(EngineConfig::default());
    engine.start(1, 2).await.unwrap();
    engine
        .get_next(answer(1, SubmittedAnswer::Choice(0)))
        .await
        .unwrap();
    engine
        .get_next(answer(1, SubmittedAnswer::Text("because".into())))
        .await
        .unwrap();

    let err = engine
        .get_next(answer(1, SubmittedAnswer::Text("again".into())))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));
    assert_eq!(err.outcome(), Outcome::Conflict);
    assert!(matches!(
        engine.cancel(1).await,
        Err(EngineError::InvalidTransition { .. })
    ));
    assert!(matches!(
        engine.go_back(1).await,
        Err(EngineError::InvalidTransition { .. })
    ));
}

// ── Gate 5: per-respondent exclusivity ───────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn gate5_concurrent_duplicates_apply_once() {
    let (engine, states) = setup(EngineConfig::default());
    engine.start(7, 2).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            engine
                .get_next(AnswerSubmission::new(7, SubmittedAnswer::Choice(1)).for_question(1))
                .await
        }));
    }

    let mut advanced = 0;
    let mut stale = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(NextOutcome::Question(3)) => advanced += 1,
            Err(EngineError::StaleAnswer {
                submitted: 1,
                current: Some(3),
            }) => stale += 1,
            other => panic!("unexpected {other:?}"),
        }
    }
    assert_eq!(advanced, 1);
    assert_eq!(stale, 7);

    let state = states.get_state(7).await.unwrap().unwrap();
    assert_eq!(state.current_question, Some(3));
    assert_eq!(state.history, vec![1]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn gate5_respondents_are_independent() {
    let (engine, _) = setup(EngineConfig::default());
    let mut handles = Vec::new();
    for respondent in 0..16 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            engine.start(respondent, 2).await.unwrap();
            engine
                .get_next(AnswerSubmission::new(
                    respondent,
                    SubmittedAnswer::Choice((respondent % 2) as usize),
                ))
                .await
        }));
    }
    for (respondent, handle) in handles.into_iter().enumerate() {
        let expected = if respondent % 2 == 0 { 2 } else { 3 };
        assert_eq!(handle.await.unwrap().unwrap(), NextOutcome::Question(expected));
    }
}

// ── Gate 6: lazy expiry ──────────────────────────────────────────

#[tokio::test]
async fn gate6_idle_conversation_expires_on_access() {
    let config = EngineConfig {
        inactivity_timeout_secs: 60,
        ..EngineConfig::default()
    };
    let (engine, states) = setup(config);
    engine.start(3, 1).await.unwrap();

    let mut state = states.get_state(3).await.unwrap().unwrap();
    state.last_activity = Utc::now() - TimeDelta::seconds(120);
    states.save_state(&state).await.unwrap();

    let err = engine
        .get_next(answer(3, SubmittedAnswer::Text("late".into())))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::SessionExpired(3)));
    assert_eq!(err.outcome(), Outcome::Gone);
    assert_eq!(
        engine.state(3).await.unwrap().unwrap().status,
        ConversationStatus::Expired
    );

    // Restarting archives the expired record.
    assert_eq!(engine.start(3, 1).await.unwrap(), 1);
    let archived = states.archived();
    assert_eq!(archived.len(), 1);
    assert_eq!(archived[0].status, ConversationStatus::Expired);
}

#[tokio::test]
async fn gate6_state_read_applies_expiry() {
    let config = EngineConfig {
        inactivity_timeout_secs: 60,
        ..EngineConfig::default()
    };
    let (engine, states) = setup(config);
    engine.start(4, 1).await.unwrap();
    let mut state = states.get_state(4).await.unwrap().unwrap();
    state.last_activity = Utc::now() - TimeDelta::seconds(61);
    states.save_state(&state).await.unwrap();

    let seen = engine.state(4).await.unwrap().unwrap();
    assert_eq!(seen.status, ConversationStatus::Expired);
    assert_eq!(
        states.get_state(4).await.unwrap().unwrap().status,
        ConversationStatus::Expired
    );
}

#[tokio::test]
async fn gate6_start_over_active_expired_conversation() {
    let config = EngineConfig {
        inactivity_timeout_secs: 60,
        ..EngineConfig::default()
    };
    let (engine, states) = setup(config);
    engine.start(5, 1).await.unwrap();
    let mut state = states.get_state(5).await.unwrap().unwrap();
    state.last_activity = Utc::now() - TimeDelta::seconds(600);
    states.save_state(&state).await.unwrap();

    assert_eq!(engine.start(5, 2).await.unwrap(), 1);
    assert_eq!(states.archived()[0].status, ConversationStatus::Expired);
    assert_eq!(states.get_state(5).await.unwrap().unwrap().survey_id, 2);
}

// ── Gate 7: multi-select policy ──────────────────────────────────

#[tokio::test]
async fn gate7_first_override_in_display_order_wins() {
    let (engine, _) = setup(EngineConfig::default());

    engine.start(1, 3).await.unwrap();
    // Ticked garden before pets; pets is listed first.
    assert_eq!(
        engine
            .get_next(answer(1, SubmittedAnswer::Choices(vec![2, 1])))
            .await
            .unwrap(),
        NextOutcome::Question(2)
    );

    engine.start(2, 3).await.unwrap();
    assert_eq!(
        engine
            .get_next(answer(2, SubmittedAnswer::Choices(vec![0, 2])))
            .await
            .unwrap(),
        NextOutcome::Question(3)
    );

    engine.start(3, 3).await.unwrap();
    assert_eq!(
        engine
            .get_next(answer(3, SubmittedAnswer::Choices(vec![0])))
            .await
            .unwrap(),
        NextOutcome::Question(4)
    );
}

#[test]
fn gate7_resolve_is_deterministic() {
    let survey = Survey::from_toml_str(MULTI).unwrap();
    let question = survey.question(1).unwrap();
    let a = SubmittedAnswer::Choices(vec![2, 1, 0]);
    let first = resolve(question, &a).unwrap();
    assert_eq!(first, NextDeterminant::GoToQuestion(2));
    for _ in 0..5 {
        assert_eq!(resolve(question, &a).unwrap(), first);
    }
}

// ── Gate 8: bad requests ─────────────────────────────────────────

#[tokio::test]
async fn gate8_answer_mismatch_is_bad_request() {
    let (engine, states) = setup(EngineConfig::default());
    engine.start(1, 2).await.unwrap();
    let before = states.get_state(1).await.unwrap();

    let err = engine
        .get_next(answer(1, SubmittedAnswer::Choice(5)))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::AnswerMismatch { question_id: 1, .. }));
    assert_eq!(err.outcome(), Outcome::BadRequest);
    assert_eq!(states.get_state(1).await.unwrap(), before);
}

#[tokio::test]
async fn gate8_unknown_respondent_and_survey_are_not_found() {
    let (engine, _) = setup(EngineConfig::default());
    let err = engine
        .get_next(answer(404, SubmittedAnswer::Text("?".into())))
        .await
        .unwrap_err();
    assert_eq!(err.outcome(), Outcome::NotFound);
    assert_eq!(
        engine.start(1, 404).await.unwrap_err().outcome(),
        Outcome::NotFound
    );
}

#[tokio::test]
async fn gate8_inactive_survey_cannot_start() {
    let catalog = Arc::new(SurveyCatalog::new());
    catalog.insert(Survey::from_toml_str(LINEAR).unwrap());
    let engine = SurveyEngine::new(
        catalog,
        Arc::new(MemoryStateStore::new()),
        &EngineConfig::default(),
    );
    assert!(matches!(
        engine.start(1, 1).await,
        Err(EngineError::SurveyInactive(1))
    ));
}
