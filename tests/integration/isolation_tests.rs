//! Channel identity across iterations for each isolation level.

use std::collections::HashSet;
use std::sync::Arc;

use agent_trainer::config::IsolationLevel;
use agent_trainer::models::session::SessionStatus;
use agent_trainer::orchestrator::isolation::requires_reset;
use agent_trainer::AppError;

use super::test_helpers::{
    loop_config, orchestrator, wait_terminal, Behavior, ScriptedFactory, ScriptedProvider,
    SCENARIO,
};

#[test]
fn reset_policy_per_level() {
    assert!(requires_reset(IsolationLevel::Strict));
    assert!(requires_reset(IsolationLevel::Moderate));
    assert!(!requires_reset(IsolationLevel::None));
}

#[tokio::test]
async fn strict_uses_a_fresh_channel_every_iteration() {
    let provider = Arc::new(ScriptedProvider::new().succeeding_at(3));
    let factory = Arc::new(ScriptedFactory::new(Behavior::Echo));
    let orch = orchestrator(&provider, &factory, loop_config(5, IsolationLevel::Strict));

    let session = orch.start_session(SCENARIO).await.expect("started");
    let done = wait_terminal(&orch, &session.id).await;
    assert_eq!(done.status, SessionStatus::Completed);

    let created = factory.created();
    let expected: Vec<String> = (0..3).map(|n| format!("{}/ch-{n}", session.id)).collect();
    assert_eq!(created, expected);
    assert_eq!(factory.disposals(), 3, "each channel disposed exactly once");
}

#[tokio::test]
async fn moderate_behaves_like_strict() {
    let provider = Arc::new(ScriptedProvider::new().succeeding_at(2));
    let factory = Arc::new(ScriptedFactory::new(Behavior::Echo));
    let orch = orchestrator(&provider, &factory, loop_config(5, IsolationLevel::Moderate));

    let session = orch.start_session(SCENARIO).await.expect("started");
    wait_terminal(&orch, &session.id).await;

    let created: HashSet<String> = factory.created().into_iter().collect();
    assert_eq!(created.len(), 2);
}

#[tokio::test]
async fn none_keeps_one_channel_for_the_session() {
    let provider = Arc::new(ScriptedProvider::new().succeeding_at(3));
    let factory = Arc::new(ScriptedFactory::new(Behavior::Echo));
    let orch = orchestrator(&provider, &factory, loop_config(5, IsolationLevel::None));

    let session = orch.start_session(SCENARIO).await.expect("started");
    let done = wait_terminal(&orch, &session.id).await;

    assert_eq!(done.status, SessionStatus::Completed);
    assert_eq!(done.responses.len(), 3);
    assert_eq!(factory.created(), vec![format!("{}/ch-0", session.id)]);
    assert_eq!(factory.disposals(), 1, "released once on completion");
}

#[tokio::test]
async fn failed_reset_fails_the_session() {
    let provider = Arc::new(ScriptedProvider::new());
    let factory = Arc::new(ScriptedFactory::new(Behavior::Echo).failing_create_after(1));
    let orch = orchestrator(&provider, &factory, loop_config(5, IsolationLevel::Strict));

    let session = orch.start_session(SCENARIO).await.expect("started");
    let done = wait_terminal(&orch, &session.id).await;

    assert_eq!(done.status, SessionStatus::Failed);
    assert_eq!(done.responses.len(), 1);
    let results = provider.results_for(&session.id);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].attempts, 1, "the completed iteration is the only attempt");
    assert_eq!(results[0].metrics.error_count, 1);
    let expected = AppError::Channel(String::new()).to_string();
    assert!(results[0]
        .error
        .as_deref()
        .is_some_and(|e| e.starts_with(expected.as_str())));
}

#[tokio::test]
async fn hung_reset_fails_the_session_with_timeout() {
    let provider = Arc::new(ScriptedProvider::new());
    let factory = Arc::new(ScriptedFactory::new(Behavior::Echo).gating_creates_after(1));
    let mut config = loop_config(5, IsolationLevel::Strict);
    config.timeout_seconds = 1;
    let orch = orchestrator(&provider, &factory, config);

    let session = orch.start_session(SCENARIO).await.expect("started");
    let done = wait_terminal(&orch, &session.id).await;

    assert_eq!(done.status, SessionStatus::Failed);
    assert_eq!(done.responses.len(), 1);
    let results = provider.results_for(&session.id);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].attempts, 1);
    let expected = AppError::Timeout(String::new()).to_string();
    assert!(results[0]
        .error
        .as_deref()
        .is_some_and(|e| e.starts_with(expected.as_str())));
}
