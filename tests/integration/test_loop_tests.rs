//! Iterative evaluation loop: success, exhaustion, interruption, and failure.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use agent_trainer::config::{IsolationLevel, TestLoopConfig};
use agent_trainer::models::result::ResultStatus;
use agent_trainer::models::scenario::PromptPhase;
use agent_trainer::models::session::SessionStatus;

use super::test_helpers::{
    loop_config, orchestrator, wait_terminal, wait_until, Behavior, ScriptedFactory,
    ScriptedProvider, SCENARIO,
};

#[tokio::test]
async fn succeeds_on_second_iteration() {
    let provider = Arc::new(ScriptedProvider::new().succeeding_at(2));
    let factory = Arc::new(ScriptedFactory::new(Behavior::Echo));
    let orch = orchestrator(&provider, &factory, loop_config(5, IsolationLevel::Strict));

    let session = orch.start_session(SCENARIO).await.expect("started");
    let done = wait_terminal(&orch, &session.id).await;

    assert_eq!(done.status, SessionStatus::Completed);
    assert_eq!(done.responses.len(), 2);
    assert_eq!(done.current_iteration, 2);
    assert!(done.end_time.is_some());

    let results = provider.results_for(&session.id);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, ResultStatus::Success);
    assert_eq!(results[0].attempts, 2);
    assert_eq!(results[0].responses.len(), 2);
    assert_eq!(results[0].metrics.error_count, 0);
}

#[tokio::test]
async fn responses_are_recorded_in_iteration_order() {
    let provider = Arc::new(ScriptedProvider::new().succeeding_at(3));
    let factory = Arc::new(ScriptedFactory::new(Behavior::Echo));
    let orch = orchestrator(&provider, &factory, loop_config(5, IsolationLevel::None));

    let session = orch.start_session(SCENARIO).await.expect("started");
    let done = wait_terminal(&orch, &session.id).await;

    let replies: Vec<&str> = done.responses.iter().map(|r| r.response.as_str()).collect();
    assert_eq!(replies, vec!["echo: prompt 1", "echo: prompt 2", "echo: prompt 3"]);
    assert!(done
        .responses
        .windows(2)
        .all(|pair| pair[0].timestamp <= pair[1].timestamp));
    assert!(done
        .responses
        .iter()
        .all(|r| r.validation_results.iter().all(|v| v.passed)));
}

#[tokio::test]
async fn first_prompt_is_initial_then_follow_up() {
    let provider = Arc::new(ScriptedProvider::new().succeeding_at(2));
    let factory = Arc::new(ScriptedFactory::new(Behavior::Echo));
    let orch = orchestrator(&provider, &factory, loop_config(5, IsolationLevel::None));

    let session = orch.start_session(SCENARIO).await.expect("started");
    let done = wait_terminal(&orch, &session.id).await;

    assert_eq!(
        *provider.phases.lock().unwrap(),
        vec![PromptPhase::Initial, PromptPhase::FollowUp]
    );
    assert_eq!(done.responses[0].prompt_id, format!("{SCENARIO}-p1"));
    assert_eq!(done.responses[1].prompt_id, format!("{SCENARIO}-p2"));
}

#[tokio::test]
async fn evaluation_sees_full_history() {
    let provider = Arc::new(ScriptedProvider::new().succeeding_at(3));
    let factory = Arc::new(ScriptedFactory::new(Behavior::Echo));
    let orch = orchestrator(&provider, &factory, loop_config(5, IsolationLevel::Strict));

    let session = orch.start_session(SCENARIO).await.expect("started");
    wait_terminal(&orch, &session.id).await;

    assert_eq!(*provider.evaluated_lengths.lock().unwrap(), vec![1, 2, 3]);
}

#[tokio::test]
async fn single_iteration_without_success_fails() {
    let provider = Arc::new(ScriptedProvider::new());
    let factory = Arc::new(ScriptedFactory::new(Behavior::Echo));
    let orch = orchestrator(&provider, &factory, loop_config(1, IsolationLevel::Strict));

    let session = orch.start_session(SCENARIO).await.expect("started");
    let done = wait_terminal(&orch, &session.id).await;

    assert_eq!(done.status, SessionStatus::Failed);
    assert_eq!(done.responses.len(), 1);

    let results = provider.results_for(&session.id);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, ResultStatus::Failure);
    assert_eq!(results[0].attempts, 1);
    assert_eq!(results[0].metrics.error_count, 0);
    assert!(results[0].error.is_none());
    assert_eq!(factory.created().len(), 1, "no isolation after the last iteration");
}

#[tokio::test]
async fn failing_validation_exhausts_iterations() {
    let provider = Arc::new(ScriptedProvider::new().with_failing_validation());
    let factory = Arc::new(ScriptedFactory::new(Behavior::Echo));
    let orch = orchestrator(&provider, &factory, loop_config(3, IsolationLevel::Strict));

    let session = orch.start_session(SCENARIO).await.expect("started");
    let done = wait_terminal(&orch, &session.id).await;

    assert_eq!(done.status, SessionStatus::Failed);
    assert_eq!(done.responses.len(), 3);
    assert!(done.responses.iter().all(|r| !r.all_passed()));
    assert_eq!(provider.results_for(&session.id)[0].attempts, 3);
}

#[tokio::test]
async fn pause_mid_iteration_then_resume_completes() {
    let provider = Arc::new(ScriptedProvider::new().succeeding_at(1));
    let factory = Arc::new(ScriptedFactory::new(Behavior::Block));
    let orch = orchestrator(&provider, &factory, loop_config(5, IsolationLevel::Strict));
    let session = orch.start_session(SCENARIO).await.expect("started");
    wait_until(&orch, &session.id, |_| factory.sends() == 1).await;

    let paused = orch.pause_session(&session.id).expect("paused");
    assert_eq!(paused.current_iteration, 0);

    factory.set_behavior(Behavior::Echo);
    orch.resume_session(&session.id)
        .await
        .expect("resume ok")
        .expect("was paused");
    let done = wait_terminal(&orch, &session.id).await;

    assert_eq!(done.status, SessionStatus::Completed);
    assert_eq!(done.responses.len(), 1, "interrupted iteration left no trace");
    let results = provider.results_for(&session.id);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].attempts, 1);
}

#[tokio::test]
async fn response_arriving_after_pause_is_discarded() {
    let provider = Arc::new(ScriptedProvider::new().succeeding_at(1));
    let factory = Arc::new(ScriptedFactory::new(Behavior::BlockIgnoringDispose));
    let orch = orchestrator(&provider, &factory, loop_config(5, IsolationLevel::Strict));
    let session = orch.start_session(SCENARIO).await.expect("started");
    wait_until(&orch, &session.id, |_| factory.sends() == 1).await;

    orch.pause_session(&session.id).expect("paused");
    factory.release();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while provider.evaluated_lengths.lock().unwrap().is_empty() {
        assert!(tokio::time::Instant::now() < deadline, "iteration never finished");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    let after = orch.get_session(&session.id).expect("exists");
    assert_eq!(after.status, SessionStatus::Paused);
    assert!(after.responses.is_empty());
    assert_eq!(after.current_iteration, 0);
    assert!(provider.results().is_empty());

    orch.end_session(&session.id).await.expect("ended");
}

#[tokio::test]
async fn end_while_paused_records_success_once() {
    let provider = Arc::new(ScriptedProvider::new());
    let factory = Arc::new(ScriptedFactory::new(Behavior::Block));
    let orch = orchestrator(&provider, &factory, loop_config(5, IsolationLevel::Strict));
    let session = orch.start_session(SCENARIO).await.expect("started");
    wait_until(&orch, &session.id, |_| factory.sends() == 1).await;
    orch.pause_session(&session.id).expect("paused");

    let ended = orch.end_session(&session.id).await.expect("ended");

    assert_eq!(ended.status, SessionStatus::Completed);
    assert!(orch.resume_session(&session.id).await.expect("ok").is_none());
    tokio::time::sleep(Duration::from_millis(50)).await;

    let results = provider.results_for(&session.id);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, ResultStatus::Success);
    assert_eq!(results[0].attempts, 0);
}

#[tokio::test]
async fn channel_error_fails_session_with_error_count() {
    let provider = Arc::new(ScriptedProvider::new());
    let factory = Arc::new(ScriptedFactory::new(Behavior::Echo).failing_on_send(2));
    let orch = orchestrator(&provider, &factory, loop_config(5, IsolationLevel::Strict));

    let session = orch.start_session(SCENARIO).await.expect("started");
    let done = wait_terminal(&orch, &session.id).await;

    assert_eq!(done.status, SessionStatus::Failed);
    assert_eq!(done.responses.len(), 1);

    let results = provider.results_for(&session.id);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, ResultStatus::Failure);
    assert_eq!(results[0].attempts, 2);
    assert_eq!(results[0].metrics.error_count, 1);
    let reason = results[0].error.as_deref().expect("reason recorded");
    assert!(reason.contains("scripted failure"), "unexpected reason: {reason}");
}

#[tokio::test]
async fn missing_prompt_fails_session() {
    let provider = Arc::new(ScriptedProvider::new().without_prompts());
    let factory = Arc::new(ScriptedFactory::new(Behavior::Echo));
    let orch = orchestrator(&provider, &factory, loop_config(5, IsolationLevel::Strict));

    let session = orch.start_session(SCENARIO).await.expect("started");
    let done = wait_terminal(&orch, &session.id).await;

    assert_eq!(done.status, SessionStatus::Failed);
    assert_eq!(factory.sends(), 0, "nothing was sent");
    let results = provider.results_for(&session.id);
    assert_eq!(results[0].metrics.error_count, 1);
    assert!(results[0]
        .error
        .as_deref()
        .is_some_and(|e| e.starts_with("provider:")));
}

#[tokio::test]
async fn iteration_deadline_fails_hung_agent() {
    let provider = Arc::new(ScriptedProvider::new());
    let factory = Arc::new(ScriptedFactory::new(Behavior::Hang));
    let config = TestLoopConfig {
        timeout_seconds: 1,
        ..loop_config(5, IsolationLevel::Strict)
    };
    let orch = orchestrator(&provider, &factory, config);

    let session = orch.start_session(SCENARIO).await.expect("started");
    let done = wait_terminal(&orch, &session.id).await;

    assert_eq!(done.status, SessionStatus::Failed);
    assert!(done.responses.is_empty());
    let results = provider.results_for(&session.id);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].metrics.error_count, 1);
    assert!(results[0]
        .error
        .as_deref()
        .is_some_and(|e| e.starts_with("timeout:")));
    assert_eq!(factory.disposals(), 1);
}

#[tokio::test]
async fn deadline_covers_slow_provider() {
    let provider = Arc::new(ScriptedProvider::new().with_prompt_delay(Duration::from_secs(3)));
    let factory = Arc::new(ScriptedFactory::new(Behavior::Echo));
    let config = TestLoopConfig {
        timeout_seconds: 1,
        ..loop_config(5, IsolationLevel::Strict)
    };
    let orch = orchestrator(&provider, &factory, config);

    let session = orch.start_session(SCENARIO).await.expect("started");
    let done = wait_terminal(&orch, &session.id).await;

    assert_eq!(done.status, SessionStatus::Failed);
    assert_eq!(factory.sends(), 0);
}

#[tokio::test]
async fn pause_resume_cycles_record_exactly_one_result() {
    let provider = Arc::new(ScriptedProvider::new());
    let factory = Arc::new(ScriptedFactory::new(Behavior::Block));
    let orch = orchestrator(&provider, &factory, loop_config(5, IsolationLevel::Strict));
    let session = orch.start_session(SCENARIO).await.expect("started");

    for _ in 0..5 {
        orch.pause_session(&session.id).expect("paused");
        orch.resume_session(&session.id)
            .await
            .expect("resume ok")
            .expect("resumed");
    }
    orch.end_session(&session.id).await.expect("ended");
    assert!(orch.end_session(&session.id).await.is_none());
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(provider.results().len(), 1);
    let ids = factory.created();
    assert_eq!(ids.len(), 6);
    let unique: HashSet<&String> = ids.iter().collect();
    assert_eq!(unique.len(), 6, "every resume binds a new channel");
    assert_eq!(factory.disposals(), 6, "every channel is released");
}

#[tokio::test]
async fn concurrent_sessions_are_independent() {
    let provider = Arc::new(ScriptedProvider::new().succeeding_at(2));
    let factory = Arc::new(ScriptedFactory::new(Behavior::Echo));
    let orch = orchestrator(&provider, &factory, loop_config(5, IsolationLevel::Strict));

    let mut ids = Vec::new();
    for _ in 0..4 {
        ids.push(orch.start_session(SCENARIO).await.expect("started").id);
    }
    for id in &ids {
        let done = wait_terminal(&orch, id).await;
        assert_eq!(done.status, SessionStatus::Completed);
        assert_eq!(done.responses.len(), 2);
    }

    assert_eq!(provider.results().len(), 4);
    let created = factory.created();
    for id in &ids {
        let own = created
            .iter()
            .filter(|c| c.starts_with(&format!("{id}/")))
            .count();
        assert_eq!(own, 2, "session {id} owns exactly its own channels");
    }
}
