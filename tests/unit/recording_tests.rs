use chrono::Utc;

use agent_trainer::models::result::ResultStatus;
use agent_trainer::models::scenario::Scenario;
use agent_trainer::models::session::{ResponseRecord, SessionStatus, TestSession};
use agent_trainer::orchestrator::recording::build_result;
use agent_trainer::orchestrator::TerminalOutcome;

fn finished_session(latencies: &[u64], responses: &[&str]) -> TestSession {
    let mut session = TestSession::new(Scenario {
        id: "greeting".into(),
        name: "Greeting".into(),
        description: String::new(),
    });
    for (i, (latency, text)) in latencies.iter().zip(responses).enumerate() {
        session.responses.push(ResponseRecord {
            prompt_id: format!("p{i}"),
            response: (*text).to_owned(),
            timestamp: Utc::now(),
            validation_results: Vec::new(),
            latency_ms: *latency,
        });
    }
    session.current_iteration = u32::try_from(session.responses.len()).expect("small");
    session.end_time = Some(Utc::now());
    session
}

#[test]
fn outcome_statuses() {
    assert_eq!(TerminalOutcome::Succeeded.status(), SessionStatus::Completed);
    assert_eq!(TerminalOutcome::Ended.status(), SessionStatus::Completed);
    assert_eq!(TerminalOutcome::Exhausted.status(), SessionStatus::Failed);
    assert_eq!(
        TerminalOutcome::Errored("boom".into()).status(),
        SessionStatus::Failed
    );
}

#[test]
fn success_result_copies_session_history() {
    let session = finished_session(&[10, 30], &["hello there", "hi"]);

    let result = build_result(&session, &TerminalOutcome::Succeeded);

    assert_eq!(result.status, ResultStatus::Success);
    assert_eq!(result.session_id, session.id);
    assert_eq!(result.scenario_id, "greeting");
    assert_eq!(result.attempts, 2);
    assert_eq!(result.responses, session.responses);
    assert_eq!(result.start_time, session.start_time);
    assert_eq!(Some(result.end_time), session.end_time);
    assert_eq!(result.metrics.error_count, 0);
    assert!(result.error.is_none());
}

#[test]
fn metrics_average_latency_and_count_tokens() {
    let session = finished_session(&[10, 30], &["hello there", "hi"]);

    let result = build_result(&session, &TerminalOutcome::Exhausted);

    assert_eq!(result.status, ResultStatus::Failure);
    assert_eq!(result.metrics.response_time_ms, 20);
    assert_eq!(result.metrics.token_usage, 3);
    assert_eq!(result.metrics.error_count, 0);
}

#[test]
fn errored_result_carries_reason_and_error_count() {
    let session = finished_session(&[], &[]);

    let result = build_result(&session, &TerminalOutcome::Errored("channel: closed".into()));

    assert_eq!(result.status, ResultStatus::Failure);
    assert_eq!(result.metrics.error_count, 1);
    assert_eq!(result.metrics.response_time_ms, 0);
    assert_eq!(result.error.as_deref(), Some("channel: closed"));
    assert_eq!(result.attempts, 0);
}

#[test]
fn ended_result_is_success() {
    let session = finished_session(&[5], &["partial"]);
    let result = build_result(&session, &TerminalOutcome::Ended);
    assert_eq!(result.status, ResultStatus::Success);
    assert_eq!(result.metrics.error_count, 0);
}
