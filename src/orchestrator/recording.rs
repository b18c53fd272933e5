//! Terminal result construction and hand-off to the scenario provider.

use tracing::{error, info};

use crate::models::result::{ResultStatus, TrainingMetrics, TrainingResult};
use crate::models::session::{SessionStatus, TestSession};
use crate::scenario::ScenarioProvider;

/// Why a session reached a terminal status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalOutcome {
    /// The scenario's success criterion was met.
    Succeeded,
    /// `max_iterations` were consumed without success.
    Exhausted,
    /// Ended externally through `end_session`.
    Ended,
    /// Infrastructure failure or externally forced failure.
    Errored(String),
}

impl TerminalOutcome {
    /// Session status this outcome transitions into.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        match self {
            Self::Succeeded | Self::Ended => SessionStatus::Completed,
            Self::Exhausted | Self::Errored(_) => SessionStatus::Failed,
        }
    }

    fn result_status(&self) -> ResultStatus {
        match self.status() {
            SessionStatus::Completed => ResultStatus::Success,
            _ => ResultStatus::Failure,
        }
    }

    fn error_count(&self) -> u32 {
        u32::from(matches!(self, Self::Errored(_)))
    }
}

/// Build the single result for a session that has just become terminal.
#[must_use]
pub fn build_result(session: &TestSession, outcome: &TerminalOutcome) -> TrainingResult {
    let responses = session.responses.clone();

    let total_latency: u64 = responses.iter().map(|r| r.latency_ms).sum();
    let response_time_ms = if responses.is_empty() {
        0
    } else {
        total_latency / responses.len() as u64
    };
    let token_usage = responses
        .iter()
        .map(|r| r.response.split_whitespace().count() as u64)
        .sum();

    TrainingResult {
        scenario_id: session.scenario.id.clone(),
        session_id: session.id.clone(),
        start_time: session.start_time,
        end_time: session.end_time.unwrap_or_else(chrono::Utc::now),
        status: outcome.result_status(),
        attempts: session.current_iteration,
        responses,
        metrics: TrainingMetrics {
            response_time_ms,
            token_usage,
            error_count: outcome.error_count(),
        },
        error: match outcome {
            TerminalOutcome::Errored(reason) => Some(reason.clone()),
            _ => None,
        },
    }
}

/// Hand `result` to the provider. Failures are logged, never propagated.
pub(crate) async fn record(provider: &dyn ScenarioProvider, result: TrainingResult) {
    let session_id = result.session_id.clone();
    let status = result.status;
    let attempts = result.attempts;

    match provider.record_result(result).await {
        Ok(()) => info!(session_id, ?status, attempts, "training result recorded"),
        Err(err) => error!(session_id, %err, "failed to record training result"),
    }
}
