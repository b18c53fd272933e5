//! Test session model and lifecycle helpers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::scenario::{Scenario, ValidationResult};

/// Lifecycle status for a test session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// The test loop is driving the session.
    Running,
    /// Paused by an operator; no new iterations start.
    Paused,
    /// Terminal: the scenario succeeded or the session was ended.
    Completed,
    /// Terminal: iterations were exhausted or infrastructure failed.
    Failed,
}

impl SessionStatus {
    /// Whether no further transitions are permitted out of this status.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether the session counts towards the active session set.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }
}

/// One prompt/response exchange recorded in iteration order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResponseRecord {
    /// Prompt the response answers.
    pub prompt_id: String,
    /// Raw agent response text.
    pub response: String,
    /// When the response was received.
    pub timestamp: DateTime<Utc>,
    /// Per-rule validation outcomes.
    pub validation_results: Vec<ValidationResult>,
    /// Round-trip latency of the channel call in milliseconds.
    pub latency_ms: u64,
}

impl ResponseRecord {
    /// Whether every validation rule passed for this response.
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.validation_results.iter().all(|r| r.passed)
    }
}

/// One evaluation run of one scenario.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestSession {
    /// Unique session identifier; immutable after creation.
    pub id: String,
    /// Creation timestamp.
    pub start_time: DateTime<Utc>,
    /// Set once, on the transition into a terminal status.
    pub end_time: Option<DateTime<Utc>>,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// Resolved scenario definition.
    pub scenario: Scenario,
    /// Iterations consumed so far.
    pub current_iteration: u32,
    /// Append-only response history in iteration order.
    pub responses: Vec<ResponseRecord>,
    /// Identity of the agent channel currently bound to the session.
    pub channel_id: Option<String>,
}

impl TestSession {
    /// Construct a new running session with a generated identifier.
    #[must_use]
    pub fn new(scenario: Scenario) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            start_time: Utc::now(),
            end_time: None,
            status: SessionStatus::Running,
            scenario,
            current_iteration: 0,
            responses: Vec::new(),
            channel_id: None,
        }
    }

    /// Determine whether a lifecycle transition is permitted.
    #[must_use]
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        matches!(
            (self.status, next),
            (SessionStatus::Running, SessionStatus::Paused)
                | (SessionStatus::Paused, SessionStatus::Running)
                | (
                    SessionStatus::Running | SessionStatus::Paused,
                    SessionStatus::Completed | SessionStatus::Failed
                )
        )
    }
}
