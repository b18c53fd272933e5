//! Terminal training result records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::session::ResponseRecord;

/// Outcome classification of a finished session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    /// The scenario's success criterion was met or the session was ended.
    Success,
    /// Iterations were exhausted or the session failed.
    Failure,
}

/// Aggregate metrics attached to a result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TrainingMetrics {
    /// Mean channel round-trip latency across recorded responses, in milliseconds.
    pub response_time_ms: u64,
    /// Whitespace-delimited token estimate summed over all responses.
    pub token_usage: u64,
    /// `1` for infrastructure failures, `0` otherwise.
    pub error_count: u32,
}

/// Terminal record of one session, emitted exactly once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrainingResult {
    /// Scenario the session evaluated.
    pub scenario_id: String,
    /// Session that produced this result.
    pub session_id: String,
    /// Session creation time.
    pub start_time: DateTime<Utc>,
    /// Time of the terminal transition.
    pub end_time: DateTime<Utc>,
    /// Success or failure.
    pub status: ResultStatus,
    /// Iterations consumed.
    pub attempts: u32,
    /// Copy of the session's response history.
    pub responses: Vec<ResponseRecord>,
    /// Aggregate metrics.
    pub metrics: TrainingMetrics,
    /// Failure reason, when the session failed because of an error.
    pub error: Option<String>,
}
