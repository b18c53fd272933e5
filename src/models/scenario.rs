//! Scenario definitions and the values exchanged with a scenario provider.

use serde::{Deserialize, Serialize};

/// Conversation phase used when asking the provider for the next prompt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PromptPhase {
    /// First iteration of a session.
    Initial,
    /// Any iteration after the first.
    FollowUp,
}

impl PromptPhase {
    /// Phase for a zero-based iteration index.
    #[must_use]
    pub fn for_iteration(iteration: u32) -> Self {
        if iteration == 0 {
            Self::Initial
        } else {
            Self::FollowUp
        }
    }
}

/// A prompt issued to the agent for one iteration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Prompt {
    /// Identifier used to correlate the response with its validation rules.
    pub id: String,
    /// Phase this prompt belongs to.
    pub phase: PromptPhase,
    /// Text sent over the agent channel.
    pub content: String,
}

/// Outcome of a single validation rule applied to one response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationResult {
    /// Name of the rule that produced this result.
    pub rule: String,
    /// Whether the response satisfied the rule.
    pub passed: bool,
    /// Optional human-readable explanation.
    pub message: Option<String>,
}

impl ValidationResult {
    /// A passing result for `rule`.
    #[must_use]
    pub fn pass(rule: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            passed: true,
            message: None,
        }
    }

    /// A failing result for `rule` with an explanation.
    #[must_use]
    pub fn fail(rule: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            passed: false,
            message: Some(message.into()),
        }
    }
}

/// Immutable definition of an evaluation exercise.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Scenario {
    /// Unique scenario identifier.
    pub id: String,
    /// Short display name.
    pub name: String,
    /// Free-form description of what the scenario exercises.
    #[serde(default)]
    pub description: String,
}
