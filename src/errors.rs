//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Requested scenario identifier is not known to the scenario provider.
    ScenarioNotFound(String),
    /// Scenario catalog could not be loaded or a scenario definition is invalid.
    Scenario(String),
    /// Agent channel creation, transport, or disposal failure.
    Channel(String),
    /// Scenario provider collaborator raised an error during an iteration.
    Provider(String),
    /// An iteration did not complete within its deadline.
    Timeout(String),
    /// Session registry invariant violated (duplicate id, poisoned lock).
    Registry(String),
    /// Starting another session would exceed the concurrent session limit.
    CapacityExceeded(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::ScenarioNotFound(msg) => write!(f, "scenario not found: {msg}"),
            Self::Scenario(msg) => write!(f, "scenario: {msg}"),
            Self::Channel(msg) => write!(f, "channel: {msg}"),
            Self::Provider(msg) => write!(f, "provider: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::Registry(msg) => write!(f, "registry: {msg}"),
            Self::CapacityExceeded(msg) => write!(f, "capacity exceeded: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
