//! Global configuration parsing and validation.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{AppError, Result};

/// Environment variable that overrides [`GlobalConfig::results_dir`].
pub const RESULTS_DIR_ENV: &str = "AGENT_TRAINER_RESULTS_DIR";

/// Policy governing whether conversational state is reset between iterations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// Dispose the agent channel and allocate a fresh one every iteration.
    #[default]
    Strict,
    /// Intended to clear history while keeping agent state; currently
    /// performs the same full reset as [`IsolationLevel::Strict`].
    Moderate,
    /// Keep the same channel for the whole session.
    None,
}

/// Iteration and pacing policy for the test loop.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TestLoopConfig {
    /// Ceiling on iterations; reaching it without success fails the session.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Delay between iterations, in milliseconds.
    #[serde(default = "default_pause_interval_ms")]
    pub pause_interval_ms: u64,
    /// Per-iteration deadline, in seconds.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Channel reset policy between iterations.
    #[serde(default)]
    pub isolation_level: IsolationLevel,
}

impl TestLoopConfig {
    /// Delay applied between iterations.
    #[must_use]
    pub fn pause_interval(&self) -> Duration {
        Duration::from_millis(self.pause_interval_ms)
    }

    /// Deadline for a single iteration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Validate iteration and timeout bounds.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `max_iterations` or `timeout_seconds` is zero.
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(AppError::Config(
                "test_loop.max_iterations must be greater than zero".into(),
            ));
        }
        if self.timeout_seconds == 0 {
            return Err(AppError::Config(
                "test_loop.timeout_seconds must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

impl Default for TestLoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            pause_interval_ms: default_pause_interval_ms(),
            timeout_seconds: default_timeout_seconds(),
            isolation_level: IsolationLevel::default(),
        }
    }
}

/// Agent process settings used by the process-backed channel factory.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    /// Host CLI binary that speaks the NDJSON prompt protocol on stdio.
    pub host_cli: String,
    /// Arguments passed to the host CLI.
    #[serde(default)]
    pub host_cli_args: Vec<String>,
    /// Seconds to wait for the agent's ready line after spawning.
    #[serde(default = "default_startup_timeout_seconds")]
    pub startup_timeout_seconds: u64,
}

impl AgentConfig {
    /// Deadline applied when waiting for a spawned agent's ready line.
    #[must_use]
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_seconds)
    }
}

fn default_max_iterations() -> u32 {
    5
}

fn default_pause_interval_ms() -> u64 {
    1000
}

fn default_timeout_seconds() -> u64 {
    120
}

fn default_startup_timeout_seconds() -> u64 {
    30
}

fn default_max_concurrent_sessions() -> u32 {
    4
}

fn default_scenario_dir() -> PathBuf {
    PathBuf::from("scenarios")
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Directory scanned for `*.toml` scenario definitions.
    #[serde(default = "default_scenario_dir")]
    pub scenario_dir: PathBuf,
    /// Directory receiving the JSONL result log.
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
    /// Maximum number of running or paused sessions.
    #[serde(default = "default_max_concurrent_sessions")]
    pub max_concurrent_sessions: u32,
    /// Test loop policy.
    #[serde(default)]
    pub test_loop: TestLoopConfig,
    /// Agent process settings.
    pub agent: AgentConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// Relative `scenario_dir` and `results_dir` are resolved against the
    /// directory containing the config file, then environment overrides
    /// are applied.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        let mut config = Self::from_toml_str(&raw)?;

        if let Some(base) = path.parent() {
            config.resolve_relative_to(base);
        }
        config.apply_env_overrides();

        info!(
            scenario_dir = %config.scenario_dir.display(),
            results_dir = %config.results_dir.display(),
            "configuration loaded"
        );
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Replace `results_dir` with the value of [`RESULTS_DIR_ENV`] when set
    /// and non-empty.
    pub fn apply_env_overrides(&mut self) {
        if let Some(value) = env::var(RESULTS_DIR_ENV).ok().filter(|v| !v.is_empty()) {
            self.results_dir = PathBuf::from(value);
        }
    }

    fn resolve_relative_to(&mut self, base: &Path) {
        if self.scenario_dir.is_relative() {
            self.scenario_dir = base.join(&self.scenario_dir);
        }
        if self.results_dir.is_relative() {
            self.results_dir = base.join(&self.results_dir);
        }
    }

    fn validate(&self) -> Result<()> {
        if self.max_concurrent_sessions == 0 {
            return Err(AppError::Config(
                "max_concurrent_sessions must be greater than zero".into(),
            ));
        }

        if self.agent.host_cli.trim().is_empty() {
            return Err(AppError::Config("agent.host_cli must not be empty".into()));
        }

        self.test_loop.validate()
    }
}
