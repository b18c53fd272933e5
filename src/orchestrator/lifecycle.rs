//! Session lifecycle controller: start, pause, resume, end, fail.
//!
//! [`Orchestrator`] is the public surface of the crate and the only entry
//! point into the test loop. Lifecycle operations on unknown or terminal
//! sessions are silent no-ops returning `None`, so duplicate or late
//! control messages are tolerated.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use super::recording::{self, TerminalOutcome};
use super::registry::{SessionEntry, SessionRegistry};
use super::test_loop;
use crate::channel::{AgentChannel, AgentChannelFactory};
use crate::config::TestLoopConfig;
use crate::models::session::{SessionStatus, TestSession};
use crate::scenario::ScenarioProvider;
use crate::{AppError, Result};

/// Failure reason recorded for sessions cut short by [`Orchestrator::shutdown`].
pub const SHUTDOWN_REASON: &str = "shutdown";

fn shutting_down() -> AppError {
    AppError::Registry("orchestrator is shutting down".into())
}

/// Scoped identifier for the `seq`-th channel of a session.
#[must_use]
pub fn channel_scope(session_id: &str, seq: u32) -> String {
    format!("{session_id}/ch-{seq}")
}

/// Schedules, isolates, bounds, and resolves test sessions.
///
/// Cheap to clone; clones share the same registry and collaborators.
#[derive(Clone)]
pub struct Orchestrator {
    pub(crate) registry: Arc<SessionRegistry>,
    pub(crate) provider: Arc<dyn ScenarioProvider>,
    pub(crate) factory: Arc<dyn AgentChannelFactory>,
    pub(crate) config: Arc<TestLoopConfig>,
    session_limit: Option<u32>,
    draining: CancellationToken,
}

impl Orchestrator {
    /// Construct an orchestrator over the given collaborators.
    #[must_use]
    pub fn new(
        provider: Arc<dyn ScenarioProvider>,
        factory: Arc<dyn AgentChannelFactory>,
        config: TestLoopConfig,
    ) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new()),
            provider,
            factory,
            config: Arc::new(config),
            session_limit: None,
            draining: CancellationToken::new(),
        }
    }

    /// Cap the number of running or paused sessions.
    #[must_use]
    pub fn with_session_limit(mut self, limit: u32) -> Self {
        self.session_limit = Some(limit);
        self
    }

    /// Start a session for `scenario_id` and launch its test loop.
    ///
    /// Returns as soon as the session is registered; the loop proceeds on
    /// its own task.
    ///
    /// # Errors
    ///
    /// - `AppError::ScenarioNotFound` if the provider does not know the scenario.
    /// - `AppError::CapacityExceeded` if the session limit is reached.
    /// - `AppError::Channel` if the first agent channel cannot be created.
    /// - `AppError::Timeout` if channel creation exceeds the iteration deadline.
    /// - `AppError::Registry` once [`shutdown`](Self::shutdown) has begun.
    ///
    /// No session is registered when an error is returned. A session whose
    /// registration races a shutdown is returned already failed.
    pub async fn start_session(&self, scenario_id: &str) -> Result<TestSession> {
        self.start_inner(scenario_id)
            .instrument(info_span!("start_session", scenario_id))
            .await
    }

    async fn start_inner(&self, scenario_id: &str) -> Result<TestSession> {
        if self.is_shutting_down() {
            return Err(shutting_down());
        }
        let scenario = self
            .provider
            .resolve(scenario_id)
            .await?
            .ok_or_else(|| AppError::ScenarioNotFound(scenario_id.to_owned()))?;

        if let Some(limit) = self.session_limit {
            let active = self.registry.count_active();
            if active >= limit as usize {
                return Err(AppError::CapacityExceeded(format!(
                    "concurrent session limit reached ({active}/{limit})"
                )));
            }
        }

        let session = TestSession::new(scenario);
        let scope = channel_scope(&session.id, 0);
        let channel = tokio::select! {
            biased;
            () = self.draining.cancelled() => return Err(shutting_down()),
            created = self.create_channel(&scope) => created?,
        };

        let entry = SessionEntry::new(session, Arc::clone(&channel));
        let snapshot = entry.session.clone();
        let episode = entry.episode;

        let inserted = match self.session_limit {
            Some(limit) => self.registry.put_within_limit(entry, limit),
            None => self.registry.put(entry),
        };
        if let Err(err) = inserted {
            channel.dispose();
            return Err(err);
        }

        // Registered after the shutdown sweep listed active sessions.
        if self.is_shutting_down() {
            let failed = self.fail_session(&snapshot.id, SHUTDOWN_REASON).await;
            return Ok(failed.unwrap_or(snapshot));
        }

        info!(session_id = snapshot.id, "session started");
        self.launch(&snapshot.id, episode);
        Ok(snapshot)
    }

    /// Stop accepting sessions and fail every running or paused one with
    /// reason `shutdown`.
    ///
    /// Starts still waiting on their first channel are abandoned. Returns
    /// the sessions failed by this call.
    pub async fn shutdown(&self) -> Vec<TestSession> {
        self.draining.cancel();
        let mut failed = Vec::new();
        for session in self.registry.list_active() {
            if let Some(done) = self.fail_session(&session.id, SHUTDOWN_REASON).await {
                failed.push(done);
            }
        }
        info!(failed = failed.len(), "orchestrator drained");
        failed
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.draining.is_cancelled()
    }

    /// Create a channel, bounded by the per-iteration deadline.
    pub(crate) async fn create_channel(&self, scope: &str) -> Result<Arc<dyn AgentChannel>> {
        let deadline = self.config.timeout();
        tokio::time::timeout(deadline, self.factory.create(scope))
            .await
            .map_err(|_| {
                AppError::Timeout(format!(
                    "channel {scope} not ready within {}s",
                    deadline.as_secs()
                ))
            })?
    }

    /// Pause a running session and dispose its channel.
    ///
    /// An iteration already awaiting the channel is not interrupted; it
    /// fails fast against the disposed channel and commits nothing.
    pub fn pause_session(&self, session_id: &str) -> Option<TestSession> {
        let (snapshot, channel) = self
            .registry
            .with_entry(session_id, |entry| {
                if !entry.session.can_transition_to(SessionStatus::Paused) {
                    return None;
                }
                entry.session.status = SessionStatus::Paused;
                entry.episode += 1;
                let channel = entry.take_channel();
                entry.publish();
                Some((entry.session.clone(), channel))
            })
            .flatten()?;

        if let Some(channel) = channel {
            channel.dispose();
        }
        info!(session_id, iteration = snapshot.current_iteration, "session paused");
        Some(snapshot)
    }

    /// Resume a paused session on a fresh channel from its current iteration.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Channel` if the new channel cannot be created, or
    /// `AppError::Timeout` if creation exceeds the iteration deadline; the
    /// session stays paused either way.
    pub async fn resume_session(&self, session_id: &str) -> Result<Option<TestSession>> {
        let Some(scope) = self
            .registry
            .with_entry(session_id, |entry| {
                if entry.session.status != SessionStatus::Paused {
                    return None;
                }
                let scope = channel_scope(&entry.session.id, entry.channel_seq);
                entry.channel_seq += 1;
                Some(scope)
            })
            .flatten()
        else {
            return Ok(None);
        };

        let channel = self.create_channel(&scope).await?;

        let resumed = self
            .registry
            .with_entry(session_id, |entry| {
                if entry.session.status != SessionStatus::Paused {
                    return None;
                }
                entry.bind_channel(Arc::clone(&channel));
                entry.session.status = SessionStatus::Running;
                entry.episode += 1;
                entry.publish();
                Some((entry.session.clone(), entry.episode))
            })
            .flatten();

        let Some((snapshot, episode)) = resumed else {
            // Ended, failed, removed, or resumed by someone else meanwhile.
            channel.dispose();
            return Ok(None);
        };

        info!(session_id, iteration = snapshot.current_iteration, "session resumed");
        self.launch(session_id, episode);
        Ok(Some(snapshot))
    }

    /// Force a session into `completed` and record a success result.
    pub async fn end_session(&self, session_id: &str) -> Option<TestSession> {
        self.terminate(session_id, TerminalOutcome::Ended).await
    }

    /// Force a session into `failed` and record a failure result with
    /// `error_count = 1`.
    pub async fn fail_session(&self, session_id: &str, error: &str) -> Option<TestSession> {
        self.terminate(session_id, TerminalOutcome::Errored(error.to_owned()))
            .await
    }

    /// Snapshot of one session.
    #[must_use]
    pub fn get_session(&self, session_id: &str) -> Option<TestSession> {
        self.registry.get(session_id)
    }

    /// Snapshots of every known session.
    #[must_use]
    pub fn list_all_sessions(&self) -> Vec<TestSession> {
        self.registry.list_all()
    }

    /// Snapshots of running or paused sessions.
    #[must_use]
    pub fn list_active_sessions(&self) -> Vec<TestSession> {
        self.registry.list_active()
    }

    /// Watch status changes of one session.
    #[must_use]
    pub fn subscribe(
        &self,
        session_id: &str,
    ) -> Option<tokio::sync::watch::Receiver<SessionStatus>> {
        self.registry.subscribe(session_id)
    }

    /// Wait until a session is terminal and its result has been recorded.
    ///
    /// Returns `None` for unknown sessions.
    pub async fn wait_for_terminal(&self, session_id: &str) -> Option<TestSession> {
        let mut rx = self.registry.subscribe(session_id)?;
        if rx.wait_for(|status| status.is_terminal()).await.is_err() {
            warn!(session_id, "session removed while waiting for completion");
        }
        self.registry.get(session_id)
    }

    /// Drop a terminal session from the registry.
    ///
    /// Active sessions are left untouched and `None` is returned.
    pub fn remove_session(&self, session_id: &str) -> Option<TestSession> {
        let terminal = self
            .registry
            .get(session_id)
            .is_some_and(|s| s.status.is_terminal());
        if !terminal {
            return None;
        }
        let (session, channel) = self.registry.remove(session_id)?;
        if let Some(channel) = channel {
            channel.dispose();
        }
        Some(session)
    }

    fn launch(&self, session_id: &str, episode: u64) {
        let orchestrator = self.clone();
        let id = session_id.to_owned();
        tokio::spawn(
            test_loop::run(orchestrator, id, episode)
                .instrument(info_span!("test_loop", session_id, episode)),
        );
    }

    /// Externally forced terminal transition from `running` or `paused`.
    async fn terminate(&self, session_id: &str, outcome: TerminalOutcome) -> Option<TestSession> {
        let status = outcome.status();
        let (snapshot, channel) = self
            .registry
            .with_entry(session_id, |entry| entry.finish(status))
            .flatten()?;
        Some(self.conclude(snapshot, channel, outcome).await)
    }

    /// Loop-driven failure for an iteration that was in flight.
    ///
    /// The interrupted iteration counts as consumed. Does nothing if the
    /// loop's episode is no longer current.
    pub(crate) async fn fail_in_flight(
        &self,
        session_id: &str,
        episode: u64,
        consumed: bool,
        err: &AppError,
    ) {
        let finished = self
            .registry
            .with_entry(session_id, |entry| {
                if !entry.is_current(episode) {
                    return None;
                }
                if consumed {
                    entry.session.current_iteration += 1;
                }
                entry.finish(SessionStatus::Failed)
            })
            .flatten();

        match finished {
            Some((snapshot, channel)) => {
                self.conclude(snapshot, channel, TerminalOutcome::Errored(err.to_string()))
                    .await;
            }
            None => {
                info!(session_id, %err, "discarding error from superseded iteration");
            }
        }
    }

    /// Dispose the released channel, record the result, then publish the
    /// terminal status.
    pub(crate) async fn conclude(
        &self,
        snapshot: TestSession,
        channel: Option<Arc<dyn AgentChannel>>,
        outcome: TerminalOutcome,
    ) -> TestSession {
        if let Some(channel) = channel {
            channel.dispose();
        }

        match &outcome {
            TerminalOutcome::Errored(reason) => warn!(
                session_id = snapshot.id,
                attempts = snapshot.current_iteration,
                reason,
                "session failed"
            ),
            other => info!(
                session_id = snapshot.id,
                attempts = snapshot.current_iteration,
                outcome = ?other,
                "session finished"
            ),
        }

        let result = recording::build_result(&snapshot, &outcome);
        recording::record(self.provider.as_ref(), result).await;

        self.registry
            .with_entry(&snapshot.id, |entry| entry.publish());
        snapshot
    }
}
