//! In-memory session registry.
//!
//! The registry is the single source of truth for which sessions exist and
//! in what state. Every session loop runs on its own task, so the map is
//! guarded by a [`std::sync::Mutex`] that is only ever held for short,
//! non-suspending critical sections. Callers never observe a partially
//! built session: entries are inserted only after the scenario has been
//! resolved and the first agent channel created.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use crate::channel::AgentChannel;
use crate::models::session::{SessionStatus, TestSession};
use crate::{AppError, Result};

/// Registry record for one session: the observable session plus the
/// resources the orchestrator owns on its behalf.
pub struct SessionEntry {
    pub(crate) session: TestSession,
    pub(crate) channel: Option<Arc<dyn AgentChannel>>,
    /// Bumped on every loop launch and every transition out of `running`;
    /// a loop only commits while its launch episode is current.
    pub(crate) episode: u64,
    /// Number of channels allocated so far; used to scope channel ids.
    pub(crate) channel_seq: u32,
    status_tx: watch::Sender<SessionStatus>,
}

impl SessionEntry {
    /// Wrap a fully initialised session and its first channel.
    #[must_use]
    pub fn new(mut session: TestSession, channel: Arc<dyn AgentChannel>) -> Self {
        session.channel_id = Some(channel.id().to_owned());
        let (status_tx, _) = watch::channel(session.status);
        Self {
            session,
            channel: Some(channel),
            episode: 0,
            channel_seq: 1,
            status_tx,
        }
    }

    /// The wrapped session.
    #[must_use]
    pub fn session(&self) -> &TestSession {
        &self.session
    }

    /// Whether a loop launched for `episode` may still drive this session.
    pub(crate) fn is_current(&self, episode: u64) -> bool {
        self.episode == episode && self.session.status == SessionStatus::Running
    }

    /// Detach the bound channel, if any.
    pub(crate) fn take_channel(&mut self) -> Option<Arc<dyn AgentChannel>> {
        self.session.channel_id = None;
        self.channel.take()
    }

    /// Bind `channel` as the session's only channel.
    pub(crate) fn bind_channel(&mut self, channel: Arc<dyn AgentChannel>) {
        self.session.channel_id = Some(channel.id().to_owned());
        self.channel = Some(channel);
    }

    /// Move into a terminal status, stamping `end_time` and releasing the
    /// channel. Returns `None` if the session is already terminal.
    pub(crate) fn finish(
        &mut self,
        status: SessionStatus,
    ) -> Option<(TestSession, Option<Arc<dyn AgentChannel>>)> {
        if !status.is_terminal() || !self.session.can_transition_to(status) {
            return None;
        }
        self.session.status = status;
        self.session.end_time = Some(chrono::Utc::now());
        self.episode += 1;
        let channel = self.take_channel();
        Some((self.session.clone(), channel))
    }

    /// Publish the current status to subscribers.
    pub(crate) fn publish(&self) {
        self.status_tx.send_replace(self.session.status);
    }
}

/// Map from session id to [`SessionEntry`].
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, SessionEntry>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SessionEntry>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a new entry.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Registry` if an entry with the same id exists.
    pub fn put(&self, entry: SessionEntry) -> Result<()> {
        self.insert(entry, None)
    }

    /// Insert a new entry unless doing so would exceed `limit` active sessions.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Registry` on a duplicate id, or
    /// `AppError::CapacityExceeded` when the active count is at `limit`.
    pub fn put_within_limit(&self, entry: SessionEntry, limit: u32) -> Result<()> {
        self.insert(entry, Some(limit))
    }

    fn insert(&self, entry: SessionEntry, limit: Option<u32>) -> Result<()> {
        let mut sessions = self.lock();
        let id = entry.session.id.clone();
        if sessions.contains_key(&id) {
            return Err(AppError::Registry(format!("session {id} already registered")));
        }
        if let Some(limit) = limit {
            let active = count_active(&sessions);
            if active >= limit as usize {
                return Err(AppError::CapacityExceeded(format!(
                    "concurrent session limit reached ({active}/{limit})"
                )));
            }
        }
        sessions.insert(id, entry);
        Ok(())
    }

    /// Snapshot of one session.
    #[must_use]
    pub fn get(&self, session_id: &str) -> Option<TestSession> {
        self.lock().get(session_id).map(|e| e.session.clone())
    }

    /// Remove an entry, returning its final snapshot and any bound channel.
    pub fn remove(
        &self,
        session_id: &str,
    ) -> Option<(TestSession, Option<Arc<dyn AgentChannel>>)> {
        self.lock().remove(session_id).map(|mut e| {
            let channel = e.take_channel();
            (e.session, channel)
        })
    }

    /// Snapshots of every session, oldest first.
    #[must_use]
    pub fn list_all(&self) -> Vec<TestSession> {
        let mut all: Vec<TestSession> = self.lock().values().map(|e| e.session.clone()).collect();
        all.sort_by_key(|s| s.start_time);
        all
    }

    /// Snapshots of running or paused sessions, oldest first.
    #[must_use]
    pub fn list_active(&self) -> Vec<TestSession> {
        let mut active: Vec<TestSession> = self
            .lock()
            .values()
            .filter(|e| e.session.status.is_active())
            .map(|e| e.session.clone())
            .collect();
        active.sort_by_key(|s| s.start_time);
        active
    }

    /// Number of running or paused sessions.
    #[must_use]
    pub fn count_active(&self) -> usize {
        count_active(&self.lock())
    }

    /// Watch the status of one session.
    ///
    /// Terminal statuses are published only after the session's result has
    /// been handed to the scenario provider.
    #[must_use]
    pub fn subscribe(&self, session_id: &str) -> Option<watch::Receiver<SessionStatus>> {
        self.lock().get(session_id).map(|e| e.status_tx.subscribe())
    }

    /// Run `f` against one entry under the registry lock.
    pub(crate) fn with_entry<R>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut SessionEntry) -> R,
    ) -> Option<R> {
        self.lock().get_mut(session_id).map(f)
    }
}

fn count_active(sessions: &HashMap<String, SessionEntry>) -> usize {
    sessions
        .values()
        .filter(|e| e.session.status.is_active())
        .count()
}
