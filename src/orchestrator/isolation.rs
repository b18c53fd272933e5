//! Between-iteration channel recycling.
//!
//! This is the only place where per-iteration channel lifetime is decided.
//! It runs after every non-terminal iteration and never after a terminal
//! transition.

use std::sync::Arc;

use tracing::debug;

use super::lifecycle::{channel_scope, Orchestrator};
use crate::config::IsolationLevel;
use crate::Result;

/// Whether `level` replaces the agent channel between iterations.
///
/// `Moderate` is documented as "clear history, keep agent state" but has
/// no partial-reset primitive to use, so it performs the full reset.
#[must_use]
pub fn requires_reset(level: IsolationLevel) -> bool {
    match level {
        IsolationLevel::Strict | IsolationLevel::Moderate => true,
        IsolationLevel::None => false,
    }
}

/// Apply the configured isolation level to one session.
///
/// Returns `Ok(false)` when the loop's episode was superseded (paused,
/// ended, failed, or removed) and the loop must stop without committing.
///
/// # Errors
///
/// Returns `AppError::Channel` if the replacement channel cannot be created,
/// or `AppError::Timeout` if creating it exceeds the iteration deadline.
pub(crate) async fn apply(
    orchestrator: &Orchestrator,
    session_id: &str,
    episode: u64,
) -> Result<bool> {
    let level = orchestrator.config.isolation_level;

    if !requires_reset(level) {
        return Ok(orchestrator
            .registry
            .with_entry(session_id, |entry| entry.is_current(episode))
            .unwrap_or(false));
    }

    let Some((old, scope)) = orchestrator
        .registry
        .with_entry(session_id, |entry| {
            if !entry.is_current(episode) {
                return None;
            }
            let scope = channel_scope(&entry.session.id, entry.channel_seq);
            entry.channel_seq += 1;
            Some((entry.take_channel(), scope))
        })
        .flatten()
    else {
        return Ok(false);
    };

    if let Some(old) = old {
        debug!(
            session_id,
            channel_id = old.id(),
            ?level,
            "disposing channel for isolation reset"
        );
        old.dispose();
    }

    let fresh = orchestrator.create_channel(&scope).await?;

    let installed = orchestrator
        .registry
        .with_entry(session_id, |entry| {
            if !entry.is_current(episode) {
                return false;
            }
            entry.bind_channel(Arc::clone(&fresh));
            true
        })
        .unwrap_or(false);

    if installed {
        debug!(session_id, channel_id = fresh.id(), "isolation reset complete");
    } else {
        fresh.dispose();
    }
    Ok(installed)
}
