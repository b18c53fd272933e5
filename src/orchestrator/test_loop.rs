//! Per-session iterative evaluation loop.
//!
//! One loop task drives one session from its current iteration until the
//! scenario succeeds, iterations run out, or its launch episode is
//! superseded by a lifecycle operation. Each iteration:
//!
//! 1. checks the session is still `running` under this episode and below
//!    `max_iterations`;
//! 2. asks the provider for the next prompt;
//! 3. sends it over the session's channel and awaits one response;
//! 4. validates the response;
//! 5. evaluates success over the whole history;
//! 6. commits the response, or concludes the session;
//! 7. waits `pause_interval` and applies the isolation policy.
//!
//! Steps 2–5 race against the per-iteration `timeout`. Errors there fail
//! the session with `error_count = 1`; they never leave this task.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info};

use super::isolation;
use super::lifecycle::Orchestrator;
use super::recording::TerminalOutcome;
use crate::channel::AgentChannel;
use crate::models::scenario::PromptPhase;
use crate::models::session::ResponseRecord;
use crate::{AppError, Result};

/// Everything one iteration needs, captured under the registry lock.
struct IterationContext {
    scenario_id: String,
    iteration: u32,
    history: Vec<ResponseRecord>,
    channel: Arc<dyn AgentChannel>,
}

/// What a finished iteration produced.
struct IterationOutput {
    record: ResponseRecord,
    succeeded: bool,
}

enum Commit {
    Continue,
    Concluded,
    Superseded,
}

/// Drive `session_id` for as long as `episode` remains current.
pub(crate) async fn run(orchestrator: Orchestrator, session_id: String, episode: u64) {
    let max_iterations = orchestrator.config.max_iterations;
    let deadline = orchestrator.config.timeout();

    loop {
        let ctx = match precondition(&orchestrator, &session_id, episode, max_iterations) {
            Ok(Some(ctx)) => ctx,
            Ok(None) => {
                debug!("session no longer running under this episode, loop exiting");
                return;
            }
            Err(err) => {
                orchestrator
                    .fail_in_flight(&session_id, episode, false, &err)
                    .await;
                return;
            }
        };
        let iteration = ctx.iteration;

        let attempt = tokio::time::timeout(
            deadline,
            run_iteration(&orchestrator, &session_id, episode, &ctx),
        )
        .await
        .unwrap_or_else(|_| {
            Err(AppError::Timeout(format!(
                "iteration {iteration} exceeded {deadline:?}"
            )))
        });

        let output = match attempt {
            Ok(Some(output)) => output,
            Ok(None) => {
                debug!(iteration, "episode superseded mid-iteration, loop exiting");
                return;
            }
            Err(err) => {
                orchestrator
                    .fail_in_flight(&session_id, episode, true, &err)
                    .await;
                return;
            }
        };

        match commit(&orchestrator, &session_id, episode, max_iterations, output).await {
            Commit::Continue => {}
            Commit::Concluded => return,
            Commit::Superseded => {
                info!(iteration, "discarding response from superseded iteration");
                return;
            }
        }

        tokio::time::sleep(orchestrator.config.pause_interval()).await;

        match isolation::apply(&orchestrator, &session_id, episode).await {
            Ok(true) => {}
            Ok(false) => return,
            Err(err) => {
                orchestrator
                    .fail_in_flight(&session_id, episode, false, &err)
                    .await;
                return;
            }
        }
    }
}

/// Step 1. `Ok(None)` means the loop must stop quietly.
fn precondition(
    orchestrator: &Orchestrator,
    session_id: &str,
    episode: u64,
    max_iterations: u32,
) -> Result<Option<IterationContext>> {
    orchestrator
        .registry
        .with_entry(session_id, |entry| {
            if !entry.is_current(episode) || entry.session.current_iteration >= max_iterations {
                return Ok(None);
            }
            let channel = entry.channel.clone().ok_or_else(|| {
                AppError::Channel(format!("no channel bound to session {session_id}"))
            })?;
            Ok(Some(IterationContext {
                scenario_id: entry.session.scenario.id.clone(),
                iteration: entry.session.current_iteration,
                history: entry.session.responses.clone(),
                channel,
            }))
        })
        .unwrap_or(Ok(None))
}

/// Steps 2–5. `Ok(None)` means the episode was superseded before the
/// channel round trip started.
async fn run_iteration(
    orchestrator: &Orchestrator,
    session_id: &str,
    episode: u64,
    ctx: &IterationContext,
) -> Result<Option<IterationOutput>> {
    let provider = orchestrator.provider.as_ref();
    let phase = PromptPhase::for_iteration(ctx.iteration);

    let prompt = provider
        .next_prompt(&ctx.scenario_id, phase)
        .await?
        .ok_or_else(|| {
            AppError::Provider(format!(
                "no {phase:?} prompt for scenario '{}'",
                ctx.scenario_id
            ))
        })?;

    let still_current = orchestrator
        .registry
        .with_entry(session_id, |entry| entry.is_current(episode))
        .unwrap_or(false);
    if !still_current {
        return Ok(None);
    }

    debug!(
        iteration = ctx.iteration,
        prompt_id = prompt.id,
        channel_id = ctx.channel.id(),
        "sending prompt"
    );
    let started = Instant::now();
    let response = ctx.channel.send(&prompt.content).await?;
    let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    let validation_results = provider
        .validate(&ctx.scenario_id, &prompt.id, &response)
        .await?;

    let record = ResponseRecord {
        prompt_id: prompt.id,
        response,
        timestamp: Utc::now(),
        validation_results,
        latency_ms,
    };

    let mut history = ctx.history.clone();
    history.push(record.clone());
    let succeeded = provider
        .evaluate_success(&ctx.scenario_id, &history)
        .await?;

    Ok(Some(IterationOutput { record, succeeded }))
}

/// Step 6: append the response and either continue or conclude.
async fn commit(
    orchestrator: &Orchestrator,
    session_id: &str,
    episode: u64,
    max_iterations: u32,
    output: IterationOutput,
) -> Commit {
    let committed = orchestrator
        .registry
        .with_entry(session_id, |entry| {
            if !entry.is_current(episode) {
                return None;
            }
            entry.session.responses.push(output.record);
            entry.session.current_iteration += 1;

            let outcome = if output.succeeded {
                TerminalOutcome::Succeeded
            } else if entry.session.current_iteration >= max_iterations {
                TerminalOutcome::Exhausted
            } else {
                return Some(None);
            };
            entry
                .finish(outcome.status())
                .map(|(snapshot, channel)| Some((snapshot, channel, outcome)))
        })
        .flatten();

    match committed {
        None => Commit::Superseded,
        Some(None) => {
            debug!(succeeded = false, "iteration committed");
            Commit::Continue
        }
        Some(Some((snapshot, channel, outcome))) => {
            orchestrator.conclude(snapshot, channel, outcome).await;
            Commit::Concluded
        }
    }
}
