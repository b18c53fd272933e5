#![forbid(unsafe_code)]

//! `agent-trainer`: runs scripted evaluation scenarios against an agent.
//!
//! Loads configuration and the scenario catalog, starts one session per
//! requested scenario (bounded by `max_concurrent_sessions`), waits for
//! every session to reach a terminal status, and prints a summary.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use agent_trainer::channel::{ProcessChannelFactory, SpawnConfig};
use agent_trainer::config::GlobalConfig;
use agent_trainer::models::session::{SessionStatus, TestSession};
use agent_trainer::result_log::JsonlResultWriter;
use agent_trainer::scenario::ScenarioCatalog;
use agent_trainer::{AppError, Orchestrator, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "agent-trainer",
    about = "Automated agent training session orchestrator",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Scenario identifiers to run; every catalog scenario when omitted.
    scenarios: Vec<String>,
}

/// Outcome line for one requested scenario.
enum RunOutcome {
    Finished(TestSession),
    NotStarted { scenario_id: String, err: AppError },
    Skipped { scenario_id: String },
}

fn main() -> Result<ExitCode> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("agent-trainer bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<ExitCode> {
    // ── Load configuration ──────────────────────────────
    let config = GlobalConfig::load_from_path(&args.config)?;

    // ── Scenario catalog and result log ─────────────────
    let writer = Arc::new(JsonlResultWriter::new(config.results_dir.clone())?);
    let catalog = ScenarioCatalog::load_dir(&config.scenario_dir)?.with_result_sink(writer);

    let scenario_ids = if args.scenarios.is_empty() {
        catalog.scenario_ids()
    } else {
        args.scenarios
    };
    if scenario_ids.is_empty() {
        warn!("no scenarios to run");
        return Ok(ExitCode::SUCCESS);
    }

    // ── Build the orchestrator ──────────────────────────
    let factory = ProcessChannelFactory::new(SpawnConfig::from(&config.agent));
    let orchestrator = Orchestrator::new(
        Arc::new(catalog),
        Arc::new(factory),
        config.test_loop.clone(),
    )
    .with_session_limit(config.max_concurrent_sessions);

    // ── Run sessions, bounded by the concurrency limit ──
    let permits = Arc::new(Semaphore::new(config.max_concurrent_sessions as usize));
    let mut tasks = JoinSet::new();
    for scenario_id in scenario_ids {
        let orchestrator = orchestrator.clone();
        let permits = Arc::clone(&permits);
        tasks.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return RunOutcome::Skipped { scenario_id };
            };
            match orchestrator.start_session(&scenario_id).await {
                Ok(session) => match orchestrator.wait_for_terminal(&session.id).await {
                    Some(done) => RunOutcome::Finished(done),
                    None => RunOutcome::Finished(session),
                },
                Err(_) if orchestrator.is_shutting_down() => {
                    RunOutcome::Skipped { scenario_id }
                }
                Err(err) => RunOutcome::NotStarted { scenario_id, err },
            }
        });
    }

    // ── Collect outcomes; a second signal aborts ────────
    let mut outcomes = Vec::new();
    let mut signal = Box::pin(shutdown_signal());
    loop {
        tokio::select! {
            joined = tasks.join_next() => match joined {
                Some(Ok(outcome)) => outcomes.push(outcome),
                Some(Err(err)) => error!(%err, "session task panicked"),
                None => break,
            },
            () = &mut signal => {
                if orchestrator.is_shutting_down() {
                    error!("second shutdown signal received, aborting");
                    tasks.abort_all();
                    print_summary(&outcomes);
                    return Ok(ExitCode::FAILURE);
                }
                warn!("shutdown signal received, failing active sessions");
                permits.close();
                orchestrator.shutdown().await;
                signal = Box::pin(shutdown_signal());
            }
        }
    }

    Ok(print_summary(&outcomes))
}

fn print_summary(outcomes: &[RunOutcome]) -> ExitCode {
    let mut failures = 0usize;
    for outcome in outcomes {
        match outcome {
            RunOutcome::Finished(session) => {
                let verdict = match session.status {
                    SessionStatus::Completed => "PASS",
                    SessionStatus::Failed => {
                        failures += 1;
                        "FAIL"
                    }
                    SessionStatus::Running | SessionStatus::Paused => {
                        failures += 1;
                        "INCOMPLETE"
                    }
                };
                println!(
                    "{verdict:<10} {:<24} session={} attempts={}",
                    session.scenario.id, session.id, session.current_iteration
                );
            }
            RunOutcome::NotStarted { scenario_id, err } => {
                failures += 1;
                println!("{:<10} {scenario_id:<24} {err}", "ERROR");
            }
            RunOutcome::Skipped { scenario_id } => {
                failures += 1;
                println!("{:<10} {scenario_id:<24} not started before shutdown", "SKIPPED");
            }
        }
    }

    info!(total = outcomes.len(), failures, "training run complete");
    if failures == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
