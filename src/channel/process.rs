//! Process-backed agent channels.
//!
//! Each channel owns one spawned agent process speaking NDJSON on stdio:
//!
//! | Direction | Message                                                 |
//! |-----------|---------------------------------------------------------|
//! | out       | `{"method":"prompt/send","params":{"text":"…"}}`        |
//! | in        | `{"method":"prompt/response","params":{"text":"…"}}`    |
//!
//! Any other inbound method is skipped and logged at `DEBUG`. The first
//! stdout line after spawn is the agent's ready signal.
//!
//! Processes are started with `kill_on_drop(true)` and a cleared
//! environment restricted to [`ALLOWED_ENV_VARS`].

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::codec::ChannelCodec;
use super::{AgentChannel, AgentChannelFactory};
use crate::{AppError, Result};

/// Environment variables inherited by the spawned agent process.
pub const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "RUST_LOG",
    "USERPROFILE",
    "SystemRoot",
    "TEMP",
    "TMP",
    "USERNAME",
    "APPDATA",
    "LOCALAPPDATA",
    "COMSPEC",
];

/// Environment variable carrying the channel identity into the agent process.
pub const CHANNEL_ID_ENV: &str = "TRAINER_CHANNEL_ID";

/// Configuration for spawning agent processes.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    /// Host CLI binary.
    pub host_cli: String,
    /// Arguments passed to the host CLI.
    pub host_cli_args: Vec<String>,
    /// Maximum time to wait for the agent's ready line.
    pub startup_timeout: Duration,
}

impl From<&crate::config::AgentConfig> for SpawnConfig {
    fn from(agent: &crate::config::AgentConfig) -> Self {
        Self {
            host_cli: agent.host_cli.clone(),
            host_cli_args: agent.host_cli_args.clone(),
            startup_timeout: agent.startup_timeout(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct InboundEnvelope {
    method: String,
    #[serde(default)]
    params: serde_json::Value,
}

struct ChannelIo {
    writer: FramedWrite<ChildStdin, ChannelCodec>,
    reader: FramedRead<ChildStdout, ChannelCodec>,
}

/// Agent channel backed by a dedicated child process.
pub struct ProcessChannel {
    id: String,
    io: tokio::sync::Mutex<ChannelIo>,
    child: Mutex<Option<Child>>,
    cancel: CancellationToken,
}

impl ProcessChannel {
    /// Spawn an agent process and wait for its ready line.
    ///
    /// # Errors
    ///
    /// - `AppError::Channel("failed to spawn agent: …")` on OS spawn failure.
    /// - `AppError::Channel("startup timeout …")` if no ready line arrives in time.
    /// - `AppError::Channel("agent process exited before ready signal")` on early EOF.
    pub async fn spawn(config: &SpawnConfig, channel_id: &str) -> Result<Self> {
        let mut cmd = Command::new(&config.host_cli);
        cmd.args(&config.host_cli_args);

        cmd.env_clear();
        for &key in ALLOWED_ENV_VARS {
            if let Ok(val) = std::env::var(key) {
                cmd.env(key, val);
            }
        }
        cmd.env(CHANNEL_ID_ENV, channel_id);

        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|err| AppError::Channel(format!("failed to spawn agent: {err}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::Channel("failed to capture agent stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Channel("failed to capture agent stdout".into()))?;

        let mut reader = FramedRead::new(stdout, ChannelCodec::new());

        match tokio::time::timeout(config.startup_timeout, reader.next()).await {
            Ok(Some(Ok(line))) => {
                info!(channel_id, ready_line = line.trim(), "agent emitted ready signal");
            }
            Ok(Some(Err(err))) => {
                return Err(AppError::Channel(format!(
                    "failed to read agent ready signal: {err}"
                )));
            }
            Ok(None) => {
                return Err(AppError::Channel(
                    "agent process exited before ready signal".into(),
                ));
            }
            Err(_elapsed) => {
                child.kill().await.ok();
                return Err(AppError::Channel(format!(
                    "startup timeout: agent did not emit ready signal within {:?}",
                    config.startup_timeout
                )));
            }
        }

        Ok(Self {
            id: channel_id.to_owned(),
            io: tokio::sync::Mutex::new(ChannelIo {
                writer: FramedWrite::new(stdin, ChannelCodec::new()),
                reader,
            }),
            child: Mutex::new(Some(child)),
            cancel: CancellationToken::new(),
        })
    }

    async fn round_trip(&self, text: String) -> Result<String> {
        let mut io = self.io.lock().await;

        let outbound = json!({
            "method": "prompt/send",
            "params": { "text": text }
        });
        io.writer.send(outbound.to_string()).await?;

        loop {
            match io.reader.next().await {
                Some(Ok(line)) => {
                    if let Some(response) = parse_inbound_line(&self.id, &line)? {
                        return Ok(response);
                    }
                }
                Some(Err(err)) => return Err(err),
                None => {
                    return Err(AppError::Channel(format!(
                        "agent closed stream on channel '{}'",
                        self.id
                    )))
                }
            }
        }
    }

    fn disposed_error(&self) -> AppError {
        AppError::Channel(format!("channel '{}' disposed", self.id))
    }
}

impl AgentChannel for ProcessChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn send(&self, text: &str) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>> {
        let text = text.to_owned();
        Box::pin(async move {
            if self.cancel.is_cancelled() {
                return Err(self.disposed_error());
            }
            tokio::select! {
                () = self.cancel.cancelled() => Err(self.disposed_error()),
                result = self.round_trip(text) => result,
            }
        })
    }

    fn dispose(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();

        let child = self
            .child
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut child) = child {
            if let Err(err) = child.start_kill() {
                warn!(channel_id = self.id, %err, "failed to kill agent process");
            }
        }
        debug!(channel_id = self.id, "agent channel disposed");
    }
}

impl Drop for ProcessChannel {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Factory spawning one [`ProcessChannel`] per request.
#[derive(Debug, Clone)]
pub struct ProcessChannelFactory {
    config: SpawnConfig,
}

impl ProcessChannelFactory {
    /// Create a factory for the given spawn configuration.
    #[must_use]
    pub fn new(config: SpawnConfig) -> Self {
        Self { config }
    }
}

impl AgentChannelFactory for ProcessChannelFactory {
    fn create(
        &self,
        scoped_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn AgentChannel>>> + Send + '_>> {
        let scoped_id = scoped_id.to_owned();
        Box::pin(async move {
            let channel = ProcessChannel::spawn(&self.config, &scoped_id).await?;
            Ok(Arc::new(channel) as Arc<dyn AgentChannel>)
        })
    }
}

/// Parse one inbound NDJSON line.
///
/// Returns `Ok(Some(text))` for a `prompt/response`, `Ok(None)` for blank
/// lines and unknown methods.
///
/// # Errors
///
/// Returns `AppError::Channel` for malformed JSON or a `prompt/response`
/// without a string `params.text`.
pub fn parse_inbound_line(channel_id: &str, line: &str) -> Result<Option<String>> {
    if line.trim().is_empty() {
        return Ok(None);
    }

    let envelope: InboundEnvelope = serde_json::from_str(line)
        .map_err(|err| AppError::Channel(format!("malformed json: {err}")))?;

    if envelope.method != "prompt/response" {
        debug!(channel_id, method = envelope.method, "skipping inbound message");
        return Ok(None);
    }

    envelope
        .params
        .get("text")
        .and_then(serde_json::Value::as_str)
        .map(|text| Some(text.to_owned()))
        .ok_or_else(|| AppError::Channel("missing required field: params.text".into()))
}
