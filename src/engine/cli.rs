//! Host-CLI engine adapter.
//!
//! Runs each invocation as a child process speaking NDJSON on stdio:
//!
//! | Direction      | Line                                                   |
//! |----------------|--------------------------------------------------------|
//! | bridge → child | `{"type":"invoke", ...InvocationRequest}` (first line) |
//! | child → bridge | any [`EngineEvent`] (`system`, `tool_use`, ...)        |
//! | child → bridge | `{"type":"decision_request","id":..., ...}`            |
//! | bridge → child | `{"type":"decision","id":...,"behavior":...}`          |
//! | bridge → child | `{"type":"interrupt"}` when the session is interrupted |
//!
//! The child is spawned with `kill_on_drop(true)` and a cleared environment
//! plus [`ALLOWED_ENV_VARS`]. Interrupts are cooperative: the child decides
//! how fast to wind down. When the session closes, the child gets the same
//! `interrupt` line and is killed if it is still running after the kill
//! grace period. Exiting with a failure status before emitting a `result`
//! event is reported as an engine error.

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::engine::{DecisionRequest, Engine, EngineContext, EngineEvent, InvocationRequest};
use crate::framer::codec::{FrameCodec, Segment};
use crate::{AppError, Result};

// ── Environment allowlist ────────────────────────────────────────────────────

/// Environment variables inherited by the engine process.
///
/// Everything else is stripped via `env_clear()`.
pub const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "LANG",
    "TERM",
    "TMPDIR",
    "RUST_LOG",
    "ANTHROPIC_API_KEY",
    "XDG_CONFIG_HOME",
];

/// How long a closing session's child may keep running before it is killed.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(5);

/// Environment variable carrying the bridge session id into the child.
pub const SESSION_ENV_VAR: &str = "AGENT_BRIDGE_SESSION_ID";

/// A decision point as it appears on the child's stdout.
#[derive(Debug, Deserialize)]
struct WireDecisionRequest {
    id: String,
    #[serde(flatten)]
    request: DecisionRequest,
}

/// Engine that spawns a host CLI per invocation.
#[derive(Debug, Clone)]
pub struct CliEngine {
    host_cli: String,
    host_cli_args: Vec<String>,
    max_line_bytes: usize,
    kill_grace: Duration,
}

impl CliEngine {
    /// Create an engine running `host_cli` with `host_cli_args`.
    #[must_use]
    pub fn new(host_cli: String, host_cli_args: Vec<String>, max_line_bytes: usize) -> Self {
        Self {
            host_cli,
            host_cli_args,
            max_line_bytes,
            kill_grace: DEFAULT_KILL_GRACE,
        }
    }

    /// Override the grace period between session close and child kill.
    #[must_use]
    pub fn with_kill_grace(mut self, kill_grace: Duration) -> Self {
        self.kill_grace = kill_grace;
        self
    }

    /// Create an engine from the bridge configuration.
    #[must_use]
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(
            config.host_cli.clone(),
            config.host_cli_args.clone(),
            config.max_line_bytes,
        )
    }

    fn spawn(&self, request: &InvocationRequest) -> Result<Child> {
        let mut cmd = Command::new(&self.host_cli);
        cmd.args(&self.host_cli_args);

        cmd.env_clear();
        for &key in ALLOWED_ENV_VARS {
            if let Ok(val) = std::env::var(key) {
                cmd.env(key, val);
            }
        }
        cmd.env(SESSION_ENV_VAR, &request.session_id);

        cmd.current_dir(&request.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        cmd.spawn().map_err(|err| {
            AppError::Engine(format!("failed to spawn '{}': {err}", self.host_cli))
        })
    }

    async fn run(&self, request: InvocationRequest, ctx: EngineContext) -> Result<()> {
        let session_id = request.session_id.clone();
        let mut child = self.spawn(&request)?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::Engine("failed to capture engine stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Engine("failed to capture engine stdout".into()))?;

        info!(session_id, pid = child.id(), "engine process spawned");

        let (stdin_tx, stdin_rx) = mpsc::unbounded_channel::<Value>();
        let stdin_task = tokio::spawn(pump_stdin(session_id.clone(), stdin, stdin_rx));

        let mut invoke = serde_json::to_value(&request)
            .map_err(|e| AppError::Engine(format!("failed to serialise invocation: {e}")))?;
        invoke["type"] = Value::String("invoke".into());
        // Receiver lives until every sender is dropped below.
        let _ = stdin_tx.send(invoke);

        let mut framed = FramedRead::new(stdout, FrameCodec::with_max_length(self.max_line_bytes));
        let mut decisions = JoinSet::new();
        let mut interrupted = false;
        let mut closing = false;
        let mut killed = false;
        let kill_deadline = tokio::time::sleep(self.kill_grace);
        tokio::pin!(kill_deadline);
        let mut saw_result = false;

        loop {
            tokio::select! {
                biased;

                () = ctx.cancellation().cancelled(), if !interrupted => {
                    interrupted = true;
                    debug!(session_id, "engine: forwarding interrupt");
                    let _ = stdin_tx.send(json!({ "type": "interrupt" }));
                }

                () = ctx.closing().cancelled(), if !closing => {
                    closing = true;
                    kill_deadline.as_mut().reset(Instant::now() + self.kill_grace);
                }

                () = &mut kill_deadline, if closing && !killed => {
                    killed = true;
                    warn!(session_id, "engine: still running after close, killing");
                    if let Err(e) = child.start_kill() {
                        warn!(session_id, error = %e, "engine: kill failed");
                    }
                }

                Some(_) = decisions.join_next(), if !decisions.is_empty() => {}

                item = framed.next() => {
                    match item {
                        None => break,
                        Some(Err(e)) => {
                            warn!(session_id, error = %e, "engine: stdout read failed");
                            break;
                        }
                        Some(Ok(Segment::Line(line))) => {
                            saw_result |=
                                handle_line(&session_id, &line, &ctx, &stdin_tx, &mut decisions);
                        }
                        Some(Ok(segment)) => {
                            warn!(session_id, ?segment, "engine: skipping unreadable stdout line");
                        }
                    }
                }
            }
        }

        drop(stdin_tx);
        let status = child
            .wait()
            .await
            .map_err(|e| AppError::Engine(format!("failed to wait for engine: {e}")))?;
        decisions.abort_all();
        stdin_task.abort();

        info!(session_id, %status, interrupted, killed, "engine process exited");

        if !status.success() && !saw_result {
            return Err(AppError::Engine(format!("engine exited with {status}")));
        }
        Ok(())
    }
}

impl Engine for CliEngine {
    fn invoke(
        &self,
        request: InvocationRequest,
        ctx: EngineContext,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(self.run(request, ctx))
    }
}

// ── Private helpers ───────────────────────────────────────────────────────────

/// Route one stdout line; returns `true` if it was the `result` event.
fn handle_line(
    session_id: &str,
    line: &str,
    ctx: &EngineContext,
    stdin_tx: &mpsc::UnboundedSender<Value>,
    decisions: &mut JoinSet<()>,
) -> bool {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return false;
    }

    let value: Value = match serde_json::from_str(trimmed) {
        Ok(value) => value,
        Err(e) => {
            warn!(session_id, error = %e, raw_line = %trimmed, "engine: malformed json, skipping");
            return false;
        }
    };

    if value.get("type").and_then(Value::as_str) == Some("decision_request") {
        match serde_json::from_value::<WireDecisionRequest>(value) {
            Ok(wire) => {
                // Registration happens here, in stdout order; only the wait is deferred.
                let pending = ctx.request_decision(wire.request);
                let tx = stdin_tx.clone();
                let id = wire.id;
                decisions.spawn(async move {
                    let decision = pending.await;
                    let mut reply = serde_json::to_value(&decision).unwrap_or_else(
                        |_| json!({ "behavior": "deny", "message": "unserialisable decision" }),
                    );
                    reply["type"] = Value::String("decision".into());
                    reply["id"] = Value::String(id);
                    let _ = tx.send(reply);
                });
            }
            Err(e) => warn!(session_id, error = %e, "engine: invalid decision_request, skipping"),
        }
        return false;
    }

    match serde_json::from_value::<EngineEvent>(value) {
        Ok(event) => {
            let is_result = matches!(event, EngineEvent::Result(_));
            ctx.emit(event);
            is_result
        }
        Err(e) => {
            debug!(session_id, error = %e, "engine: skipping unknown stdout line");
            false
        }
    }
}

/// Write queued JSON values to the child's stdin, one per line.
async fn pump_stdin(session_id: String, mut stdin: ChildStdin, mut rx: mpsc::UnboundedReceiver<Value>) {
    while let Some(value) = rx.recv().await {
        let mut bytes = match serde_json::to_vec(&value) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(session_id, error = %e, "engine: failed to serialise stdin message");
                continue;
            }
        };
        bytes.push(b'\n');

        if let Err(e) = stdin.write_all(&bytes).await {
            debug!(session_id, error = %e, "engine: stdin closed");
            break;
        }
        let _ = stdin.flush().await;
    }
}
