//! Session broker.
//!
//! Owns the session registry (session id → [`Session`]) and the table of
//! live connections, and routes each inbound record by session id. Routing
//! never depends on which connection a record arrived on: a session started
//! on one connection can be answered, interrupted, or closed from another.
//!
//! | Inbound kind            | Known id                    | Unknown id        |
//! |-------------------------|-----------------------------|-------------------|
//! | `start_session`         | `error` (`session_exists`)  | create + start    |
//! | `resume_session`        | `error` (`session_exists`)  | create + resume   |
//! | `send_prompt`           | forwarded                   | dropped (logged)  |
//! | `interrupt`             | forwarded                   | dropped (logged)  |
//! | `permission_response`   | forwarded                   | dropped (logged)  |
//! | `question_response`     | forwarded                   | dropped (logged)  |
//! | `close_session`         | closed + unregistered       | `error`           |

pub mod listener;

pub use listener::BrokerHandle;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::BridgeConfig;
use crate::engine::{Engine, EngineOptions};
use crate::framer::reader::{Frame, FrameReader};
use crate::framer::writer::{run_writer, OutboundSink};
use crate::protocol::{Inbound, InboundBody, Outbound, SessionStatus};
use crate::session::{Session, StartConfig};
use crate::{AppError, Result};

/// Broker settings resolved from [`BridgeConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerSettings {
    /// Rendezvous socket path.
    pub socket_path: PathBuf,
    /// Close sessions whose originating connection drops.
    pub close_on_disconnect: bool,
    /// Longest accepted inbound line.
    pub max_line_bytes: usize,
}

impl BrokerSettings {
    /// Resolve settings from `config`, including the socket path precedence.
    #[must_use]
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            socket_path: config.socket_path(),
            close_on_disconnect: config.close_on_disconnect,
            max_line_bytes: config.max_line_bytes,
        }
    }
}

/// One attached front-end.
struct Connection {
    sink: OutboundSink,
    cancel: CancellationToken,
}

/// Connection acceptor and session registry.
pub struct Broker {
    settings: BrokerSettings,
    engine: Arc<dyn Engine>,
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    connections: Mutex<HashMap<u64, Connection>>,
    next_conn: AtomicU64,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl Broker {
    /// Create a broker that runs invocations on `engine`.
    pub fn new(settings: BrokerSettings, engine: Arc<dyn Engine>) -> Arc<Self> {
        Arc::new(Self {
            settings,
            engine,
            sessions: Mutex::new(HashMap::new()),
            connections: Mutex::new(HashMap::new()),
            next_conn: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        })
    }

    /// Settings the broker was built with.
    #[must_use]
    pub fn settings(&self) -> &BrokerSettings {
        &self.settings
    }

    /// Look up a live session.
    pub async fn session(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.lock().await.get(session_id).cloned()
    }

    /// Identifiers of all registered sessions.
    pub async fn session_ids(&self) -> Vec<String> {
        self.sessions.lock().await.keys().cloned().collect()
    }

    /// Number of attached connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.lock().await.len()
    }

    /// Send `event` to every attached front-end, whatever session it
    /// concerns. Returns the number of connections it was queued for.
    pub async fn broadcast(&self, event: Outbound) -> usize {
        let connections = self.connections.lock().await;
        connections
            .values()
            .filter(|conn| conn.sink.send(event.clone()).is_ok())
            .count()
    }

    /// Serve one connection until EOF, I/O failure, or shutdown.
    ///
    /// Works over any byte stream pair; the socket listener and in-memory
    /// pipes go through the same path.
    pub async fn serve_connection<R, W>(self: Arc<Self>, reader: R, writer: W)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let conn_id = self.next_conn.fetch_add(1, Ordering::SeqCst) + 1;
        let span = info_span!("connection", conn_id);
        async move {
            let (sink, msg_rx) = mpsc::unbounded_channel();
            let cancel = self.shutdown.child_token();
            self.connections.lock().await.insert(
                conn_id,
                Connection {
                    sink: sink.clone(),
                    cancel: cancel.clone(),
                },
            );
            info!("connection opened");

            let writer_task = tokio::spawn(
                run_writer(conn_id, writer, msg_rx, cancel.clone()).in_current_span(),
            );
            let mut frames = FrameReader::new(reader, self.settings.max_line_bytes);

            loop {
                tokio::select! {
                    biased;

                    () = cancel.cancelled() => break,

                    frame = frames.next_frame() => match frame {
                        None => break,
                        Some(Err(err)) => {
                            warn!(%err, "connection read failed");
                            break;
                        }
                        Some(Ok(Frame::Message(msg))) => self.dispatch(conn_id, &sink, msg).await,
                        Some(Ok(Frame::Malformed(reason))) => {
                            warn!(%reason, "malformed inbound record");
                            let _ = sink.send(Outbound::error("", reason, Some("malformed_message")));
                        }
                    },
                }
            }

            self.disconnect(conn_id).await;
            drop(sink);
            cancel.cancel();
            if let Err(err) = writer_task.await {
                warn!(%err, "writer task failed");
            }
            info!("connection closed");
        }
        .instrument(span)
        .await;
    }

    /// Close every session, close every connection, and stop accepting.
    ///
    /// Session closes (and their auto-denies) complete before connections
    /// are torn down, so front-ends still receive the `closed` statuses.
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<Session>> = self
            .sessions
            .lock()
            .await
            .drain()
            .map(|(_, session)| session)
            .collect();
        let closing = sessions.len();
        let denied: usize = sessions.iter().map(|session| session.close()).sum();
        info!(sessions = closing, denied, "sessions closed for shutdown");

        for conn in self.connections.lock().await.values() {
            conn.cancel.cancel();
        }
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;

        listener::remove_socket_file(&self.settings.socket_path);
        info!("broker shut down");
    }

    // ── Private helpers ───────────────────────────────────────────────────────

    /// Route one inbound record.
    async fn dispatch(&self, conn_id: u64, sink: &OutboundSink, msg: Inbound) {
        let Inbound { session_id, body } = msg;
        let span = info_span!("dispatch", session_id = %session_id, kind = body.kind());

        async move {
            match body {
                InboundBody::StartSession {
                    cwd,
                    prompt,
                    system_prompt,
                    model,
                    permission_mode,
                    allowed_tools,
                    setting_sources,
                } => {
                    let Some(session) = self.register(&session_id, conn_id, sink).await else {
                        return;
                    };
                    session.start(StartConfig {
                        cwd: PathBuf::from(cwd),
                        prompt,
                        options: EngineOptions {
                            system_prompt,
                            model,
                            permission_mode,
                            allowed_tools,
                            setting_sources,
                        },
                    });
                }
                InboundBody::ResumeSession {
                    external_conversation_id,
                    prompt,
                    cwd,
                } => {
                    let Some(session) = self.register(&session_id, conn_id, sink).await else {
                        return;
                    };
                    session.resume(external_conversation_id, prompt, PathBuf::from(cwd));
                }
                InboundBody::SendPrompt { prompt } => {
                    if let Some(session) = self.lookup(&session_id).await {
                        session.send_prompt(prompt);
                    }
                }
                InboundBody::Interrupt => {
                    if let Some(session) = self.lookup(&session_id).await {
                        session.interrupt();
                    }
                }
                InboundBody::PermissionResponse {
                    request_id,
                    behavior,
                    updated_input,
                    message,
                } => {
                    if let Some(session) = self.lookup(&session_id).await {
                        session.resolve_permission(&request_id, behavior, updated_input, message);
                    }
                }
                InboundBody::QuestionResponse {
                    request_id,
                    answers,
                } => {
                    if let Some(session) = self.lookup(&session_id).await {
                        session.resolve_question(&request_id, answers);
                    }
                }
                InboundBody::CloseSession => {
                    let removed = self.sessions.lock().await.remove(&session_id);
                    match removed {
                        Some(session) => {
                            session.close();
                            if session.origin() != conn_id {
                                let _ = sink.send(Outbound::status(
                                    session_id.clone(),
                                    SessionStatus::Closed,
                                ));
                            }
                        }
                        None => {
                            let err = AppError::NotFound(format!("session '{session_id}'"));
                            let _ = sink.send(Outbound::error(
                                session_id.clone(),
                                err.to_string(),
                                Some(err.code()),
                            ));
                        }
                    }
                }
            }
        }
        .instrument(span)
        .await;
    }

    /// Create and register a session, or report why not on `sink`.
    async fn register(
        &self,
        session_id: &str,
        conn_id: u64,
        sink: &OutboundSink,
    ) -> Option<Arc<Session>> {
        match self.try_register(session_id, conn_id, sink).await {
            Ok(session) => Some(session),
            Err(err) => {
                warn!(%err, "session not created");
                let _ = sink.send(Outbound::error(session_id, err.to_string(), Some(err.code())));
                None
            }
        }
    }

    async fn try_register(
        &self,
        session_id: &str,
        conn_id: u64,
        sink: &OutboundSink,
    ) -> Result<Arc<Session>> {
        if session_id.is_empty() {
            return Err(AppError::Protocol("sessionId must not be empty".into()));
        }

        // Check and insert under one lock so concurrent starts cannot both win.
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(session_id) {
            return Err(AppError::AlreadyExists(format!("session '{session_id}'")));
        }

        let session = Session::new(session_id, sink.clone(), Arc::clone(&self.engine), conn_id);
        sessions.insert(session_id.to_owned(), Arc::clone(&session));
        info!(session_id, "session registered");
        Ok(session)
    }

    async fn lookup(&self, session_id: &str) -> Option<Arc<Session>> {
        let session = self.session(session_id).await;
        if session.is_none() {
            debug!(session_id, "no such session, dropping message");
        }
        session
    }

    /// Release a connection's resources; sessions survive unless configured.
    async fn disconnect(&self, conn_id: u64) {
        self.connections.lock().await.remove(&conn_id);

        if !self.settings.close_on_disconnect {
            return;
        }

        let orphaned: Vec<Arc<Session>> = {
            let mut sessions = self.sessions.lock().await;
            let ids: Vec<String> = sessions
                .iter()
                .filter(|(_, session)| session.origin() == conn_id)
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| sessions.remove(id)).collect()
        };

        for session in orphaned {
            info!(session_id = session.id(), "closing session of dropped connection");
            session.close();
        }
    }
}
