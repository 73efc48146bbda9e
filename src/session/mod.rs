//! Conversation sessions.
//!
//! A [`Session`] owns one conversation's lifecycle: it runs engine
//! invocations on their own tasks, relays every engine event to the outward
//! sink it was bound to at creation, and turns engine decision points into
//! `permission_request` / `question` events answered later by
//! [`Session::resolve_permission`] or [`Session::resolve_question`].
//!
//! # State machine
//!
//! ```text
//! Idle ──start/resume/send_prompt──▶ Processing ──engine done──▶ Idle
//!   │                                     │
//!   └──────────────close──────────────────┴──────────────────▶ Closed
//! ```
//!
//! All outward pushes happen while holding the session lock, so events of
//! one session reach the sink in the order they were produced and nothing
//! follows the `closed` status.
//!
//! Each invocation talks to the session through its own [`EngineHost`]
//! tagged with the invocation's generation. Output from an invocation that
//! already ended is dropped, and decision points it left unanswered are
//! denied with [`INVOCATION_ENDED_REASON`] when it returns.

pub mod pending;

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::FutureExt;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::engine::{
    Decision, DecisionRequest, Engine, EngineContext, EngineEvent, EngineHost, EngineOptions,
    InvocationRequest, QUESTION_TOOL,
};
use crate::framer::writer::OutboundSink;
use crate::protocol::{
    Outbound, OutboundBody, PermissionBehavior, PermissionRequest, QuestionItem, QuestionRequest,
    SessionStatus,
};
use pending::{PendingRequest, PendingTable};

/// Deny reason used for requests still pending when a session closes.
pub const CLOSED_REASON: &str = "Session closed";

/// Deny reason used for requests left over by a finished invocation.
pub const INVOCATION_ENDED_REASON: &str = "Invocation ended";

/// Deny reason used when a front-end denies without giving one.
pub const DEFAULT_DENY_REASON: &str = "Permission denied by user";

/// Internal lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing running.
    Idle,
    /// One invocation in flight.
    Processing,
    /// Terminal.
    Closed,
}

/// Parameters of `start_session`.
#[derive(Debug, Clone, Default)]
pub struct StartConfig {
    /// Engine working directory.
    pub cwd: PathBuf,
    /// First prompt.
    pub prompt: String,
    /// Engine options kept for later turns.
    pub options: EngineOptions,
}

/// Why a launch request was refused.
struct Rejection {
    message: String,
    code: &'static str,
}

impl Rejection {
    fn new(message: impl Into<String>, code: &'static str) -> Self {
        Self {
            message: message.into(),
            code,
        }
    }
}

/// Cancellation handles of the in-flight invocation.
///
/// `interrupt` is a child of `close`: closing also interrupts, but an
/// interrupt leaves `close` untouched.
#[derive(Debug, Clone)]
struct InvocationTokens {
    interrupt: CancellationToken,
    close: CancellationToken,
}

impl InvocationTokens {
    fn new() -> Self {
        let close = CancellationToken::new();
        Self {
            interrupt: close.child_token(),
            close,
        }
    }
}

#[derive(Debug)]
struct SessionInner {
    state: SessionState,
    started: bool,
    conversation_id: Option<String>,
    cwd: Option<PathBuf>,
    options: EngineOptions,
    invocation: Option<InvocationTokens>,
    generation: u64,
    pending: PendingTable,
}

/// One live conversation.
pub struct Session {
    id: String,
    origin: u64,
    sink: OutboundSink,
    engine: Arc<dyn Engine>,
    inner: Mutex<SessionInner>,
}

impl Session {
    /// Create an idle session bound to `sink`.
    ///
    /// `origin` identifies the connection that created it.
    pub fn new(
        id: impl Into<String>,
        sink: OutboundSink,
        engine: Arc<dyn Engine>,
        origin: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            origin,
            sink,
            engine,
            inner: Mutex::new(SessionInner {
                state: SessionState::Idle,
                started: false,
                conversation_id: None,
                cwd: None,
                options: EngineOptions::default(),
                invocation: None,
                generation: 0,
                pending: PendingTable::default(),
            }),
        })
    }

    /// Session identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Connection the session was created on.
    #[must_use]
    pub fn origin(&self) -> u64 {
        self.origin
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// Engine conversation id captured from the last `system` event.
    #[must_use]
    pub fn conversation_id(&self) -> Option<String> {
        self.lock().conversation_id.clone()
    }

    /// Last known working directory.
    #[must_use]
    pub fn cwd(&self) -> Option<PathBuf> {
        self.lock().cwd.clone()
    }

    /// Number of decision points awaiting a response.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    /// Run the first invocation. Only valid on a session that never ran.
    pub fn start(self: &Arc<Self>, config: StartConfig) {
        let session_id = self.id.clone();
        self.launch(SessionStatus::Started, move |inner| {
            if inner.started {
                return Err(Rejection::new("session already started", "already_started"));
            }
            inner.started = true;
            inner.options = config.options.clone();
            Ok(InvocationRequest {
                session_id,
                prompt: config.prompt,
                cwd: config.cwd,
                resume: None,
                options: config.options,
            })
        });
    }

    /// Run a follow-up invocation on the captured conversation.
    pub fn send_prompt(self: &Arc<Self>, prompt: impl Into<String>) {
        let session_id = self.id.clone();
        let prompt = prompt.into();
        self.launch(SessionStatus::Processing, move |inner| {
            let Some(conversation) = inner.conversation_id.clone() else {
                return Err(Rejection::new(
                    "no conversation to continue; wait for the system event",
                    "no_conversation",
                ));
            };
            Ok(InvocationRequest {
                session_id,
                prompt,
                cwd: inner.cwd.clone().unwrap_or_else(|| PathBuf::from(".")),
                resume: Some(conversation),
                options: inner.options.clone(),
            })
        });
    }

    /// Run the first invocation against an existing engine conversation.
    pub fn resume(
        self: &Arc<Self>,
        conversation_id: impl Into<String>,
        prompt: impl Into<String>,
        cwd: PathBuf,
    ) {
        let session_id = self.id.clone();
        let conversation_id = conversation_id.into();
        let prompt = prompt.into();
        self.launch(SessionStatus::Started, move |inner| {
            if inner.started {
                return Err(Rejection::new("session already started", "already_started"));
            }
            inner.started = true;
            inner.conversation_id = Some(conversation_id.clone());
            Ok(InvocationRequest {
                session_id,
                prompt,
                cwd,
                resume: Some(conversation_id),
                options: EngineOptions::default(),
            })
        });
    }

    /// Ask the in-flight invocation to stop.
    ///
    /// Returns `false` when nothing was running.
    pub fn interrupt(&self) -> bool {
        let inner = self.lock();
        match inner.invocation {
            Some(ref tokens) => {
                info!(session_id = %self.id, "interrupt requested");
                tokens.interrupt.cancel();
                true
            }
            None => false,
        }
    }

    /// Close the session. Idempotent.
    ///
    /// Signals close to the in-flight invocation, denies every pending
    /// request with [`CLOSED_REASON`], then emits `closed`. Returns the
    /// number of requests that were denied.
    pub fn close(&self) -> usize {
        let (tokens, drained) = {
            let mut inner = self.lock();
            if inner.state == SessionState::Closed {
                return 0;
            }
            inner.state = SessionState::Closed;
            (inner.invocation.take(), inner.pending.drain())
        };

        if let Some(tokens) = tokens {
            tokens.close.cancel();
        }

        let denied = drained.len();
        for (request_id, request) in drained {
            request.resolve(&request_id, Decision::deny(CLOSED_REASON));
        }

        self.push(Outbound::status(self.id.clone(), SessionStatus::Closed));
        info!(session_id = %self.id, denied, "session closed");
        denied
    }

    /// Answer a `permission_request`.
    ///
    /// Unknown or already-answered ids are ignored; returns whether a
    /// pending request was resolved.
    pub fn resolve_permission(
        &self,
        request_id: &str,
        behavior: PermissionBehavior,
        updated_input: Option<Value>,
        message: Option<String>,
    ) -> bool {
        let Some(request) = self.take_pending(request_id) else {
            return false;
        };

        let decision = match behavior {
            PermissionBehavior::Allow => Decision::Allow {
                updated_input: updated_input.unwrap_or(request.original_input.clone()),
            },
            PermissionBehavior::Deny => {
                Decision::deny(message.unwrap_or_else(|| DEFAULT_DENY_REASON.to_owned()))
            }
        };

        request.resolve(request_id, decision);
        true
    }

    /// Answer a `question`: always an allow with the answers merged into the
    /// original input under `answers`.
    pub fn resolve_question(&self, request_id: &str, answers: Value) -> bool {
        let Some(request) = self.take_pending(request_id) else {
            return false;
        };

        let updated_input = match request.original_input.clone() {
            Value::Object(mut map) => {
                map.insert("answers".to_owned(), answers);
                Value::Object(map)
            }
            _ => serde_json::json!({ "answers": answers }),
        };

        request.resolve(request_id, Decision::Allow { updated_input });
        true
    }

    // ── Private helpers ───────────────────────────────────────────────────────

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Push to the bound sink. A gone connection is not an error.
    fn push(&self, msg: Outbound) {
        if self.sink.send(msg).is_err() {
            debug!(session_id = %self.id, "outbound sink closed, dropping event");
        }
    }

    fn take_pending(&self, request_id: &str) -> Option<PendingRequest> {
        let taken = self.lock().pending.take(request_id);
        if taken.is_none() {
            debug!(session_id = %self.id, request_id, "no pending request, ignoring response");
        }
        taken
    }

    fn launch<F>(self: &Arc<Self>, status: SessionStatus, prepare: F)
    where
        F: FnOnce(&mut SessionInner) -> std::result::Result<InvocationRequest, Rejection>,
    {
        let tokens = InvocationTokens::new();

        let (request, generation) = {
            let mut inner = self.lock();
            match inner.state {
                SessionState::Closed => {
                    debug!(session_id = %self.id, "ignoring launch on closed session");
                    return;
                }
                SessionState::Processing => {
                    self.push(Outbound::error(
                        self.id.clone(),
                        "session is busy",
                        Some("session_busy"),
                    ));
                    return;
                }
                SessionState::Idle => {}
            }

            let request = match prepare(&mut *inner) {
                Ok(request) => request,
                Err(rejection) => {
                    self.push(Outbound::error(
                        self.id.clone(),
                        rejection.message,
                        Some(rejection.code),
                    ));
                    return;
                }
            };

            inner.state = SessionState::Processing;
            inner.invocation = Some(tokens.clone());
            inner.generation += 1;
            inner.cwd = Some(request.cwd.clone());
            self.push(Outbound::status(self.id.clone(), status));
            (request, inner.generation)
        };

        let span = info_span!("invocation", session_id = %self.id, generation);
        let session = Arc::clone(self);
        tokio::spawn(session.run_invocation(request, tokens, generation).instrument(span));
    }

    async fn run_invocation(
        self: Arc<Self>,
        request: InvocationRequest,
        tokens: InvocationTokens,
        generation: u64,
    ) {
        info!(resume = ?request.resume, "invocation started");
        let host: Arc<dyn EngineHost> = Arc::new(InvocationHost {
            session: Arc::clone(&self),
            generation,
        });
        let ctx = EngineContext::new(host, tokens.interrupt, tokens.close);

        let outcome = AssertUnwindSafe(self.engine.invoke(request, ctx))
            .catch_unwind()
            .await;
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err.to_string()),
            Err(_) => Some("engine panicked".to_owned()),
        };

        let mut inner = self.lock();
        if inner.generation != generation || inner.state != SessionState::Processing {
            debug!("invocation finished after close");
            return;
        }
        inner.invocation = None;

        let leftovers = inner.pending.drain_generation(generation);
        if !leftovers.is_empty() {
            debug!(count = leftovers.len(), "denying requests left by finished invocation");
        }
        for (request_id, request) in leftovers {
            request.resolve(&request_id, Decision::deny(INVOCATION_ENDED_REASON));
        }

        if let Some(error) = failure {
            warn!(%error, "invocation failed");
            self.push(Outbound::error(self.id.clone(), error, Some("engine_error")));
            self.push(Outbound::status(self.id.clone(), SessionStatus::Error));
        }

        inner.state = SessionState::Idle;
        self.push(Outbound::status(self.id.clone(), SessionStatus::Idle));
        info!("invocation finished");
    }
}

impl Session {
    /// Relay `event` from invocation `generation`.
    fn relay(&self, generation: u64, event: EngineEvent) {
        let mut inner = self.lock();
        if inner.state != SessionState::Processing || inner.generation != generation {
            debug!(session_id = %self.id, generation, "dropping event from inactive invocation");
            return;
        }

        if let EngineEvent::System(ref init) = event {
            inner.conversation_id = Some(init.external_conversation_id.clone());
            if let Some(ref cwd) = init.cwd {
                inner.cwd = Some(PathBuf::from(cwd));
            }
        }

        self.push(Outbound::new(self.id.clone(), event.into()));
    }

    /// Park a decision point raised by invocation `generation`.
    fn park_decision(
        &self,
        generation: u64,
        request: DecisionRequest,
    ) -> Pin<Box<dyn Future<Output = Decision> + Send + 'static>> {
        let (tx, rx) = oneshot::channel();

        {
            let mut inner = self.lock();
            if inner.state == SessionState::Closed {
                return Box::pin(async { Decision::deny(CLOSED_REASON) });
            }
            if inner.state != SessionState::Processing || inner.generation != generation {
                return Box::pin(async { Decision::deny(INVOCATION_ENDED_REASON) });
            }

            let request_id = inner.pending.next_id();
            inner.pending.insert(
                request_id.clone(),
                PendingRequest::new(request.tool_input.clone(), generation, tx),
            );
            debug!(session_id = %self.id, request_id, tool = %request.tool_name, "decision requested");
            self.push(Outbound::new(self.id.clone(), decision_event(request_id, request)));
        }

        Box::pin(async move { rx.await.unwrap_or_else(|_| Decision::deny(CLOSED_REASON)) })
    }
}

/// Engine-facing view of one invocation of a session.
struct InvocationHost {
    session: Arc<Session>,
    generation: u64,
}

impl EngineHost for InvocationHost {
    fn emit(&self, event: EngineEvent) {
        self.session.relay(self.generation, event);
    }

    fn request_decision(
        &self,
        request: DecisionRequest,
    ) -> Pin<Box<dyn Future<Output = Decision> + Send + 'static>> {
        self.session.park_decision(self.generation, request)
    }
}

/// Map a decision point to its outward event.
///
/// `AskUserQuestion` with a readable `questions` array becomes a `question`;
/// everything else is a `permission_request`.
fn decision_event(request_id: String, request: DecisionRequest) -> OutboundBody {
    if request.tool_name == QUESTION_TOOL {
        let questions = request
            .tool_input
            .get("questions")
            .cloned()
            .map(serde_json::from_value::<Vec<QuestionItem>>);
        if let Some(Ok(questions)) = questions {
            return OutboundBody::Question(QuestionRequest {
                request_id,
                questions,
            });
        }
    }

    OutboundBody::PermissionRequest(PermissionRequest {
        request_id,
        tool_name: request.tool_name,
        tool_input: request.tool_input,
        tool_use_id: request.tool_use_id,
        suggestions: request.suggestions,
    })
}
