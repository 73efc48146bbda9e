//! Engine boundary.
//!
//! The [`Engine`] trait is the narrow surface the bridge drives: one call per
//! invocation, with an [`EngineContext`] through which the engine emits its
//! linear event stream, asks for decisions, and observes interrupt requests.
//! Everything the engine does internally is opaque to the bridge.

pub mod cli;

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::protocol::{
    AssistantText, OutboundBody, ResultSummary, StreamDelta, SystemInit, ToolResult, ToolUse,
};
use crate::Result;

/// Capability name the engine uses for multiple-choice questions.
pub const QUESTION_TOOL: &str = "AskUserQuestion";

/// Events an engine emits during one invocation, in order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Invocation initialised; carries the conversation id.
    System(SystemInit),
    /// Assistant prose.
    AssistantText(AssistantText),
    /// Tool invocation.
    ToolUse(ToolUse),
    /// Tool output.
    ToolResult(ToolResult),
    /// Incremental streaming chunk.
    StreamDelta(StreamDelta),
    /// Final summary.
    Result(ResultSummary),
}

impl From<EngineEvent> for OutboundBody {
    fn from(event: EngineEvent) -> Self {
        match event {
            EngineEvent::System(e) => Self::System(e),
            EngineEvent::AssistantText(e) => Self::AssistantText(e),
            EngineEvent::ToolUse(e) => Self::ToolUse(e),
            EngineEvent::ToolResult(e) => Self::ToolResult(e),
            EngineEvent::StreamDelta(e) => Self::StreamDelta(e),
            EngineEvent::Result(e) => Self::Result(e),
        }
    }
}

/// A decision point raised by the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRequest {
    /// Capability the engine wants to use.
    pub tool_name: String,
    /// Proposed input; also the default for "allow" without changes.
    pub tool_input: Value,
    /// Tool-use correlation id.
    #[serde(default)]
    pub tool_use_id: String,
    /// Engine-provided permission suggestions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Value>,
}

/// Outcome handed back to the engine for one decision point.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "behavior", rename_all = "snake_case")]
pub enum Decision {
    /// Proceed with `updated_input`.
    #[serde(rename_all = "camelCase")]
    Allow {
        /// Input to use, either the original or a front-end replacement.
        updated_input: Value,
    },
    /// Do not proceed.
    Deny {
        /// Reason reported to the engine.
        message: String,
    },
}

impl Decision {
    /// Build a deny decision.
    pub fn deny(message: impl Into<String>) -> Self {
        Self::Deny {
            message: message.into(),
        }
    }

    /// Whether this decision lets the engine proceed.
    #[must_use]
    pub fn is_allow(&self) -> bool {
        matches!(self, Self::Allow { .. })
    }
}

/// Per-session engine options captured from `start_session`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EngineOptions {
    /// System prompt override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Model override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Permission mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_mode: Option<String>,
    /// Tools allowed without asking.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<String>>,
    /// Settings sources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setting_sources: Option<Vec<String>>,
}

/// Everything the engine needs to run one invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InvocationRequest {
    /// Bridge session the invocation belongs to.
    pub session_id: String,
    /// User prompt for this turn.
    pub prompt: String,
    /// Working directory.
    pub cwd: PathBuf,
    /// Conversation to continue, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume: Option<String>,
    /// Session options.
    #[serde(default)]
    pub options: EngineOptions,
}

/// Bridge-side receiver of engine output.
///
/// The session hands each invocation its own host; engines only see it
/// through [`EngineContext`].
pub trait EngineHost: Send + Sync {
    /// Relay one event outward. Never blocks.
    fn emit(&self, event: EngineEvent);

    /// Register a decision point and return the deferred outcome.
    ///
    /// Registration (and the outward request event) happens before this
    /// returns; the returned future only waits for the answer.
    fn request_decision(
        &self,
        request: DecisionRequest,
    ) -> Pin<Box<dyn Future<Output = Decision> + Send + 'static>>;
}

/// Handle given to an engine for the duration of one invocation.
#[derive(Clone)]
pub struct EngineContext {
    host: Arc<dyn EngineHost>,
    cancel: CancellationToken,
    close: CancellationToken,
}

impl EngineContext {
    /// Bind a context to `host`.
    ///
    /// `cancel` fires on interrupt or close; `close` fires only when the
    /// session is closing.
    #[must_use]
    pub fn new(
        host: Arc<dyn EngineHost>,
        cancel: CancellationToken,
        close: CancellationToken,
    ) -> Self {
        Self {
            host,
            cancel,
            close,
        }
    }

    /// Relay one event outward.
    pub fn emit(&self, event: EngineEvent) {
        self.host.emit(event);
    }

    /// Ask the front-end for a decision. See [`EngineHost::request_decision`].
    pub fn request_decision(
        &self,
        request: DecisionRequest,
    ) -> Pin<Box<dyn Future<Output = Decision> + Send + 'static>> {
        self.host.request_decision(request)
    }

    /// Token cancelled when the bridge asks the invocation to stop.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether an interrupt has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token cancelled when the owning session closes. Engines may stop
    /// forcibly once it fires; nobody will read their output.
    #[must_use]
    pub fn closing(&self) -> &CancellationToken {
        &self.close
    }
}

/// The reasoning/execution engine the bridge drives.
///
/// One call runs one invocation to completion. Implementations must honour
/// [`EngineContext::cancellation`] cooperatively; the bridge never aborts
/// the returned future.
pub trait Engine: Send + Sync {
    /// Run one invocation.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Engine`](crate::AppError::Engine) when the
    /// invocation fails; the session reports it and returns to idle.
    fn invoke(
        &self,
        request: InvocationRequest,
        ctx: EngineContext,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}
