//! Outbound messages (bridge → front-end).
//!
//! The six engine-originated kinds (`system`, `assistant_text`, `tool_use`,
//! `tool_result`, `stream_delta`, `result`) reuse the payload structs the
//! engine emits, so relaying an engine event is a re-wrap, not a copy.

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

/// Outward lifecycle status of a session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// First invocation (or resume) has begun.
    Started,
    /// No invocation in flight.
    Idle,
    /// A follow-up invocation has begun.
    Processing,
    /// Session closed; no further events.
    Closed,
    /// The last invocation failed.
    Error,
}

/// First event of an invocation; carries the conversation id used to resume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SystemInit {
    /// Engine-defined subtype, usually `init`.
    pub subtype: String,
    /// Engine conversation identifier.
    pub external_conversation_id: String,
    /// Tools available to the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<String>>,
    /// Model in use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Engine working directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
}

/// Assistant prose.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssistantText {
    /// Engine message identifier.
    pub uuid: String,
    /// Text content.
    pub text: String,
}

/// The engine invoked a tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolUse {
    /// Engine message identifier.
    pub uuid: String,
    /// Tool name.
    pub tool_name: String,
    /// Tool input, passed through untouched.
    pub tool_input: Value,
    /// Correlates with the matching [`ToolResult`].
    pub tool_use_id: String,
}

/// Output of a tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    /// Engine message identifier.
    pub uuid: String,
    /// Correlates with the originating [`ToolUse`].
    pub tool_use_id: String,
    /// Tool output, passed through untouched.
    pub output: Value,
    /// Whether the tool reported failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

/// Incremental streaming chunk, passed through untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamDelta {
    /// Engine message identifier.
    pub uuid: String,
    /// Opaque delta payload.
    pub delta: Value,
}

/// Final summary of an invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResultSummary {
    /// Engine-defined subtype (`success`, `error_max_turns`, ...).
    pub subtype: String,
    /// Whether the invocation ended in error.
    pub is_error: bool,
    /// Final assistant result text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// Accumulated cost in USD.
    ///
    /// Kept as the engine wrote it, so `0` stays `0` and `0.5` stays `0.5`.
    pub total_cost: Number,
    /// Wall-clock duration.
    pub duration_ms: u64,
    /// Number of turns taken.
    pub num_turns: u32,
    /// Error descriptions, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
}

/// The engine wants permission to run a tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequest {
    /// Identifier to echo in `permission_response`.
    pub request_id: String,
    /// Tool name.
    pub tool_name: String,
    /// Proposed tool input.
    pub tool_input: Value,
    /// Tool-use correlation id.
    pub tool_use_id: String,
    /// Engine-provided permission suggestions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Value>,
}

/// One choice of a [`QuestionItem`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestionOption {
    /// Short label.
    pub label: String,
    /// Longer explanation.
    #[serde(default)]
    pub description: String,
}

/// One multiple-choice question.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QuestionItem {
    /// Question text.
    pub question: String,
    /// Short heading.
    #[serde(default)]
    pub header: String,
    /// Available answers.
    #[serde(default)]
    pub options: Vec<QuestionOption>,
    /// Whether several options may be chosen.
    #[serde(default)]
    pub multi_select: bool,
}

/// The engine asks the user one or more questions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuestionRequest {
    /// Identifier to echo in `question_response`.
    pub request_id: String,
    /// Questions to answer.
    pub questions: Vec<QuestionItem>,
}

/// Outbound record: routing key plus kind-specific body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Outbound {
    /// Session the event concerns; empty for connection-wide errors.
    #[serde(rename = "sessionId")]
    pub session_id: String,
    /// Kind-specific payload, flattened next to `sessionId`.
    #[serde(flatten)]
    pub body: OutboundBody,
}

/// Outbound message kinds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundBody {
    /// See [`SystemInit`].
    System(SystemInit),
    /// See [`AssistantText`].
    AssistantText(AssistantText),
    /// See [`ToolUse`].
    ToolUse(ToolUse),
    /// See [`ToolResult`].
    ToolResult(ToolResult),
    /// See [`PermissionRequest`].
    PermissionRequest(PermissionRequest),
    /// See [`QuestionRequest`].
    Question(QuestionRequest),
    /// See [`StreamDelta`].
    StreamDelta(StreamDelta),
    /// See [`ResultSummary`].
    Result(ResultSummary),
    /// A failure scoped to the session (or to the connection when the id is empty).
    Error {
        /// Human-readable description.
        error: String,
        /// Machine-readable code.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
    /// Lifecycle transition.
    SessionStatus {
        /// New status.
        status: SessionStatus,
    },
}

impl OutboundBody {
    /// Wire name of the message kind, for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::System(_) => "system",
            Self::AssistantText(_) => "assistant_text",
            Self::ToolUse(_) => "tool_use",
            Self::ToolResult(_) => "tool_result",
            Self::PermissionRequest(_) => "permission_request",
            Self::Question(_) => "question",
            Self::StreamDelta(_) => "stream_delta",
            Self::Result(_) => "result",
            Self::Error { .. } => "error",
            Self::SessionStatus { .. } => "session_status",
        }
    }
}

impl Outbound {
    /// Build an outbound record for `session_id`.
    pub fn new(session_id: impl Into<String>, body: OutboundBody) -> Self {
        Self {
            session_id: session_id.into(),
            body,
        }
    }

    /// Build an `error` event.
    pub fn error(
        session_id: impl Into<String>,
        error: impl Into<String>,
        code: Option<&str>,
    ) -> Self {
        Self::new(
            session_id,
            OutboundBody::Error {
                error: error.into(),
                code: code.map(str::to_owned),
            },
        )
    }

    /// Build a `session_status` event.
    pub fn status(session_id: impl Into<String>, status: SessionStatus) -> Self {
        Self::new(session_id, OutboundBody::SessionStatus { status })
    }
}
