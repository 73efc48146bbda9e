//! Inbound messages (front-end → bridge).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Front-end verdict on a permission request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PermissionBehavior {
    /// Let the engine proceed, optionally with modified input.
    Allow,
    /// Refuse the action.
    Deny,
}

/// Inbound record: routing key plus kind-specific body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Inbound {
    /// Session the record is addressed to.
    #[serde(rename = "sessionId")]
    pub session_id: String,
    /// Kind-specific payload, flattened next to `sessionId`.
    #[serde(flatten)]
    pub body: InboundBody,
}

/// Inbound message kinds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundBody {
    /// Create a session and run its first invocation.
    #[serde(rename_all = "camelCase")]
    StartSession {
        /// Working directory for the engine.
        cwd: String,
        /// First user prompt.
        prompt: String,
        /// Replacement or appended system prompt.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        system_prompt: Option<String>,
        /// Model override.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        /// Engine permission mode.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        permission_mode: Option<String>,
        /// Tools the engine may use without asking.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        allowed_tools: Option<Vec<String>>,
        /// Engine settings sources to load.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        setting_sources: Option<Vec<String>>,
    },
    /// Continue the captured conversation with a new prompt.
    SendPrompt {
        /// Follow-up user prompt.
        prompt: String,
    },
    /// Create a session attached to an existing engine conversation.
    #[serde(rename_all = "camelCase")]
    ResumeSession {
        /// Engine conversation to attach to.
        external_conversation_id: String,
        /// Prompt for the resumed turn.
        prompt: String,
        /// Working directory for the engine.
        cwd: String,
    },
    /// Answer to a `permission_request`.
    #[serde(rename_all = "camelCase")]
    PermissionResponse {
        /// Echoed request identifier.
        request_id: String,
        /// Allow or deny.
        behavior: PermissionBehavior,
        /// Replacement tool input when allowing.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        updated_input: Option<Value>,
        /// Reason shown to the engine when denying.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Answers to a `question`.
    #[serde(rename_all = "camelCase")]
    QuestionResponse {
        /// Echoed request identifier.
        request_id: String,
        /// Answers keyed by question text.
        answers: Value,
    },
    /// Ask the in-flight invocation to stop.
    Interrupt,
    /// Close and unregister the session.
    CloseSession,
}

impl InboundBody {
    /// Wire name of the message kind, for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StartSession { .. } => "start_session",
            Self::SendPrompt { .. } => "send_prompt",
            Self::ResumeSession { .. } => "resume_session",
            Self::PermissionResponse { .. } => "permission_response",
            Self::QuestionResponse { .. } => "question_response",
            Self::Interrupt => "interrupt",
            Self::CloseSession => "close_session",
        }
    }
}

impl Inbound {
    /// Build an inbound record for `session_id`.
    pub fn new(session_id: impl Into<String>, body: InboundBody) -> Self {
        Self {
            session_id: session_id.into(),
            body,
        }
    }
}
