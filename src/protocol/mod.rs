//! Wire protocol between front-ends and the bridge.
//!
//! Every record is one JSON object carrying a `type` discriminant and a
//! `sessionId` routing key. Inbound (front-end → bridge) and outbound
//! (bridge → front-end) kinds are disjoint and live in separate enums.
//!
//! ```json
//! {"type":"start_session","sessionId":"s1","cwd":"/tmp","prompt":"hi"}
//! {"type":"session_status","sessionId":"s1","status":"idle"}
//! ```

pub mod inbound;
pub mod outbound;

pub use inbound::{Inbound, InboundBody, PermissionBehavior};
pub use outbound::{
    AssistantText, Outbound, OutboundBody, PermissionRequest, QuestionItem, QuestionOption,
    QuestionRequest, ResultSummary, SessionStatus, StreamDelta, SystemInit, ToolResult, ToolUse,
};
