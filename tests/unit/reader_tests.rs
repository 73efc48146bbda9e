//! Unit tests for line parsing and the per-connection frame reader.

use agent_bridge::framer::reader::{parse_line, Frame, FrameReader};
use agent_bridge::protocol::InboundBody;
use agent_bridge::AppError;

// ── parse_line ───────────────────────────────────────────────────────────────

/// Blank and whitespace-only lines are skipped.
#[test]
fn blank_lines_are_skipped() {
    assert!(parse_line("").is_none());
    assert!(parse_line("   \t  ").is_none());
}

/// Surrounding whitespace (including a trailing `\r`) is trimmed.
#[test]
fn valid_line_parses_after_trim() {
    let msg = parse_line("  {\"type\":\"interrupt\",\"sessionId\":\"s1\"}\r")
        .expect("line is not blank")
        .expect("line is valid");

    assert_eq!(msg.session_id, "s1");
    assert_eq!(msg.body, InboundBody::Interrupt);
}

/// Invalid JSON is a protocol error mentioning the malformed message.
#[test]
fn invalid_json_is_protocol_error() {
    match parse_line("not-valid-json{{{") {
        Some(Err(AppError::Protocol(msg))) => assert!(
            msg.contains("malformed message"),
            "error must mention 'malformed message', got: {msg}"
        ),
        other => panic!("expected protocol error, got: {other:?}"),
    }
}

/// An unknown `type` is rejected rather than silently accepted.
#[test]
fn unknown_type_is_protocol_error() {
    let result = parse_line(r#"{"type":"reticulate","sessionId":"s1"}"#);
    assert!(matches!(result, Some(Err(AppError::Protocol(_)))));
}

/// A record without `sessionId` is rejected.
#[test]
fn missing_session_id_is_protocol_error() {
    let result = parse_line(r#"{"type":"interrupt"}"#);
    assert!(matches!(result, Some(Err(AppError::Protocol(_)))));
}

/// A record missing a required field of its kind is rejected.
#[test]
fn missing_required_field_is_protocol_error() {
    let result = parse_line(r#"{"type":"send_prompt","sessionId":"s1"}"#);
    assert!(matches!(result, Some(Err(AppError::Protocol(_)))));
}

// ── FrameReader ──────────────────────────────────────────────────────────────

async fn collect(input: &[u8], max_line_bytes: usize) -> Vec<Frame> {
    let mut reader = FrameReader::new(input, max_line_bytes);
    let mut frames = Vec::new();
    while let Some(frame) = reader.next_frame().await {
        frames.push(frame.expect("in-memory reads do not fail"));
    }
    frames
}

/// One malformed line followed by N valid lines yields exactly N messages
/// and one malformed signal, in stream order.
#[tokio::test]
async fn malformed_line_does_not_disturb_following_lines() {
    let mut input = String::from("{broken\n");
    for i in 0..5 {
        input.push_str(&format!(
            "{{\"type\":\"send_prompt\",\"sessionId\":\"s{i}\",\"prompt\":\"p\"}}\n"
        ));
    }

    let frames = collect(input.as_bytes(), 4096).await;

    assert_eq!(frames.len(), 6);
    assert!(matches!(frames[0], Frame::Malformed(_)));
    let ids: Vec<&str> = frames[1..]
        .iter()
        .map(|f| match f {
            Frame::Message(msg) => msg.session_id.as_str(),
            Frame::Malformed(reason) => panic!("unexpected malformed frame: {reason}"),
        })
        .collect();
    assert_eq!(ids, vec!["s0", "s1", "s2", "s3", "s4"]);
}

/// Blank lines between records produce no frames.
#[tokio::test]
async fn blank_lines_produce_no_frames() {
    let input = b"\n\n{\"type\":\"interrupt\",\"sessionId\":\"s1\"}\n   \n";
    let frames = collect(input, 4096).await;

    assert_eq!(frames.len(), 1);
}

/// An over-long line becomes a malformed frame naming the limit; the next
/// line still parses.
#[tokio::test]
async fn oversized_line_is_malformed_frame() {
    let input = format!(
        "{}\n{{\"type\":\"interrupt\",\"sessionId\":\"s1\"}}\n",
        "a".repeat(500)
    );
    let frames = collect(input.as_bytes(), 128).await;

    assert_eq!(frames.len(), 2);
    match &frames[0] {
        Frame::Malformed(reason) => assert!(reason.contains("128"), "got: {reason}"),
        Frame::Message(msg) => panic!("expected malformed frame, got {msg:?}"),
    }
    assert!(matches!(frames[1], Frame::Message(_)));
}

/// A final record without a trailing newline is still delivered at EOF.
#[tokio::test]
async fn unterminated_final_record_is_delivered() {
    let frames = collect(br#"{"type":"close_session","sessionId":"s9"}"#, 4096).await;

    assert_eq!(frames.len(), 1);
    assert!(matches!(
        frames[0],
        Frame::Message(ref msg) if msg.body == InboundBody::CloseSession
    ));
}

/// An empty stream ends immediately.
#[tokio::test]
async fn empty_stream_yields_nothing() {
    assert!(collect(b"", 4096).await.is_empty());
}
