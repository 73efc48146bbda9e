//! Unit tests for outbound line encoding and the writer task.

use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use agent_bridge::framer::writer::{encode_line, run_writer};
use agent_bridge::protocol::{Outbound, SessionStatus};

/// Every encoded record is one line of compact JSON ending in `\n`.
#[test]
fn encode_line_is_single_terminated_line() {
    let bytes = encode_line(&Outbound::status("s1", SessionStatus::Idle)).unwrap();
    let text = String::from_utf8(bytes).unwrap();

    assert!(text.ends_with('\n'));
    assert_eq!(text.matches('\n').count(), 1, "exactly one delimiter");
    assert_eq!(
        text.trim_end(),
        r#"{"sessionId":"s1","type":"session_status","status":"idle"}"#
    );
}

/// Records are written in the order they were queued.
#[tokio::test]
async fn writer_preserves_queue_order() {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let task = tokio::spawn(run_writer(1, server, rx, cancel.clone()));

    for i in 0..10 {
        tx.send(Outbound::error(format!("s{i}"), "x", None)).unwrap();
    }
    drop(tx);
    task.await.unwrap();

    let mut out = String::new();
    let mut client = client;
    client.read_to_string(&mut out).await.unwrap();
    let ids: Vec<String> = out
        .lines()
        .map(|line| serde_json::from_str::<Outbound>(line).unwrap().session_id)
        .collect();
    let expected: Vec<String> = (0..10).map(|i| format!("s{i}")).collect();
    assert_eq!(ids, expected);
}

/// Cancellation flushes what is already queued, then closes the stream.
#[tokio::test]
async fn cancel_drains_queued_records() {
    let (mut client, server) = tokio::io::duplex(64 * 1024);
    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();

    tx.send(Outbound::status("s1", SessionStatus::Closed)).unwrap();
    tx.send(Outbound::status("s2", SessionStatus::Closed)).unwrap();
    cancel.cancel();
    run_writer(7, server, rx, cancel).await;

    let mut out = String::new();
    client.read_to_string(&mut out).await.unwrap();
    assert_eq!(out.lines().count(), 2, "both queued records are written");
    drop(tx);
}

/// A vanished peer is not an error: the writer keeps consuming until the
/// channel closes.
#[tokio::test]
async fn writes_to_closed_peer_are_discarded() {
    let (client, server) = tokio::io::duplex(64);
    drop(client);
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run_writer(3, server, rx, CancellationToken::new()));

    for _ in 0..50 {
        tx.send(Outbound::status("s1", SessionStatus::Idle)).unwrap();
    }
    drop(tx);

    task.await.expect("writer must finish without panicking");
}
