//! Integration tests for the rendezvous socket listener.
//!
//! Validates:
//! - a stale file at the socket path is replaced on bind
//! - the socket is restricted to its owner
//! - a real client can run a session end to end
//! - shutdown removes the socket file

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use interprocess::local_socket::tokio::{prelude::*, RecvHalf, SendHalf, Stream};
use interprocess::local_socket::{GenericFilePath, ToFsName};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};

use agent_bridge::broker::{Broker, BrokerSettings};
use agent_bridge::protocol::{Outbound, SessionStatus};

use super::test_helpers::{is_status, kinds, start, test_settings, ScriptedEngine, STEP_TIMEOUT};

struct SocketClient {
    lines: Lines<BufReader<RecvHalf>>,
    writer: SendHalf,
}

impl SocketClient {
    async fn connect(path: &Path) -> Self {
        let name = path.to_fs_name::<GenericFilePath>().unwrap();
        let stream = Stream::connect(name).await.expect("connect to broker socket");
        let (reader, writer) = stream.split();
        Self {
            lines: BufReader::new(reader).lines(),
            writer,
        }
    }

    async fn send(&mut self, record: Value) {
        let line = format!("{record}\n");
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    async fn recv(&mut self) -> Option<Outbound> {
        let line = tokio::time::timeout(STEP_TIMEOUT, self.lines.next_line())
            .await
            .expect("timed out waiting for a record")
            .unwrap()?;
        Some(serde_json::from_str(&line).unwrap())
    }
}

fn settings_in(dir: &Path) -> BrokerSettings {
    BrokerSettings {
        socket_path: dir.join("bridge.sock"),
        ..test_settings()
    }
}

/// A leftover regular file at the socket path is removed before binding.
#[tokio::test]
async fn bind_replaces_stale_socket_file() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings_in(dir.path());
    std::fs::write(&settings.socket_path, b"stale").unwrap();

    let broker = Broker::new(settings.clone(), ScriptedEngine::standard());
    let handle = broker.bind().expect("bind over stale file");

    assert_eq!(handle.socket_path(), settings.socket_path.as_path());
    let mode = std::fs::metadata(&settings.socket_path)
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o600, "socket must be owner-only");

    broker.shutdown().await;
    handle.join().await;
}

/// A missing parent directory is created on bind.
#[tokio::test]
async fn bind_creates_parent_directory() {
    let dir = tempfile::tempdir().unwrap();
    let settings = BrokerSettings {
        socket_path: dir.path().join("nested/run/bridge.sock"),
        ..test_settings()
    };

    let broker = Broker::new(settings.clone(), ScriptedEngine::standard());
    let handle = broker.bind().expect("bind with missing parent");
    assert!(settings.socket_path.exists());

    broker.shutdown().await;
    handle.join().await;
}

/// A client over the real socket runs the start scenario; shutdown then
/// removes the socket file and ends the client's stream.
#[tokio::test]
async fn session_over_real_socket_then_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings_in(dir.path());
    let broker = Broker::new(settings.clone(), ScriptedEngine::standard());
    let handle = broker.bind().unwrap();

    let mut client = SocketClient::connect(&settings.socket_path).await;
    client.send(start("s1")).await;

    let mut msgs = Vec::new();
    while let Some(msg) = client.recv().await {
        let done = is_status(&msg, SessionStatus::Idle);
        msgs.push(msg);
        if done {
            break;
        }
    }
    assert_eq!(
        kinds(&msgs),
        vec!["session_status", "system", "assistant_text", "result", "session_status"]
    );

    broker.shutdown().await;
    handle.join().await;

    let mut trailing = Vec::new();
    while let Some(msg) = client.recv().await {
        trailing.push(msg);
    }
    assert!(
        trailing.iter().any(|m| is_status(m, SessionStatus::Closed)),
        "shutdown must report closed before hanging up"
    );
    assert!(!settings.socket_path.exists(), "socket file must be removed");
}

/// Two socket clients can control the same session.
#[tokio::test]
async fn second_socket_client_can_close_session() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings_in(dir.path());
    let broker = Broker::new(settings.clone(), ScriptedEngine::standard());
    let handle = broker.bind().unwrap();

    let mut first = SocketClient::connect(&settings.socket_path).await;
    first.send(start("s1")).await;
    while let Some(msg) = first.recv().await {
        if is_status(&msg, SessionStatus::Idle) {
            break;
        }
    }

    let mut second = SocketClient::connect(&settings.socket_path).await;
    second.send(json!({ "type": "close_session", "sessionId": "s1" })).await;

    let ack = second.recv().await.expect("close acknowledgement");
    assert!(is_status(&ack, SessionStatus::Closed));
    let closed = first.recv().await.expect("closed on origin");
    assert!(is_status(&closed, SessionStatus::Closed));

    broker.shutdown().await;
    handle.join().await;
}
