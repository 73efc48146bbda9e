//! Outbound writer task.
//!
//! Receives [`Outbound`] records from an unbounded [`mpsc`] channel,
//! serializes each to a single-line JSON string, and writes the line to the
//! connection. Producers push synchronously and never wait on the socket;
//! the single consumer preserves the order in which records were pushed.
//!
//! A write failure (peer gone) does not surface to producers: the task
//! keeps draining and discarding so a session bound to a dead connection
//! keeps running.

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::protocol::Outbound;
use crate::{AppError, Result};

/// Sending half of a connection's outbound channel.
pub type OutboundSink = mpsc::UnboundedSender<Outbound>;

/// Serialize `msg` as one `\n`-terminated JSON line.
///
/// # Errors
///
/// Returns [`AppError::Protocol`] if serialization fails.
pub fn encode_line(msg: &Outbound) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec(msg)
        .map_err(|e| AppError::Protocol(format!("failed to serialise outbound message: {e}")))?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Writer task: serializes outbound records and writes them to `writer`.
///
/// Exits when:
/// - `cancel` is triggered, after flushing what is already queued, or
/// - `msg_rx` is closed (all senders dropped).
///
/// The write half is shut down on exit so the peer observes EOF.
pub async fn run_writer<W>(
    conn_id: u64,
    writer: W,
    mut msg_rx: mpsc::UnboundedReceiver<Outbound>,
    cancel: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    let mut writer = writer;
    let mut open = true;

    loop {
        tokio::select! {
            biased;

            msg = msg_rx.recv() => {
                let Some(msg) = msg else {
                    debug!(conn_id, "writer: channel closed, stopping");
                    break;
                };
                if open {
                    open = write_one(conn_id, &mut writer, &msg).await;
                }
            }

            () = cancel.cancelled() => {
                debug!(conn_id, "writer: cancellation received, draining queue");
                while let Ok(msg) = msg_rx.try_recv() {
                    if !open {
                        break;
                    }
                    open = write_one(conn_id, &mut writer, &msg).await;
                }
                break;
            }
        }
    }

    if open {
        if let Err(e) = writer.shutdown().await {
            debug!(conn_id, error = %e, "writer: shutdown failed");
        }
    }
}

/// Write one record; returns `false` once the connection is unusable.
async fn write_one<W>(conn_id: u64, writer: &mut W, msg: &Outbound) -> bool
where
    W: AsyncWrite + Unpin,
{
    let bytes = match encode_line(msg) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(conn_id, error = %e, "writer: dropping unserialisable message");
            return true;
        }
    };

    if let Err(e) = writer.write_all(&bytes).await {
        debug!(conn_id, error = %e, "writer: peer gone, discarding further output");
        return false;
    }
    if let Err(e) = writer.flush().await {
        debug!(conn_id, error = %e, "writer: flush failed, discarding further output");
        return false;
    }
    true
}
