//! Inbound frame reader.
//!
//! Drives a [`FramedRead`] backed by [`FrameCodec`] over one connection's
//! read half and turns each segment into a [`Frame`]. Blank segments are
//! skipped; a segment that cannot be parsed becomes [`Frame::Malformed`] and
//! never disturbs the segments after it.

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tracing::debug;

use crate::framer::codec::{FrameCodec, Segment};
use crate::protocol::Inbound;
use crate::{AppError, Result};

/// One unit of inbound traffic.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A well-formed inbound record.
    Message(Inbound),
    /// A segment that could not be framed or parsed; the text says why.
    Malformed(String),
}

/// Parse one trimmed line into an [`Inbound`] record.
///
/// # Return value
///
/// - `None`: the line is empty or whitespace.
/// - `Some(Ok(msg))`: a recognized record.
/// - `Some(Err(AppError::Protocol(..)))`: invalid JSON, unknown `type`,
///   missing `sessionId`, or a missing required field.
#[must_use]
pub fn parse_line(line: &str) -> Option<Result<Inbound>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    Some(
        serde_json::from_str::<Inbound>(trimmed)
            .map_err(|e| AppError::Protocol(format!("malformed message: {e}"))),
    )
}

/// Lazily yields [`Frame`]s from one connection.
pub struct FrameReader<R> {
    framed: FramedRead<R, FrameCodec>,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin,
{
    /// Wrap `reader` with the given maximum line length.
    pub fn new(reader: R, max_line_bytes: usize) -> Self {
        Self {
            framed: FramedRead::new(reader, FrameCodec::with_max_length(max_line_bytes)),
        }
    }

    /// Read the next frame.
    ///
    /// Returns `None` on EOF and `Some(Err(..))` on an I/O failure of the
    /// underlying stream; both end the connection.
    pub async fn next_frame(&mut self) -> Option<Result<Frame>> {
        loop {
            let segment = match self.framed.next().await? {
                Ok(segment) => segment,
                Err(e) => return Some(Err(e)),
            };

            let frame = match segment {
                Segment::Line(line) => match parse_line(&line) {
                    None => continue,
                    Some(Ok(msg)) => Frame::Message(msg),
                    Some(Err(e)) => {
                        debug!(error = %e, raw_line = %line, "framer: parse error");
                        Frame::Malformed(e.to_string())
                    }
                },
                Segment::Oversized => Frame::Malformed(format!(
                    "malformed message: line exceeds {} bytes",
                    self.framed.decoder().max_length()
                )),
                Segment::InvalidUtf8 => {
                    Frame::Malformed("malformed message: invalid utf-8".to_owned())
                }
            };

            return Some(Ok(frame));
        }
    }
}
