//! Newline codec for bridge connections.
//!
//! Wraps [`tokio_util::codec::AnyDelimiterCodec`] with a configurable maximum
//! line length so a front-end that never sends `\n` cannot make the bridge
//! buffer without bound.
//!
//! Unlike a plain lines codec, framing problems are *values*, not errors: an
//! over-long line or a line that is not valid UTF-8 decodes to a
//! [`Segment`] variant describing the problem, and decoding resumes at the
//! next delimiter. Only I/O failures end the stream.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tokio_util::codec::FramedRead;
//! use agent_bridge::framer::codec::FrameCodec;
//!
//! let frames = FramedRead::new(socket_read_half, FrameCodec::new());
//! ```

use bytes::BytesMut;
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, Decoder};

use crate::{AppError, Result};

/// Maximum line length accepted by default: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// One delimiter-separated chunk of the inbound byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// A complete line without its trailing `\n`.
    Line(String),
    /// A line longer than the configured limit; its bytes were discarded.
    Oversized,
    /// A line that is not valid UTF-8.
    InvalidUtf8,
}

/// Newline-delimited segment decoder.
#[derive(Debug)]
pub struct FrameCodec {
    inner: AnyDelimiterCodec,
    max_length: usize,
}

impl FrameCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    /// Create a codec that rejects lines longer than `max_length` bytes.
    #[must_use]
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            inner: AnyDelimiterCodec::new_with_max_length(b"\n".to_vec(), b"\n".to_vec(), max_length),
            max_length,
        }
    }

    /// Configured line limit in bytes.
    #[must_use]
    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Segment;
    type Error = AppError;

    /// Decode the next segment from `src`.
    ///
    /// Returns `Ok(None)` while no complete line is buffered.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        to_segment(self.inner.decode(src))
    }

    /// Decode the final, possibly unterminated, segment at EOF.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        to_segment(self.inner.decode_eof(src))
    }
}

// ── Private helper ────────────────────────────────────────────────────────────

fn to_segment(
    decoded: std::result::Result<Option<bytes::Bytes>, AnyDelimiterCodecError>,
) -> Result<Option<Segment>> {
    match decoded {
        Ok(None) => Ok(None),
        Ok(Some(chunk)) => Ok(Some(
            String::from_utf8(chunk.to_vec()).map_or(Segment::InvalidUtf8, Segment::Line),
        )),
        // The inner codec keeps discarding until the next delimiter.
        Err(AnyDelimiterCodecError::MaxChunkLengthExceeded) => Ok(Some(Segment::Oversized)),
        Err(AnyDelimiterCodecError::Io(err)) => Err(AppError::Io(err.to_string())),
    }
}
