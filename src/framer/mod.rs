//! Line framing for bridge connections.
//!
//! Turns a byte stream into whole protocol records and back. The framer
//! knows nothing about sessions: it only splits on `\n`, parses each
//! segment, and serializes outbound records one per line.
//!
//! - `codec`: [`AnyDelimiterCodec`](tokio_util::codec::AnyDelimiterCodec)-based
//!   segment splitting with a maximum line length.
//! - `reader`: per-connection [`FrameReader`](reader::FrameReader) yielding
//!   parsed [`Inbound`](crate::protocol::Inbound) records or malformed-input
//!   signals.
//! - `writer`: writer task draining an outbound channel into the socket.

pub mod codec;
pub mod reader;
pub mod writer;
