//! Wire protocol for the rumor gossip overlay.
//!
//! Every frame on the wire is one JSON-encoded [`Message`] terminated by a
//! single line feed. [`message`] holds the value type and its pure codec;
//! [`codec`] holds the newline framing used with `FramedRead`/`FramedWrite`.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Newline-delimited frame extraction.
pub mod codec;
/// Message value type and JSON encoding.
pub mod message;

pub use codec::LineCodec;
pub use message::{CodecError, Fingerprint, Message, MessageType};
