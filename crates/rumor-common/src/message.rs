//! Gossip message value type and its JSON wire form.
//!
//! A message is identified for duplicate suppression by its [`Fingerprint`],
//! the `(sender_id, sequence_no)` pair. Payload and timestamp never
//! participate in identity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors from encoding, decoding, or framing messages.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The input held no bytes at all.
    #[error("empty frame")]
    Empty,
    /// The input was not a well-formed message record.
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),
    /// A frame exceeded the framing limit without a delimiter.
    #[error("frame exceeds maximum length of {limit} bytes")]
    FrameTooLong {
        /// The configured frame length limit.
        limit: usize,
    },
    /// Underlying I/O error surfaced through the framing layer.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Kind of a gossip message.
///
/// The wire form carries the tag as a string (`"chat"`, `"heartbeat"`,
/// `"peer_list"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// User-originated text.
    Chat,
    /// Liveness signal, payload is always `"ping"`.
    Heartbeat,
    /// A JSON array of `host:port` peer addresses in the payload.
    PeerList,
}

/// Canonical identity of a message for duplicate suppression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    /// Originating peer id.
    pub sender_id: String,
    /// Per-sender sequence number.
    pub sequence_no: u64,
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.sender_id, self.sequence_no)
    }
}

/// A single message exchanged between peers. Immutable once emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Opaque identity of the originating peer.
    pub sender_id: String,
    /// Monotonic per-sender sequence number.
    pub sequence_no: u64,
    /// Message kind tag.
    #[serde(rename = "type")]
    pub kind: MessageType,
    /// Unicode payload; interpretation depends on [`Message::kind`].
    pub payload: String,
    /// Emission wall-clock instant. Informational only.
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Creates a chat message carrying `text`.
    pub fn chat(sender_id: impl Into<String>, sequence_no: u64, text: impl Into<String>) -> Self {
        Self {
            sender_id: sender_id.into(),
            sequence_no,
            kind: MessageType::Chat,
            payload: text.into(),
            timestamp: Utc::now(),
        }
    }

    /// Creates a heartbeat message.
    pub fn heartbeat(sender_id: impl Into<String>, sequence_no: u64) -> Self {
        Self {
            sender_id: sender_id.into(),
            sequence_no,
            kind: MessageType::Heartbeat,
            payload: "ping".to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Creates a peer-list message carrying the given addresses.
    ///
    /// # Errors
    ///
    /// Returns an error if the address list cannot be serialized.
    pub fn peer_list(
        sender_id: impl Into<String>,
        sequence_no: u64,
        peers: &[String],
    ) -> Result<Self, CodecError> {
        Ok(Self {
            sender_id: sender_id.into(),
            sequence_no,
            kind: MessageType::PeerList,
            payload: serde_json::to_string(peers)?,
            timestamp: Utc::now(),
        })
    }

    /// The `(sender_id, sequence_no)` identity of this message.
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            sender_id: self.sender_id.clone(),
            sequence_no: self.sequence_no,
        }
    }

    /// Extracts the address list from a peer-list payload.
    ///
    /// Non-peer-list messages yield an empty list.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a JSON array of strings.
    pub fn peer_addrs(&self) -> Result<Vec<String>, CodecError> {
        if self.kind != MessageType::PeerList {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&self.payload)?)
    }

    /// Encodes the message as a single-line JSON record (no trailing LF).
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> Result<String, CodecError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes a JSON record into a message.
    ///
    /// # Errors
    ///
    /// Fails on empty input and on input that is not a complete record with
    /// all required fields.
    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        if data.is_empty() {
            return Err(CodecError::Empty);
        }
        Ok(serde_json::from_slice(data)?)
    }
}
