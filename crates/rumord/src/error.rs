use rumor_common::CodecError;
use thiserror::Error;

/// Errors from the peer runtime.
#[derive(Error, Debug)]
pub enum PeerError {
    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Frame or message codec error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    /// The remote id exceeded 64 bytes before the handshake delimiter.
    #[error("remote id too long")]
    IdTooLong,
    /// The remote sent a bare delimiter as its id.
    #[error("remote id is empty")]
    EmptyId,
    /// The stream ended before the handshake completed.
    #[error("connection closed during handshake")]
    HandshakeEof,
    /// Dialing the address did not complete within the connect timeout.
    #[error("connect to {addr} timed out")]
    ConnectTimeout {
        /// The address that was being dialed.
        addr: String,
    },
    /// A broadcast write to one destination failed.
    #[error("write to {peer_id}: {source}")]
    Write {
        /// Id of the peer whose connection failed.
        peer_id: String,
        /// The underlying write error.
        source: CodecError,
    },
}
