//! rumor node daemon — symmetric gossip overlay runtime.
//!
//! Every node listens, dials its configured peers, floods chat messages with
//! duplicate suppression, emits heartbeats, and re-dials dead peers with
//! exponential backoff.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Reconnect backoff schedules.
pub mod backoff;
/// Interactive stdin/stdout front-end.
pub mod chat;
/// CLI argument parsing and node configuration.
pub mod config;
/// Bounded duplicate-suppression cache.
pub mod dedup;
/// Error types for the peer runtime.
pub mod error;
/// Heartbeat emission and peer death detection.
pub mod heartbeat;
/// Prometheus metrics collection and HTTP endpoint.
pub mod metrics;
/// Connection lifecycle and gossip broadcast.
pub mod peer;
/// Reconnection controller for configured peers.
pub mod reconnect;

pub use error::PeerError;
pub use heartbeat::HeartbeatManager;
pub use peer::Peer;
pub use reconnect::ReconnectManager;
