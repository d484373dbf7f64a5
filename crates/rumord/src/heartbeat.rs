//! Peer liveness: heartbeat emission and timeout-based death detection.
//!
//! The manager never touches the network itself. Outgoing heartbeats are
//! handed to an injected send callback and deaths are reported through an
//! injected death callback, so the wiring to the peer runtime stays at the
//! call site.

use crate::config::Config;
use crate::metrics::counters;
use parking_lot::{Mutex, RwLock};
use rumor_common::Message;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Liveness bookkeeping for one remote peer.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    /// Remote peer id.
    pub id: String,
    /// Address the peer is reachable at, when known.
    pub addr: Option<String>,
    /// Last time any message arrived from this peer.
    pub last_seen: Instant,
    /// Last time a heartbeat arrived from this peer.
    pub last_heartbeat: Instant,
}

/// Point-in-time counters for the liveness subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatStats {
    /// Heartbeats emitted by this node.
    pub sent: u64,
    /// Heartbeats received from monitored peers.
    pub received: u64,
    /// Peers currently monitored.
    pub active_peers: usize,
}

struct HeartbeatInner {
    local_id: String,
    interval: Duration,
    timeout: Duration,
    peers: RwLock<HashMap<String, PeerInfo>>,
    on_send: Box<dyn Fn(Message) + Send + Sync>,
    on_dead: Box<dyn Fn(String) + Send + Sync>,
    heartbeats_sent: AtomicU64,
    heartbeats_received: AtomicU64,
    cancel: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

/// Detects dead peers by heartbeat silence and drives heartbeat emission.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct HeartbeatManager {
    inner: Arc<HeartbeatInner>,
}

impl HeartbeatManager {
    /// Creates a manager for `local_id`.
    ///
    /// `on_send` receives each heartbeat message to put on the wire;
    /// `on_dead` receives the id of every peer declared dead and runs outside
    /// the liveness map lock.
    pub fn new(
        config: &Config,
        local_id: impl Into<String>,
        on_send: impl Fn(Message) + Send + Sync + 'static,
        on_dead: impl Fn(String) + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(HeartbeatInner {
                local_id: local_id.into(),
                interval: config.heartbeat_interval,
                timeout: config.heartbeat_timeout,
                peers: RwLock::new(HashMap::new()),
                on_send: Box::new(on_send),
                on_dead: Box::new(on_dead),
                heartbeats_sent: AtomicU64::new(0),
                heartbeats_received: AtomicU64::new(0),
                cancel: CancellationToken::new(),
                handles: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Starts the heartbeat and health-check loops.
    pub fn start(&self) {
        let manager = self.clone();
        let heartbeat = tokio::spawn(async move { manager.heartbeat_loop().await });
        let manager = self.clone();
        let health = tokio::spawn(async move { manager.health_check_loop().await });
        self.inner.handles.lock().extend([heartbeat, health]);
    }

    /// Cancels both loops and waits for their exit.
    pub async fn stop(&self) {
        self.inner.cancel.cancel();
        let handles: Vec<_> = self.inner.handles.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Starts monitoring `id`, with its dialable address when known.
    pub fn add_peer(&self, id: impl Into<String>, addr: Option<String>) {
        let id = id.into();
        let now = Instant::now();
        self.inner.peers.write().insert(
            id.clone(),
            PeerInfo {
                id,
                addr,
                last_seen: now,
                last_heartbeat: now,
            },
        );
    }

    /// Stops monitoring `id`.
    pub fn remove_peer(&self, id: &str) {
        self.inner.peers.write().remove(id);
    }

    /// Refreshes `last_seen` for `id`; unknown ids are ignored.
    pub fn update_last_seen(&self, id: &str) {
        if let Some(peer) = self.inner.peers.write().get_mut(id) {
            peer.last_seen = Instant::now();
        }
    }

    /// Records an incoming heartbeat from a monitored peer.
    pub fn process_heartbeat(&self, msg: &Message) {
        let mut peers = self.inner.peers.write();
        if let Some(peer) = peers.get_mut(&msg.sender_id) {
            let now = Instant::now();
            peer.last_heartbeat = now;
            peer.last_seen = now;
            self.inner.heartbeats_received.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Number of peers currently monitored.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.inner.peers.read().len()
    }

    /// Known addresses of monitored peers.
    #[must_use]
    pub fn peer_list(&self) -> Vec<String> {
        self.inner
            .peers
            .read()
            .values()
            .filter_map(|peer| peer.addr.clone())
            .collect()
    }

    /// Current emission/reception counters.
    #[must_use]
    pub fn stats(&self) -> HeartbeatStats {
        HeartbeatStats {
            sent: self.inner.heartbeats_sent.load(Ordering::Relaxed),
            received: self.inner.heartbeats_received.load(Ordering::Relaxed),
            active_peers: self.peer_count(),
        }
    }

    async fn heartbeat_loop(&self) {
        let start = tokio::time::Instant::now() + self.inner.interval;
        let mut ticker = tokio::time::interval_at(start, self.inner.interval);
        let mut sequence_no = 1u64;
        loop {
            tokio::select! {
                () = self.inner.cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }
            if self.peer_count() == 0 {
                continue;
            }
            let msg = Message::heartbeat(self.inner.local_id.clone(), sequence_no);
            sequence_no += 1;
            self.inner.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
            counters::heartbeats_sent_total();
            debug!(seq = msg.sequence_no, "emitting heartbeat");
            (self.inner.on_send)(msg);
        }
    }

    /// Runs at half the heartbeat interval so a timeout is noticed within
    /// one interval of it elapsing.
    async fn health_check_loop(&self) {
        let period = self.inner.interval / 2;
        let start = tokio::time::Instant::now() + period;
        let mut ticker = tokio::time::interval_at(start, period);
        loop {
            tokio::select! {
                () = self.inner.cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }
            self.check_peer_health();
        }
    }

    fn check_peer_health(&self) {
        let now = Instant::now();
        let mut dead = Vec::new();
        {
            let mut peers = self.inner.peers.write();
            peers.retain(|id, info| {
                if now.duration_since(info.last_heartbeat) > self.inner.timeout {
                    dead.push(id.clone());
                    false
                } else {
                    true
                }
            });
        }
        // Callbacks run outside the map lock.
        for id in dead {
            info!(peer_id = %id, "peer timed out");
            counters::peers_dead_total();
            (self.inner.on_dead)(id);
        }
    }
}
