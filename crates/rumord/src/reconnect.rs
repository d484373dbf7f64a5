//! Reconnection controller for configured bootstrap peers.
//!
//! A monitor loop periodically scans the tracked addresses and launches one
//! fire-and-forget dial attempt per eligible address. The `active` flag on
//! each entry prevents concurrent attempts for the same address; no task
//! joining is involved. Dialing, liveness lookup, and liveness registration
//! are injected callbacks so the controller has no direct dependency on the
//! peer runtime.

use crate::backoff::ExponentialBackoff;
use crate::error::PeerError;
use crate::metrics::counters;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// How often the monitor loop scans for reconnect-eligible addresses.
const MONITOR_INTERVAL: Duration = Duration::from_secs(5);
/// Backoff after the first failed attempt.
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
/// Upper bound on the per-address backoff.
const MAX_BACKOFF: Duration = Duration::from_secs(300);
/// Growth factor applied after each failed attempt.
const BACKOFF_FACTOR: f64 = 1.5;

/// Dials an address and resolves to the remote peer id.
pub type ConnectFn =
    Arc<dyn Fn(String) -> BoxFuture<'static, Result<String, PeerError>> + Send + Sync>;
/// Reports whether an address is currently represented in the liveness map.
pub type IsConnectedFn = Arc<dyn Fn(&str) -> bool + Send + Sync>;
/// Registers a freshly connected `(id, addr)` pair in the liveness map.
pub type ConnectedFn = Arc<dyn Fn(String, String) + Send + Sync>;

struct ReconnectState {
    addr: String,
    attempts: u32,
    last_attempt: Option<Instant>,
    backoff: ExponentialBackoff,
    active: bool,
}

impl ReconnectState {
    fn new(addr: String) -> Self {
        Self {
            addr,
            attempts: 0,
            last_attempt: None,
            backoff: ExponentialBackoff::new(INITIAL_BACKOFF, MAX_BACKOFF, BACKOFF_FACTOR),
            active: false,
        }
    }
}

/// Point-in-time view of one reconnect entry.
#[derive(Debug, Clone)]
pub struct ReconnectStats {
    /// The tracked address.
    pub addr: String,
    /// Failed attempts since the last success.
    pub attempts: u32,
    /// When the last attempt started, if any.
    pub last_attempt: Option<Instant>,
    /// Current wait between attempts.
    pub backoff: Duration,
    /// Whether an attempt is in flight.
    pub active: bool,
}

struct ReconnectInner {
    states: Mutex<HashMap<String, ReconnectState>>,
    connect: ConnectFn,
    is_connected: IsConnectedFn,
    on_connected: ConnectedFn,
    cancel: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

/// Keeps configured bootstrap peers connected with exponential backoff.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct ReconnectManager {
    inner: Arc<ReconnectInner>,
}

impl ReconnectManager {
    /// Creates a controller with its injected collaborators.
    pub fn new(connect: ConnectFn, is_connected: IsConnectedFn, on_connected: ConnectedFn) -> Self {
        Self {
            inner: Arc::new(ReconnectInner {
                states: Mutex::new(HashMap::new()),
                connect,
                is_connected,
                on_connected,
                cancel: CancellationToken::new(),
                handles: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Starts the monitor loop.
    pub fn start(&self) {
        let manager = self.clone();
        let handle = tokio::spawn(async move { manager.monitor_loop().await });
        self.inner.handles.lock().push(handle);
    }

    /// Cancels the monitor loop and waits for its exit. In-flight attempt
    /// tasks are not joined; they settle their entry's state on completion.
    pub async fn stop(&self) {
        self.inner.cancel.cancel();
        let handles: Vec<_> = self.inner.handles.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Tracks `addr` for automatic reconnection. Already-tracked addresses
    /// keep their state.
    pub fn add_peer(&self, addr: impl Into<String>) {
        let addr = addr.into();
        self.inner
            .states
            .lock()
            .entry(addr.clone())
            .or_insert_with(|| ReconnectState::new(addr));
    }

    /// Stops tracking `addr`.
    pub fn remove_peer(&self, addr: &str) {
        self.inner.states.lock().remove(addr);
    }

    /// Makes `addr` immediately eligible at the next monitor scan,
    /// regardless of its backoff window.
    pub fn trigger_reconnect(&self, addr: &str) {
        if let Some(state) = self.inner.states.lock().get_mut(addr) {
            state.last_attempt = None;
        }
    }

    /// Snapshot of every tracked entry.
    #[must_use]
    pub fn stats(&self) -> HashMap<String, ReconnectStats> {
        self.inner
            .states
            .lock()
            .iter()
            .map(|(addr, state)| {
                (
                    addr.clone(),
                    ReconnectStats {
                        addr: state.addr.clone(),
                        attempts: state.attempts,
                        last_attempt: state.last_attempt,
                        backoff: state.backoff.current(),
                        active: state.active,
                    },
                )
            })
            .collect()
    }

    async fn monitor_loop(&self) {
        let mut ticker = tokio::time::interval(MONITOR_INTERVAL);
        ticker.tick().await; // the immediate first tick
        loop {
            tokio::select! {
                () = self.inner.cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }
            self.check_reconnections();
        }
    }

    /// Launches an attempt task for every eligible tracked address.
    fn check_reconnections(&self) {
        let eligible: Vec<String> = {
            let states = self.inner.states.lock();
            states
                .values()
                .filter(|state| {
                    if state.active {
                        return false;
                    }
                    if (self.inner.is_connected)(&state.addr) {
                        return false;
                    }
                    match state.last_attempt {
                        Some(last) => last.elapsed() >= state.backoff.current(),
                        None => true,
                    }
                })
                .map(|state| state.addr.clone())
                .collect()
        };
        for addr in eligible {
            let manager = self.clone();
            tokio::spawn(async move { manager.attempt(addr).await });
        }
    }

    async fn attempt(&self, addr: String) {
        {
            let mut states = self.inner.states.lock();
            let Some(state) = states.get_mut(&addr) else {
                return;
            };
            if state.active {
                return;
            }
            state.active = true;
            state.last_attempt = Some(Instant::now());
            state.attempts += 1;
        }
        counters::reconnect_attempts_total();
        debug!(addr = %addr, "attempting reconnect");

        let result = (self.inner.connect)(addr.clone()).await;

        let mut states = self.inner.states.lock();
        let Some(state) = states.get_mut(&addr) else {
            return;
        };
        state.active = false;
        match result {
            Ok(remote_id) => {
                state.backoff.reset();
                state.attempts = 0;
                drop(states);
                info!(addr = %addr, peer_id = %remote_id, "reconnected");
                (self.inner.on_connected)(remote_id, addr);
            }
            Err(e) => {
                state.backoff.advance();
                debug!(
                    addr = %addr,
                    error = %e,
                    retry_in = ?state.backoff.current(),
                    "reconnect failed"
                );
            }
        }
    }
}
