//! Peer runtime: connection lifecycle and gossip broadcast.
//!
//! A [`Peer`] owns the connection table, the duplicate-suppression cache, and
//! the bounded delivery channel to the host. Each registered connection runs
//! one read-loop task; fresh inbound messages are offered to the host without
//! blocking and then re-flooded to every neighbor.

use crate::config::Config;
use crate::dedup::DedupCache;
use crate::error::PeerError;
use crate::metrics::{counters, gauges};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use rand::RngCore;
use rumor_common::{LineCodec, Message};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Maximum length of a remote id accepted before the handshake delimiter.
const MAX_ID_LEN: usize = 64;

type ConnWriter = Arc<tokio::sync::Mutex<FramedWrite<OwnedWriteHalf, LineCodec>>>;
type PeerConnectedFn = Box<dyn Fn(String, Option<String>) + Send + Sync>;

/// Live entry in the connection table.
#[derive(Clone)]
struct ConnHandle {
    writer: ConnWriter,
    /// Registration instant, used to guard removals against stale tasks.
    opened_at: Instant,
    /// Cancels this connection's read loop.
    cancel: CancellationToken,
}

struct PeerInner {
    id: String,
    addr: RwLock<String>,
    conns: DashMap<String, ConnHandle>,
    seen: DedupCache,
    delivery_tx: mpsc::Sender<Message>,
    max_connections: usize,
    connect_timeout: Duration,
    on_peer_connected: RwLock<Option<PeerConnectedFn>>,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

/// A node in the gossip overlay.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct Peer {
    inner: Arc<PeerInner>,
}

impl Peer {
    /// Creates a peer intending to listen on `addr`, together with the
    /// receiving end of its bounded delivery channel.
    pub fn new(addr: impl Into<String>, config: &Config) -> (Self, mpsc::Receiver<Message>) {
        let (delivery_tx, delivery_rx) = mpsc::channel(config.message_buffer_size.max(1));
        let peer = Self {
            inner: Arc::new(PeerInner {
                id: random_id(),
                addr: RwLock::new(addr.into()),
                conns: DashMap::new(),
                seen: DedupCache::new(config.dedup_cache_size),
                delivery_tx,
                max_connections: config.max_connections,
                connect_timeout: config.connect_timeout,
                on_peer_connected: RwLock::new(None),
                cancel: CancellationToken::new(),
                tasks: TaskTracker::new(),
            }),
        };
        (peer, delivery_rx)
    }

    /// This peer's id: 32 lowercase hex characters, fixed for the process
    /// lifetime.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// The address this peer listens on.
    #[must_use]
    pub fn addr(&self) -> String {
        self.inner.addr.read().clone()
    }

    /// Rewrites the listen address, typically after bind resolves port 0.
    pub fn set_addr(&self, addr: impl Into<String>) {
        *self.inner.addr.write() = addr.into();
    }

    /// Registers a callback invoked after every successful connection
    /// registration with the remote id and, when known, its address.
    pub fn set_peer_connected_callback(
        &self,
        callback: impl Fn(String, Option<String>) + Send + Sync + 'static,
    ) {
        *self.inner.on_peer_connected.write() = Some(Box::new(callback));
    }

    /// Query-and-record the message's fingerprint in the dedup cache.
    /// Returns `true` if it was already known.
    pub fn seen(&self, msg: &Message) -> bool {
        self.inner.seen.check_and_record(msg.fingerprint())
    }

    /// Number of registered connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.inner.conns.len()
    }

    /// Dials `addr`, performs the handshake, and registers the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the dial times out or fails, or if the handshake
    /// is violated; the stream is closed in every failure case.
    pub async fn connect(&self, addr: &str) -> Result<String, PeerError> {
        let mut stream = timeout(self.inner.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| PeerError::ConnectTimeout {
                addr: addr.to_string(),
            })??;
        let remote_id = handshake(&mut stream, &self.inner.id).await?;
        debug!(peer_id = %remote_id, addr, "outbound connection established");
        self.add_connection(remote_id.clone(), stream);
        Ok(remote_id)
    }

    /// Accepts connections until the listener fails or the peer shuts down.
    ///
    /// Each accepted stream goes through the handshake; failures close the
    /// stream and accepting continues. Streams over the connection limit are
    /// closed right after the handshake.
    ///
    /// # Errors
    ///
    /// Returns the listener's terminal error.
    pub async fn listen_and_serve(&self, listener: TcpListener) -> Result<(), PeerError> {
        loop {
            let (mut stream, remote_addr) = tokio::select! {
                () = self.inner.cancel.cancelled() => return Ok(()),
                res = listener.accept() => res?,
            };
            match handshake(&mut stream, &self.inner.id).await {
                Ok(remote_id) => {
                    if self.inner.conns.len() >= self.inner.max_connections {
                        warn!(
                            peer_id = %remote_id,
                            limit = self.inner.max_connections,
                            "connection limit reached, rejecting peer"
                        );
                        counters::connections_rejected_total("limit");
                        continue;
                    }
                    debug!(peer_id = %remote_id, addr = %remote_addr, "inbound connection established");
                    self.add_connection(remote_id, stream);
                }
                Err(e) => {
                    debug!(addr = %remote_addr, error = %e, "handshake failed");
                    counters::connections_rejected_total("handshake");
                }
            }
        }
    }

    /// Registers `stream` under `remote_id` and starts its read loop.
    ///
    /// An existing entry for the same id is evicted and closed; the table
    /// never holds two connections for one peer.
    pub fn add_connection(&self, remote_id: String, stream: TcpStream) {
        let _ = stream.set_nodelay(true);
        let remote_addr = stream.peer_addr().ok().map(|a| a.to_string());
        let (read_half, write_half) = stream.into_split();

        let cancel = self.inner.cancel.child_token();
        let handle = ConnHandle {
            writer: Arc::new(tokio::sync::Mutex::new(FramedWrite::new(
                write_half,
                LineCodec::new(),
            ))),
            opened_at: Instant::now(),
            cancel: cancel.clone(),
        };
        let opened_at = handle.opened_at;

        if let Some(old) = self.inner.conns.insert(remote_id.clone(), handle) {
            debug!(peer_id = %remote_id, "replacing existing connection");
            old.cancel.cancel();
        } else {
            gauges::inc_connections_active();
        }

        if let Some(callback) = self.inner.on_peer_connected.read().as_ref() {
            callback(remote_id.clone(), remote_addr);
        }

        let peer = self.clone();
        self.inner.tasks.spawn(async move {
            peer.read_loop(&remote_id, read_half, cancel).await;
            peer.remove_connection_if(&remote_id, opened_at);
        });
    }

    /// Removes and closes the connection for `remote_id`. Idempotent on
    /// unknown ids.
    pub fn remove_connection(&self, remote_id: &str) {
        if let Some((_, handle)) = self.inner.conns.remove(remote_id) {
            handle.cancel.cancel();
            gauges::dec_connections_active();
            debug!(peer_id = %remote_id, "connection removed");
        }
    }

    /// Removes the entry only if it is still the registration made at
    /// `opened_at`, so a stale task never evicts its replacement.
    fn remove_connection_if(&self, remote_id: &str, opened_at: Instant) {
        let removed = self
            .inner
            .conns
            .remove_if(remote_id, |_, handle| handle.opened_at == opened_at);
        if let Some((_, handle)) = removed {
            handle.cancel.cancel();
            gauges::dec_connections_active();
        }
    }

    /// Encodes `msg` once and writes it to every registered connection.
    ///
    /// The local fingerprint is recorded first, so the message is suppressed
    /// if it ever echoes back. A failing destination is removed from the
    /// table and the remaining destinations still receive the frame.
    ///
    /// # Errors
    ///
    /// Returns the first write error observed; partial success with an error
    /// return is expected.
    pub async fn broadcast(&self, msg: &Message) -> Result<(), PeerError> {
        let line = msg.encode()?;
        self.inner.seen.check_and_record(msg.fingerprint());

        let conns: Vec<(String, ConnHandle)> = self
            .inner
            .conns
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut first_err = None;
        for (id, handle) in conns {
            let result = handle.writer.lock().await.send(line.as_str()).await;
            if let Err(e) = result {
                debug!(peer_id = %id, error = %e, "write failed, dropping connection");
                counters::messages_dropped_total("write_error");
                self.remove_connection_if(&id, handle.opened_at);
                if first_err.is_none() {
                    first_err = Some(PeerError::Write {
                        peer_id: id,
                        source: e,
                    });
                }
            }
        }
        counters::messages_broadcast_total();
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Signals every task owned by this peer to stop, closes all
    /// connections, and waits for the tasks to exit.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let ids: Vec<String> = self
            .inner
            .conns
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for id in ids {
            self.remove_connection(&id);
        }
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        info!(peer_id = %self.inner.id, "peer stopped");
    }

    async fn read_loop(&self, remote_id: &str, read_half: OwnedReadHalf, cancel: CancellationToken) {
        let mut frames = FramedRead::new(read_half, LineCodec::new());
        loop {
            let frame = tokio::select! {
                () = cancel.cancelled() => return,
                frame = frames.next() => frame,
            };
            let line = match frame {
                Some(Ok(line)) => line,
                Some(Err(e)) => {
                    debug!(peer_id = %remote_id, error = %e, "read error");
                    return;
                }
                None => return,
            };
            // A malformed record must not kill the connection.
            let msg = match Message::decode(&line) {
                Ok(msg) => msg,
                Err(e) => {
                    debug!(peer_id = %remote_id, error = %e, "ignoring malformed frame");
                    counters::messages_dropped_total("malformed");
                    continue;
                }
            };
            if self.seen(&msg) {
                counters::messages_dropped_total("duplicate");
                continue;
            }
            counters::messages_received_total();
            match self.inner.delivery_tx.try_send(msg.clone()) {
                Ok(()) => counters::messages_delivered_total(),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    // Dropped from local delivery only; the flood goes on.
                    debug!(peer_id = %remote_id, "delivery buffer full, dropping message");
                    counters::messages_dropped_total("backpressure");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
            if let Err(e) = self.broadcast(&msg).await {
                debug!(error = %e, "rebroadcast failed");
            }
        }
    }
}

/// Exchanges peer ids over a fresh stream.
///
/// Both sides write their own id followed by a line feed, then read bytes
/// one at a time until the remote delimiter arrives. Accumulating more than
/// [`MAX_ID_LEN`] bytes before the delimiter aborts the handshake.
async fn handshake<S>(stream: &mut S, local_id: &str) -> Result<String, PeerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(local_id.as_bytes()).await?;
    stream.write_all(b"\n").await?;

    let mut id = Vec::with_capacity(MAX_ID_LEN);
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return Err(PeerError::HandshakeEof);
        }
        if byte[0] == b'\n' {
            break;
        }
        id.push(byte[0]);
        if id.len() > MAX_ID_LEN {
            return Err(PeerError::IdTooLong);
        }
    }
    let id = String::from_utf8_lossy(&id).trim().to_string();
    if id.is_empty() {
        return Err(PeerError::EmptyId);
    }
    Ok(id)
}

/// 16 cryptographic-random bytes rendered as 32 lowercase hex characters.
fn random_id() -> String {
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
