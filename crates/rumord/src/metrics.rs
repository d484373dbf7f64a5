use crate::heartbeat::HeartbeatManager;
use crate::peer::Peer;
use axum::{http::StatusCode, response::Json, routing::get, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    peer_id: String,
}

/// Readiness check response.
#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    ready: bool,
    connections: usize,
}

/// Node status response.
#[derive(Serialize)]
struct StatusResponse {
    peer_id: String,
    addr: String,
    connections: usize,
    monitored_peers: usize,
    heartbeats_sent: u64,
    heartbeats_received: u64,
}

/// Live node state surfaced by the health, readiness, and status routes.
#[derive(Clone)]
pub struct NodeStatus {
    peer: Peer,
    heartbeat: HeartbeatManager,
    ready: Arc<AtomicBool>,
}

impl NodeStatus {
    /// Creates a status view over the running node.
    #[must_use]
    pub fn new(peer: Peer, heartbeat: HeartbeatManager) -> Self {
        Self {
            peer,
            heartbeat,
            ready: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Mark the node as ready to serve.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    /// Check if the node is ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }
}

/// # Errors
///
/// Returns an error if binding the metrics HTTP server fails.
pub async fn start_metrics_server(addr: SocketAddr, status: NodeStatus) -> anyhow::Result<()> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    let app = Router::new()
        .route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
        .route(
            "/health",
            get({
                let status = status.clone();
                move || health_handler(status.clone())
            }),
        )
        .route(
            "/ready",
            get({
                let status = status.clone();
                move || ready_handler(status.clone())
            }),
        )
        .route("/status", get(move || status_handler(status.clone())));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("metrics server listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Health check handler - returns 200 if the node is running.
async fn health_handler(status: NodeStatus) -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy",
            peer_id: status.peer.id().to_string(),
        }),
    )
}

/// Readiness check handler - returns 200 if ready, 503 if not.
async fn ready_handler(status: NodeStatus) -> (StatusCode, Json<ReadyResponse>) {
    let connections = status.peer.connection_count();
    if status.is_ready() {
        (
            StatusCode::OK,
            Json(ReadyResponse {
                status: "ready",
                ready: true,
                connections,
            }),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyResponse {
                status: "not ready",
                ready: false,
                connections,
            }),
        )
    }
}

/// Status handler - reports the node's overlay view.
async fn status_handler(status: NodeStatus) -> Json<StatusResponse> {
    let stats = status.heartbeat.stats();
    Json(StatusResponse {
        peer_id: status.peer.id().to_string(),
        addr: status.peer.addr(),
        connections: status.peer.connection_count(),
        monitored_peers: stats.active_peers,
        heartbeats_sent: stats.sent,
        heartbeats_received: stats.received,
    })
}

/// Connection count gauges.
pub mod gauges {
    /// Increment the active connections gauge.
    pub fn inc_connections_active() {
        metrics::gauge!("rumor_connections_active").increment(1.0);
    }

    /// Decrement the active connections gauge.
    pub fn dec_connections_active() {
        metrics::gauge!("rumor_connections_active").decrement(1.0);
    }
}

/// Event counters.
pub mod counters {
    /// Increment the broadcast counter.
    pub fn messages_broadcast_total() {
        metrics::counter!("rumor_messages_broadcast_total").increment(1);
    }

    /// Increment the fresh-inbound-messages counter.
    pub fn messages_received_total() {
        metrics::counter!("rumor_messages_received_total").increment(1);
    }

    /// Increment the delivered-to-host counter.
    pub fn messages_delivered_total() {
        metrics::counter!("rumor_messages_delivered_total").increment(1);
    }

    /// Increment the dropped-messages counter with the given reason label.
    pub fn messages_dropped_total(reason: &'static str) {
        metrics::counter!("rumor_messages_dropped_total", "reason" => reason).increment(1);
    }

    /// Record a rejected inbound connection with the given reason label.
    pub fn connections_rejected_total(reason: &'static str) {
        metrics::counter!("rumor_connections_rejected_total", "reason" => reason).increment(1);
    }

    /// Increment the emitted-heartbeats counter.
    pub fn heartbeats_sent_total() {
        metrics::counter!("rumor_heartbeats_sent_total").increment(1);
    }

    /// Increment the peers-declared-dead counter.
    pub fn peers_dead_total() {
        metrics::counter!("rumor_peers_dead_total").increment(1);
    }

    /// Increment the reconnect-attempts counter.
    pub fn reconnect_attempts_total() {
        metrics::counter!("rumor_reconnect_attempts_total").increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use rumor_common::Message;

    fn test_status() -> NodeStatus {
        let (peer, _delivery) = Peer::new("127.0.0.1:0", &Config::default());
        let heartbeat = HeartbeatManager::new(&Config::default(), peer.id(), |_| {}, |_| {});
        NodeStatus::new(peer, heartbeat)
    }

    #[tokio::test]
    async fn health_reports_the_peer_id() {
        let status = test_status();
        let expected = status.peer.id().to_string();

        let (code, Json(body)) = health_handler(status).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body.status, "healthy");
        assert_eq!(body.peer_id, expected);
    }

    #[tokio::test]
    async fn readiness_toggles_with_set_ready() {
        let status = test_status();
        assert!(status.is_ready());

        let (code, Json(body)) = ready_handler(status.clone()).await;
        assert_eq!(code, StatusCode::OK);
        assert!(body.ready);
        assert_eq!(body.connections, 0);

        status.set_ready(false);
        let (code, Json(body)) = ready_handler(status).await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!body.ready);
    }

    #[tokio::test]
    async fn status_reflects_the_liveness_view() {
        let status = test_status();
        status.peer.set_addr("127.0.0.1:4242");
        status.heartbeat.add_peer("p1", None);
        status
            .heartbeat
            .process_heartbeat(&Message::heartbeat("p1", 1));

        let Json(body) = status_handler(status.clone()).await;
        assert_eq!(body.peer_id, status.peer.id());
        assert_eq!(body.addr, "127.0.0.1:4242");
        assert_eq!(body.connections, 0);
        assert_eq!(body.monitored_peers, 1);
        assert_eq!(body.heartbeats_received, 1);
    }
}
