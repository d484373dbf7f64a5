#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use futures_util::future::BoxFuture;
use rumord::chat;
use rumord::config::{Args, Config};
use rumord::heartbeat::HeartbeatManager;
use rumord::metrics::{start_metrics_server, NodeStatus};
use rumord::peer::Peer;
use rumord::reconnect::ReconnectManager;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config: Config = args.into();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .init();

    if let Err(e) = config.validate() {
        anyhow::bail!("configuration error: {}", e);
    }

    let (peer, delivery_rx) = Peer::new(config.listen_addr.clone(), &config);

    let listener = TcpListener::bind(config.listen_addr.as_str()).await?;
    let local_addr = listener.local_addr()?;
    peer.set_addr(local_addr.to_string());
    info!(peer_id = %peer.id(), "listening on {}", local_addr);
    println!("rumor node {} listening on {}", peer.id(), local_addr);
    println!("type a message and press enter to chat, ctrl-c to exit");

    // The heartbeat manager hands outgoing heartbeats to the peer's broadcast
    // path and reports deaths back into the connection table.
    let heartbeat = HeartbeatManager::new(
        &config,
        peer.id(),
        {
            let peer = peer.clone();
            move |msg| {
                let peer = peer.clone();
                tokio::spawn(async move {
                    if let Err(e) = peer.broadcast(&msg).await {
                        debug!(error = %e, "heartbeat broadcast failed");
                    }
                });
            }
        },
        {
            let peer = peer.clone();
            move |peer_id: String| {
                peer.remove_connection(&peer_id);
                println!("peer {} disconnected (timeout)", chat::short_id(&peer_id));
            }
        },
    );

    // Every registered connection shows up in the liveness map.
    {
        let heartbeat = heartbeat.clone();
        peer.set_peer_connected_callback(move |id, addr| heartbeat.add_peer(id, addr));
    }

    let node_status = NodeStatus::new(peer.clone(), heartbeat.clone());
    tokio::spawn({
        let metrics_addr = config.metrics_addr;
        let node_status = node_status.clone();
        async move {
            if let Err(e) = start_metrics_server(metrics_addr, node_status).await {
                warn!("metrics server error: {}", e);
            }
        }
    });

    let reconnect = ReconnectManager::new(
        {
            let peer = peer.clone();
            Arc::new(
                move |addr: String| -> BoxFuture<'static, Result<String, rumord::PeerError>> {
                    let peer = peer.clone();
                    Box::pin(async move { peer.connect(&addr).await })
                },
            )
        },
        {
            let heartbeat = heartbeat.clone();
            Arc::new(move |addr: &str| heartbeat.peer_list().iter().any(|a| a == addr))
        },
        {
            let heartbeat = heartbeat.clone();
            Arc::new(move |id: String, addr: String| heartbeat.add_peer(id, Some(addr)))
        },
    );

    for addr in &config.peers {
        reconnect.add_peer(addr.clone());
        match peer.connect(addr).await {
            Ok(remote_id) => {
                info!(peer_id = %remote_id, addr = %addr, "connected to peer");
                heartbeat.add_peer(remote_id, Some(addr.clone()));
            }
            Err(e) => {
                warn!(addr = %addr, error = %e, "initial connect failed, will retry");
            }
        }
    }

    heartbeat.start();
    reconnect.start();

    let cancel = CancellationToken::new();
    let serve = tokio::spawn({
        let peer = peer.clone();
        async move { peer.listen_and_serve(listener).await }
    });
    let input = tokio::spawn(chat::input_loop(peer.clone(), cancel.child_token()));
    let delivery = tokio::spawn(chat::delivery_loop(
        delivery_rx,
        heartbeat.clone(),
        cancel.child_token(),
    ));

    tokio::select! {
        result = serve => {
            if let Ok(Err(e)) = result {
                error!("listener error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
        }
    }

    node_status.set_ready(false);
    cancel.cancel();
    reconnect.stop().await;
    heartbeat.stop().await;
    peer.shutdown().await;
    let _ = delivery.await;
    let _ = input.await;

    info!("node stopped");
    Ok(())
}
