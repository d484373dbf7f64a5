//! Interactive chat front-end.
//!
//! Two loops: stdin lines become chat broadcasts, and the peer's delivery
//! channel is drained to the terminal while feeding the liveness manager.

use crate::heartbeat::HeartbeatManager;
use crate::peer::Peer;
use rumor_common::{Message, MessageType};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// First eight characters of a peer id, for terminal output.
#[must_use]
pub fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

/// Reads lines from stdin and broadcasts each as a chat message.
///
/// Runs until stdin closes or `cancel` fires.
pub async fn input_loop(peer: Peer, cancel: CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut sequence_no = 1u64;
    loop {
        let line = tokio::select! {
            () = cancel.cancelled() => return,
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(text)) => {
                if text.trim().is_empty() {
                    continue;
                }
                let msg = Message::chat(peer.id(), sequence_no, text);
                sequence_no += 1;
                if let Err(e) = peer.broadcast(&msg).await {
                    error!(error = %e, "failed to broadcast message");
                }
            }
            Ok(None) => return,
            Err(e) => {
                error!(error = %e, "stdin read error");
                return;
            }
        }
    }
}

/// Drains delivered messages: chat goes to the terminal, heartbeats feed the
/// liveness manager, anything else is logged.
pub async fn delivery_loop(
    mut delivery: mpsc::Receiver<Message>,
    heartbeat: HeartbeatManager,
    cancel: CancellationToken,
) {
    loop {
        let msg = tokio::select! {
            () = cancel.cancelled() => return,
            msg = delivery.recv() => match msg {
                Some(msg) => msg,
                None => return,
            },
        };
        heartbeat.update_last_seen(&msg.sender_id);
        match msg.kind {
            MessageType::Heartbeat => {
                heartbeat.process_heartbeat(&msg);
                debug!(peer_id = %msg.sender_id, seq = msg.sequence_no, "heartbeat received");
            }
            MessageType::Chat => {
                println!("[{}] {}", short_id(&msg.sender_id), msg.payload);
            }
            MessageType::PeerList => {
                debug!(peer_id = %msg.sender_id, "peer list received");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_id_truncates_long_ids() {
        assert_eq!(short_id("0123456789abcdef"), "01234567");
    }

    #[test]
    fn short_id_keeps_short_ids_whole() {
        assert_eq!(short_id("abc"), "abc");
    }

    #[test]
    fn short_id_survives_multibyte_input() {
        // ids are normally hex, but remote input is untrusted
        assert_eq!(short_id("héllo-wörld"), "héllo-w");
        // a char straddling the cut point falls back to the whole id
        assert_eq!(short_id("aaaaaaaéx"), "aaaaaaaéx");
    }
}
