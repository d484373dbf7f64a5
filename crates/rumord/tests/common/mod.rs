#![allow(dead_code)] // each test binary uses a different subset of helpers

use futures_util::{SinkExt, StreamExt};
use rumor_common::{LineCodec, Message};
use rumord::config::Config;
use rumord::peer::Peer;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

/// Config with short timeouts suitable for tests.
pub fn test_config() -> Config {
    Config {
        connect_timeout: Duration::from_secs(1),
        heartbeat_interval: Duration::from_millis(20),
        heartbeat_timeout: Duration::from_millis(50),
        ..Config::default()
    }
}

/// Starts a peer with a live accept loop on an ephemeral port.
pub async fn start_peer(config: &Config) -> (Peer, mpsc::Receiver<Message>, String) {
    let (peer, delivery_rx) = Peer::new("127.0.0.1:0", config);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    peer.set_addr(addr.clone());

    let serve = peer.clone();
    tokio::spawn(async move {
        if let Err(e) = serve.listen_and_serve(listener).await {
            eprintln!("listener error in test: {e}");
        }
    });

    (peer, delivery_rx, addr)
}

/// Receives the next delivered message, or `None` if `dur` elapses first.
pub async fn recv_within(
    rx: &mut mpsc::Receiver<Message>,
    dur: Duration,
) -> Option<Message> {
    tokio::time::timeout(dur, rx.recv()).await.ok().flatten()
}

/// Polls `cond` for up to a second.
pub async fn wait_for(mut cond: impl FnMut() -> bool) {
    for _ in 0..100 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 1s");
}

/// A connected pair of TCP streams on loopback.
pub async fn tcp_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (accepted, dialed) = tokio::join!(
        async { listener.accept().await.unwrap().0 },
        async { TcpStream::connect(addr).await.unwrap() },
    );
    (accepted, dialed)
}

/// A hand-driven peer speaking the wire protocol directly.
pub struct ScriptedPeer {
    pub remote_id: String,
    framed: Framed<TcpStream, LineCodec>,
}

impl ScriptedPeer {
    /// Dials `addr` and performs the id handshake as `local_id`.
    pub async fn connect(addr: &str, local_id: &str) -> Self {
        use tokio::io::AsyncWriteExt;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(format!("{local_id}\n").as_bytes())
            .await
            .unwrap();

        let mut id_buf = Vec::new();
        loop {
            let byte = stream.read_u8().await.unwrap();
            if byte == b'\n' {
                break;
            }
            id_buf.push(byte);
        }

        Self {
            remote_id: String::from_utf8(id_buf).unwrap(),
            framed: Framed::new(stream, LineCodec::new()),
        }
    }

    /// Sends one message frame.
    pub async fn send(&mut self, msg: &Message) {
        let line = msg.encode().unwrap();
        self.framed.send(line.as_str()).await.unwrap();
    }

    /// Sends raw bytes as one frame, without encoding.
    pub async fn send_raw(&mut self, line: &str) {
        self.framed.send(line).await.unwrap();
    }

    /// Receives and decodes the next frame, or `None` on timeout/close.
    pub async fn recv(&mut self, dur: Duration) -> Option<Message> {
        match tokio::time::timeout(dur, self.framed.next()).await {
            Ok(Some(Ok(line))) => Some(Message::decode(&line).unwrap()),
            _ => None,
        }
    }

    /// Asserts the remote side closes the connection within `dur`.
    pub async fn assert_closed(&mut self, dur: Duration) {
        match tokio::time::timeout(dur, self.framed.next()).await {
            Ok(None) | Ok(Some(Err(_))) => {}
            Ok(Some(Ok(_))) => panic!("expected close, got a frame"),
            Err(_) => panic!("connection still open after {dur:?}"),
        }
    }
}
