use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

/// CLI arguments for the gossip node.
#[derive(Parser, Debug, Clone)]
#[command(name = "rumord")]
#[command(about = "Decentralized gossip chat node")]
#[command(version)]
pub struct Args {
    /// Address to listen on (host:port; port 0 picks an ephemeral port).
    #[arg(long, default_value = "127.0.0.1:0", env = "RUMOR_LISTEN_ADDR")]
    pub listen: String,
    /// Peer address to connect to (may be repeated; env is comma-separated).
    #[arg(long = "peer", env = "RUMOR_PEERS", value_delimiter = ',')]
    pub peers: Vec<String>,
    /// Maximum concurrent peer connections.
    #[arg(long, default_value = "50", env = "RUMOR_MAX_CONNECTIONS")]
    pub max_connections: usize,
    /// Dial timeout in seconds.
    #[arg(long, default_value = "10", env = "RUMOR_CONNECT_TIMEOUT")]
    pub connect_timeout: u64,
    /// Seconds between outgoing heartbeats.
    #[arg(long, default_value = "30", env = "RUMOR_HEARTBEAT_INTERVAL")]
    pub heartbeat_interval: u64,
    /// Seconds without a heartbeat before a peer is declared dead.
    #[arg(long, default_value = "5", env = "RUMOR_HEARTBEAT_TIMEOUT")]
    pub heartbeat_timeout: u64,
    /// Capacity of the inbound delivery buffer.
    #[arg(long, default_value = "16", env = "RUMOR_MESSAGE_BUFFER_SIZE")]
    pub message_buffer_size: usize,
    /// Capacity of the duplicate-suppression cache.
    #[arg(long, default_value = "100", env = "RUMOR_DEDUP_CACHE_SIZE")]
    pub dedup_cache_size: usize,
    /// Socket address for the metrics endpoint.
    #[arg(long, default_value = "127.0.0.1:9600", env = "RUMOR_METRICS_ADDR")]
    pub metrics_addr: SocketAddr,
    /// Log filter (e.g. "info", "rumord=debug").
    #[arg(long, default_value = "info", env = "RUMOR_LOG_LEVEL")]
    pub log_level: String,
}

/// Runtime configuration derived from [`Args`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to listen on.
    pub listen_addr: String,
    /// Bootstrap peer addresses dialed at startup and kept alive afterwards.
    pub peers: Vec<String>,
    /// Maximum concurrent peer connections.
    pub max_connections: usize,
    /// Dial timeout.
    pub connect_timeout: Duration,
    /// Interval between outgoing heartbeats.
    pub heartbeat_interval: Duration,
    /// Silence window after which a peer is declared dead.
    pub heartbeat_timeout: Duration,
    /// Capacity of the inbound delivery buffer.
    pub message_buffer_size: usize,
    /// Capacity of the duplicate-suppression cache.
    pub dedup_cache_size: usize,
    /// Socket address for the metrics endpoint.
    pub metrics_addr: SocketAddr,
    /// Log filter.
    pub log_level: String,
}

impl Config {
    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid option.
    pub fn validate(&self) -> Result<(), String> {
        if self.listen_addr.is_empty() {
            return Err("listen_addr cannot be empty".to_string());
        }
        if self.peers.iter().any(String::is_empty) {
            return Err("peer addresses cannot be empty".to_string());
        }
        if self.max_connections < 1 {
            return Err("max_connections must be at least 1".to_string());
        }
        if self.connect_timeout.is_zero() {
            return Err("connect_timeout must be positive".to_string());
        }
        if self.heartbeat_interval.is_zero() {
            return Err("heartbeat_interval must be positive".to_string());
        }
        if self.heartbeat_timeout.is_zero() {
            return Err("heartbeat_timeout must be positive".to_string());
        }
        if self.message_buffer_size < 1 {
            return Err("message_buffer_size must be at least 1".to_string());
        }
        if self.dedup_cache_size < 1 {
            return Err("dedup_cache_size must be at least 1".to_string());
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:0".to_string(),
            peers: Vec::new(),
            max_connections: 50,
            connect_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(5),
            message_buffer_size: 16,
            dedup_cache_size: 100,
            metrics_addr: SocketAddr::from(([127, 0, 0, 1], 9600)),
            log_level: "info".to_string(),
        }
    }
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Self {
            listen_addr: args.listen,
            peers: args
                .peers
                .iter()
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect(),
            max_connections: args.max_connections,
            connect_timeout: Duration::from_secs(args.connect_timeout),
            heartbeat_interval: Duration::from_secs(args.heartbeat_interval),
            heartbeat_timeout: Duration::from_secs(args.heartbeat_timeout),
            message_buffer_size: args.message_buffer_size,
            dedup_cache_size: args.dedup_cache_size,
            metrics_addr: args.metrics_addr,
            log_level: args.log_level,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_passes() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn empty_listen_addr() {
        let mut c = Config::default();
        c.listen_addr = String::new();
        assert!(c.validate().unwrap_err().contains("listen_addr"));
    }

    #[test]
    fn empty_peer_entry() {
        let mut c = Config::default();
        c.peers = vec!["127.0.0.1:9000".to_string(), String::new()];
        assert!(c.validate().unwrap_err().contains("peer"));
    }

    #[test]
    fn max_connections_zero() {
        let mut c = Config::default();
        c.max_connections = 0;
        assert!(c.validate().unwrap_err().contains("max_connections"));
    }

    #[test]
    fn zero_durations_rejected() {
        for field in ["connect_timeout", "heartbeat_interval", "heartbeat_timeout"] {
            let mut c = Config::default();
            match field {
                "connect_timeout" => c.connect_timeout = Duration::ZERO,
                "heartbeat_interval" => c.heartbeat_interval = Duration::ZERO,
                _ => c.heartbeat_timeout = Duration::ZERO,
            }
            assert!(c.validate().unwrap_err().contains(field), "field {field}");
        }
    }

    #[test]
    fn message_buffer_size_zero() {
        let mut c = Config::default();
        c.message_buffer_size = 0;
        assert!(c.validate().unwrap_err().contains("message_buffer_size"));
    }

    #[test]
    fn dedup_cache_size_zero() {
        let mut c = Config::default();
        c.dedup_cache_size = 0;
        assert!(c.validate().unwrap_err().contains("dedup_cache_size"));
    }

    #[test]
    fn args_convert_trims_peer_whitespace() {
        let args = Args::parse_from([
            "rumord",
            "--peer",
            " 127.0.0.1:9000 ",
            "--peer",
            "10.0.0.2:9001",
        ]);
        let config: Config = args.into();
        assert_eq!(
            config.peers,
            vec!["127.0.0.1:9000".to_string(), "10.0.0.2:9001".to_string()]
        );
    }

    #[test]
    fn args_convert_seconds_to_durations() {
        let args = Args::parse_from(["rumord", "--heartbeat-interval", "2", "--connect-timeout", "3"]);
        let config: Config = args.into();
        assert_eq!(config.heartbeat_interval, Duration::from_secs(2));
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.heartbeat_timeout, Duration::from_secs(5));
    }

    #[test]
    fn boundary_values_valid() {
        let mut c = Config::default();
        c.max_connections = 1;
        c.message_buffer_size = 1;
        c.dedup_cache_size = 1;
        c.connect_timeout = Duration::from_millis(1);
        c.heartbeat_interval = Duration::from_millis(1);
        c.heartbeat_timeout = Duration::from_millis(1);
        assert!(c.validate().is_ok());
    }
}
