//! Bridge configuration with validation.
//!
//! Values arrive already resolved (see the runtime crate's environment
//! loader); this module only holds defaults and checks consistency.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Upper bound accepted for any configured timeout or interval
pub const MAX_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Main bridge configuration
#[derive(Debug, Clone, Default)]
pub struct BridgeConfig {
    /// HTTP listener and upgrade route
    pub http: HttpConfig,
    /// Broker endpoints and topics
    pub broker: BrokerConfig,
    /// Per-connection pump settings
    pub websocket: WebSocketConfig,
    /// Request timeouts
    pub timeouts: TimeoutConfig,
}

impl BridgeConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.http.ws_path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "ws_path must start with '/': {}",
                self.http.ws_path
            )));
        }

        if self.broker.brokers.iter().all(|b| b.trim().is_empty()) {
            return Err(ConfigError::MissingBrokers);
        }
        if self.broker.request_topic.is_empty() || self.broker.response_topic.is_empty() {
            return Err(ConfigError::Invalid("topic names cannot be empty".into()));
        }

        if self.websocket.outbound_capacity == 0 {
            return Err(ConfigError::InvalidLimit(
                "outbound_capacity cannot be 0".into(),
            ));
        }
        if self.websocket.max_message_size == 0 {
            return Err(ConfigError::InvalidLimit(
                "max_message_size cannot be 0".into(),
            ));
        }

        if self.timeouts.request.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "request timeout cannot be 0".into(),
            ));
        }
        if self.websocket.write_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "write timeout cannot be 0".into(),
            ));
        }
        if self.timeouts.sweep_interval.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "sweep interval cannot be 0".into(),
            ));
        }
        if self.websocket.ping_interval.is_zero()
            || self.websocket.ping_interval >= self.websocket.liveness_timeout
        {
            return Err(ConfigError::InvalidTimeout(format!(
                "ping interval ({:?}) must be non-zero and shorter than the liveness timeout ({:?})",
                self.websocket.ping_interval, self.websocket.liveness_timeout
            )));
        }

        for (name, value) in [
            ("request timeout", self.timeouts.request),
            ("sweep interval", self.timeouts.sweep_interval),
            ("send timeout", self.broker.send_timeout),
            ("ping interval", self.websocket.ping_interval),
            ("liveness timeout", self.websocket.liveness_timeout),
            ("write timeout", self.websocket.write_timeout),
        ] {
            if value > MAX_TIMEOUT {
                return Err(ConfigError::InvalidTimeout(format!(
                    "{} ({:?}) exceeds the {:?} ceiling",
                    name, value, MAX_TIMEOUT
                )));
            }
        }

        Ok(())
    }

    /// Stale pending entries older than this are swept
    pub fn pending_ttl(&self) -> Duration {
        self.timeouts.request.saturating_mul(2)
    }
}

/// HTTP listener configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub listen_addr: SocketAddr,
    /// Route that accepts the WebSocket upgrade
    pub ws_path: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8080),
            ws_path: "/api/chat/ws".to_string(),
        }
    }
}

/// Broker connection configuration
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Bootstrap servers
    pub brokers: Vec<String>,
    /// Topic requests are published to
    pub request_topic: String,
    /// Topic replies are consumed from
    pub response_topic: String,
    /// Consumer group prefix; a per-process suffix keeps instances independent
    pub consumer_group: String,
    /// Upper bound on a single produce call
    pub send_timeout: Duration,
}

impl BrokerConfig {
    pub fn bootstrap_servers(&self) -> String {
        self.brokers
            .iter()
            .map(|b| b.trim())
            .filter(|b| !b.is_empty())
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            brokers: vec!["localhost:9092".to_string()],
            request_topic: "request_topic".to_string(),
            response_topic: "response_topic".to_string(),
            consumer_group: "ws-gateway".to_string(),
            send_timeout: Duration::from_secs(5),
        }
    }
}

/// Per-connection pump configuration
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Bounded outbound queue size
    pub outbound_capacity: usize,
    /// Period of the liveness probe
    pub ping_interval: Duration,
    /// Connection is dropped when nothing is read for this long
    pub liveness_timeout: Duration,
    /// Deadline for each socket write
    pub write_timeout: Duration,
    /// Largest accepted inbound frame in bytes
    pub max_message_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: 256,
            ping_interval: Duration::from_secs(54),
            liveness_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(10),
            max_message_size: 1024 * 1024, // 1MB
        }
    }
}

/// Timeout configuration
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Wait for a broker reply, applied to every request
    pub request: Duration,
    /// How often stale pending entries are swept
    pub sweep_interval: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("no broker endpoints configured")]
    MissingBrokers,
    #[error("invalid limit: {0}")]
    InvalidLimit(String),
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
    #[error("invalid duration '{0}'")]
    InvalidDuration(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Parse a duration such as `250ms`, `30s`, `2m` or a bare number of seconds.
pub fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    let s = s.trim();
    let invalid = || ConfigError::InvalidDuration(s.to_string());

    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| invalid())
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| invalid())
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim()
            .parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
            .ok_or_else(invalid)
    } else {
        s.parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| invalid())
    }
}
