//! Gateway configuration from environment variables.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `LOCAL_ADDRESS` | `0.0.0.0:8080` |
//! | `WS_PATH` | `/api/chat/ws` |
//! | `KAFKA_BROKERS` | `localhost:9092` (comma separated) |
//! | `KAFKA_REQUEST_TOPIC` | `request_topic` |
//! | `KAFKA_RESPONSE_TOPIC` | `response_topic` |
//! | `KAFKA_CONSUMER_GROUP` | `ws-gateway` |
//! | `KAFKA_RESPONSE_TIMEOUT` | `30s` |
//! | `KAFKA_SEND_TIMEOUT` | `5s` |
//! | `WS_OUTBOUND_CAPACITY` | `256` |
//! | `WS_PING_INTERVAL` | `54s` |
//! | `WS_LIVENESS_TIMEOUT` | `60s` |
//! | `WS_WRITE_TIMEOUT` | `10s` |
//! | `WS_MAX_MESSAGE_SIZE` | `1048576` |
//!
//! Unset or empty variables take the default. Unparsable values also take the
//! default, with a warning.

use kafka_bridge::domain::parse_duration;
use kafka_bridge::BridgeConfig;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Load configuration from the process environment
pub fn load_config() -> BridgeConfig {
    from_lookup(|key| env::var(key).ok())
}

/// Build configuration reading variables through `lookup`
pub fn from_lookup<F>(lookup: F) -> BridgeConfig
where
    F: Fn(&str) -> Option<String>,
{
    let env = Env { lookup };
    let mut config = BridgeConfig::default();

    config.http.listen_addr = env.parsed("LOCAL_ADDRESS", config.http.listen_addr);
    config.http.ws_path = env.string("WS_PATH", config.http.ws_path);

    if let Some(brokers) = env.get("KAFKA_BROKERS") {
        let brokers: Vec<String> = brokers
            .split(',')
            .map(|b| b.trim().to_string())
            .filter(|b| !b.is_empty())
            .collect();
        if brokers.is_empty() {
            warn!("KAFKA_BROKERS lists no brokers, using default");
        } else {
            config.broker.brokers = brokers;
        }
    }
    config.broker.request_topic = env.string("KAFKA_REQUEST_TOPIC", config.broker.request_topic);
    config.broker.response_topic =
        env.string("KAFKA_RESPONSE_TOPIC", config.broker.response_topic);
    config.broker.consumer_group =
        env.string("KAFKA_CONSUMER_GROUP", config.broker.consumer_group);
    config.broker.send_timeout = env.duration("KAFKA_SEND_TIMEOUT", config.broker.send_timeout);

    config.timeouts.request = env.duration("KAFKA_RESPONSE_TIMEOUT", config.timeouts.request);

    let ws = &mut config.websocket;
    ws.outbound_capacity = env.parsed("WS_OUTBOUND_CAPACITY", ws.outbound_capacity);
    ws.ping_interval = env.duration("WS_PING_INTERVAL", ws.ping_interval);
    ws.liveness_timeout = env.duration("WS_LIVENESS_TIMEOUT", ws.liveness_timeout);
    ws.write_timeout = env.duration("WS_WRITE_TIMEOUT", ws.write_timeout);
    ws.max_message_size = env.parsed("WS_MAX_MESSAGE_SIZE", ws.max_message_size);

    config
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, default: String) -> String {
        self.get(key).unwrap_or(default)
    }

    fn parsed<T>(&self, key: &str, default: T) -> T
    where
        T: FromStr + std::fmt::Debug,
    {
        let Some(raw) = self.get(key) else {
            return default;
        };
        match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(key = key, value = %raw, default = ?default, "Invalid value, using default");
                default
            }
        }
    }

    fn duration(&self, key: &str, default: Duration) -> Duration {
        let Some(raw) = self.get(key) else {
            return default;
        };
        match parse_duration(&raw) {
            Ok(value) => value,
            Err(e) => {
                warn!(key = key, error = %e, default = ?default, "Invalid duration, using default");
                default
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> BridgeConfig {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        from_lookup(move |key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = config_from(&[]);
        assert_eq!(config.http.listen_addr.to_string(), "0.0.0.0:8080");
        assert_eq!(config.http.ws_path, "/api/chat/ws");
        assert_eq!(config.broker.brokers, vec!["localhost:9092".to_string()]);
        assert_eq!(config.broker.request_topic, "request_topic");
        assert_eq!(config.broker.response_topic, "response_topic");
        assert_eq!(config.timeouts.request, Duration::from_secs(30));
        assert_eq!(config.websocket.outbound_capacity, 256);
        assert_eq!(config.websocket.ping_interval, Duration::from_secs(54));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_values_from_env() {
        let config = config_from(&[
            ("LOCAL_ADDRESS", "127.0.0.1:9000"),
            ("KAFKA_BROKERS", "kafka-1:9092, kafka-2:9092,"),
            ("KAFKA_REQUEST_TOPIC", "chat.requests"),
            ("KAFKA_RESPONSE_TOPIC", "chat.replies"),
            ("KAFKA_RESPONSE_TIMEOUT", "45"),
            ("WS_OUTBOUND_CAPACITY", "16"),
            ("WS_PING_INTERVAL", "20s"),
            ("WS_WRITE_TIMEOUT", "500ms"),
        ]);

        assert_eq!(config.http.listen_addr.port(), 9000);
        assert_eq!(config.broker.brokers, vec!["kafka-1:9092", "kafka-2:9092"]);
        assert_eq!(config.broker.request_topic, "chat.requests");
        assert_eq!(config.broker.response_topic, "chat.replies");
        assert_eq!(config.timeouts.request, Duration::from_secs(45));
        assert_eq!(config.websocket.outbound_capacity, 16);
        assert_eq!(config.websocket.ping_interval, Duration::from_secs(20));
        assert_eq!(config.websocket.write_timeout, Duration::from_millis(500));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = config_from(&[
            ("LOCAL_ADDRESS", "not-an-address"),
            ("KAFKA_BROKERS", " , "),
            ("KAFKA_RESPONSE_TIMEOUT", "soon"),
            ("WS_OUTBOUND_CAPACITY", "-3"),
            ("KAFKA_REQUEST_TOPIC", "   "),
        ]);

        assert_eq!(config.http.listen_addr.port(), 8080);
        assert_eq!(config.broker.brokers, vec!["localhost:9092".to_string()]);
        assert_eq!(config.timeouts.request, Duration::from_secs(30));
        assert_eq!(config.websocket.outbound_capacity, 256);
        assert_eq!(config.broker.request_topic, "request_topic");
    }
}
