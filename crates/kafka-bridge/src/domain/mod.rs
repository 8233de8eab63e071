//! Domain types for the bridge: identifiers, envelopes, configuration and errors.

pub mod config;
pub mod correlation;
pub mod envelope;
pub mod error;

pub use config::{
    parse_duration, BridgeConfig, BrokerConfig, ConfigError, HttpConfig, TimeoutConfig,
    WebSocketConfig,
};
pub use correlation::{ConnectionId, CorrelationId};
pub use envelope::{ReplyEnvelope, ReplyStatus, RequestMessage};
pub use error::{BridgeError, BridgeResult};
