//! Kafka Bridge - WebSocket request/reply gateway over Kafka topics.
//!
//! Clients send a request frame over a WebSocket; the bridge publishes it to
//! the request topic keyed by a fresh correlation ID, waits for the reply with
//! the same key on the response topic, and writes it back to the client.
//!
//! # Architecture
//!
//! ```text
//!  WebSocket clients
//!        │  ▲
//!        ▼  │
//! ┌─────────────────────────────────────────────┐
//! │  Duplex Pump (one per connection)           │
//! │  inbound loop ──► request task ──► queue    │──► Hub (registry task)
//! │                    │                │       │
//! │                    │       outbound loop    │
//! └────────────────────┼────────────────────────┘
//!                      ▼
//! ┌─────────────────────────────────────────────┐
//! │  Correlation Broker                         │
//! │  submit ─► publish (key = correlation ID)   │
//! │  await_reply ◄─ pending table ◄─ consumer   │
//! └──────────┬──────────────────────▲───────────┘
//!            ▼                      │
//!      request_topic          response_topic
//! ```
//!
//! # Delivery
//!
//! At most once. A reply that arrives after its request timed out is
//! discarded. A second frame sent while a request is in flight on the same
//! connection is dropped, as is any reply that finds the outbound queue full.
//!
//! # Usage
//!
//! ```ignore
//! use kafka_bridge::{BridgeConfig, BridgeService};
//!
//! let mut service = BridgeService::new(BridgeConfig::default(), publisher)?;
//! let tasks = service.spawn_background(reply_stream, shutdown_rx.clone());
//! service.serve(listener, shutdown_rx).await?;
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod broker;
pub mod domain;
pub mod metrics;
pub mod service;
pub mod ws;

pub use broker::transport::channel;
pub use broker::{
    BrokerReply, CorrelationBroker, InboundReply, PendingReply, PendingRequestStore,
    ReplyConsumer, ReplySlot, ReplyStream, RequestPublisher, TransportError,
};
pub use domain::{
    BridgeConfig, BridgeError, BridgeResult, BrokerConfig, ConfigError, ConnectionId,
    CorrelationId, HttpConfig, ReplyEnvelope, ReplyStatus, RequestMessage, TimeoutConfig,
    WebSocketConfig,
};
pub use metrics::{BridgeMetrics, MetricsSnapshot};
pub use service::BridgeService;
pub use ws::{DuplexPump, Hub, HubHandle};

#[cfg(feature = "kafka")]
pub use broker::kafka::{KafkaPublisher, KafkaReplyStream};
