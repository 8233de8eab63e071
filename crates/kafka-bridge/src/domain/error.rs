//! Bridge error taxonomy.
//!
//! Only `Transport` is fatal, and only to the connection it occurred on.
//! Everything else turns into an error reply for the one request involved.

use crate::domain::config::ConfigError;
use crate::domain::correlation::CorrelationId;
use std::time::Duration;

/// Error text sent for a frame that is not a valid request envelope
pub const MSG_INVALID_FORMAT: &str = "invalid message format";

/// Error text sent when the request could not be handed to the broker
pub const MSG_PROCESSING_FAILED: &str = "failed to process message";

/// Error text sent when no reply arrived in time
pub const MSG_TIMEOUT: &str = "timeout";

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Malformed client frame; never reaches the broker
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Broker rejected the outgoing request
    #[error("publish failed for {correlation_id}: {reason}")]
    Publish {
        correlation_id: CorrelationId,
        reason: String,
    },

    /// No reply within the configured window
    #[error("no reply for {correlation_id} within {}ms", .after.as_millis())]
    Timeout {
        correlation_id: CorrelationId,
        after: Duration,
    },

    /// Reply slot closed without a value
    #[error("reply slot closed for {0}")]
    SlotClosed(CorrelationId),

    /// Read or write failure on a client connection
    #[error("transport error: {0}")]
    Transport(String),

    /// Broker stream failure on the consume side
    #[error("consumer error: {0}")]
    Consumer(String),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("shutdown in progress")]
    ShuttingDown,
}

impl BridgeError {
    /// Text placed in the `error` field of the reply sent to the client
    pub fn client_message(&self) -> &'static str {
        match self {
            BridgeError::Protocol(_) => MSG_INVALID_FORMAT,
            BridgeError::Timeout { .. } => MSG_TIMEOUT,
            _ => MSG_PROCESSING_FAILED,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, BridgeError::Timeout { .. })
    }
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_messages() {
        let id = CorrelationId::new();
        assert_eq!(
            BridgeError::Protocol("eof".into()).client_message(),
            MSG_INVALID_FORMAT
        );
        assert_eq!(
            BridgeError::Timeout {
                correlation_id: id,
                after: Duration::from_secs(30)
            }
            .client_message(),
            MSG_TIMEOUT
        );
        assert_eq!(
            BridgeError::Publish {
                correlation_id: id,
                reason: "broker down".into()
            }
            .client_message(),
            MSG_PROCESSING_FAILED
        );
        assert_eq!(BridgeError::SlotClosed(id).client_message(), MSG_PROCESSING_FAILED);
    }

    #[test]
    fn test_timeout_display() {
        let err = BridgeError::Timeout {
            correlation_id: CorrelationId::new(),
            after: Duration::from_millis(1500),
        };
        assert!(err.to_string().contains("1500ms"));
        assert!(err.is_timeout());
    }
}
