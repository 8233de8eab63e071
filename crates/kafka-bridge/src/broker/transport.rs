//! Broker transport ports.
//!
//! The correlation broker only needs two capabilities from the message
//! broker: publish a keyed request, and read keyed replies. Kafka implements
//! them in `broker::kafka`; `channel` provides an in-memory pair for tests
//! and local runs.

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Raw reply read from the response stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundReply {
    /// Message key; expected to be a correlation ID
    pub key: Option<Vec<u8>>,
    /// Message value
    pub payload: Vec<u8>,
}

impl InboundReply {
    pub fn new(key: impl Into<Vec<u8>>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            key: Some(key.into()),
            payload: payload.into(),
        }
    }
}

/// Transport error types
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("broker rejected message: {0}")]
    Rejected(String),
    #[error("transport closed")]
    Closed,
    #[error("receive failed: {0}")]
    Receive(String),
}

/// Publish side of the broker
#[async_trait]
pub trait RequestPublisher: Send + Sync {
    /// Publish `payload` on the request stream under `key`
    async fn publish(&self, key: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Flush and release the producer. Default is a no-op.
    async fn close(&self) {}
}

/// Consume side of the broker
#[async_trait]
pub trait ReplyStream: Send {
    /// Next reply, an individual read error, or `None` once the stream ended
    async fn next_reply(&mut self) -> Option<Result<InboundReply, TransportError>>;
}

/// In-memory transport backed by tokio channels
pub mod channel {
    use super::*;

    /// Request as seen by the fake backend
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct PublishedRequest {
        pub key: String,
        pub payload: Vec<u8>,
    }

    /// Publisher that forwards into an mpsc channel.
    ///
    /// Dropping the receiving end makes every publish fail, which is how
    /// tests simulate a broker rejecting writes.
    pub struct ChannelPublisher(pub mpsc::Sender<PublishedRequest>);

    #[async_trait]
    impl RequestPublisher for ChannelPublisher {
        async fn publish(&self, key: &str, payload: Vec<u8>) -> Result<(), TransportError> {
            self.0
                .send(PublishedRequest {
                    key: key.to_string(),
                    payload,
                })
                .await
                .map_err(|_| TransportError::Closed)
        }
    }

    /// Reply stream fed from an mpsc channel
    pub struct ChannelReplyStream(pub mpsc::Receiver<InboundReply>);

    #[async_trait]
    impl ReplyStream for ChannelReplyStream {
        async fn next_reply(&mut self) -> Option<Result<InboundReply, TransportError>> {
            self.0.recv().await.map(Ok)
        }
    }

    /// Both halves of an in-memory broker.
    pub struct ChannelTransport {
        pub publisher: ChannelPublisher,
        /// What the backend reads
        pub requests: mpsc::Receiver<PublishedRequest>,
        /// What the backend writes
        pub replies: mpsc::Sender<InboundReply>,
        pub stream: ChannelReplyStream,
    }

    /// Create an in-memory transport with `buffer` slots in each direction
    pub fn create_channel_transport(buffer: usize) -> ChannelTransport {
        let (req_tx, req_rx) = mpsc::channel(buffer);
        let (reply_tx, reply_rx) = mpsc::channel(buffer);
        ChannelTransport {
            publisher: ChannelPublisher(req_tx),
            requests: req_rx,
            replies: reply_tx,
            stream: ChannelReplyStream(reply_rx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::channel::*;
    use super::*;

    #[tokio::test]
    async fn test_channel_publish_reaches_backend() {
        let mut transport = create_channel_transport(4);
        transport
            .publisher
            .publish("key-1", b"payload".to_vec())
            .await
            .unwrap();

        let request = transport.requests.recv().await.unwrap();
        assert_eq!(request.key, "key-1");
        assert_eq!(request.payload, b"payload");
    }

    #[tokio::test]
    async fn test_channel_publish_fails_without_backend() {
        let transport = create_channel_transport(4);
        drop(transport.requests);

        let result = transport.publisher.publish("key", Vec::new()).await;
        assert!(matches!(result, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_channel_stream_ends_when_backend_gone() {
        let mut transport = create_channel_transport(4);
        transport
            .replies
            .send(InboundReply::new("k", "v"))
            .await
            .unwrap();
        drop(transport.replies);

        let first = transport.stream.next_reply().await.unwrap().unwrap();
        assert_eq!(first.payload, b"v");
        assert!(transport.stream.next_reply().await.is_none());
    }
}
