//! Correlation broker.
//!
//! Turns the broker's asynchronous request and response topics into a
//! request/reply call. `submit` registers and publishes; `await_reply` waits
//! on the slot with a deadline. Keeping the two apart means publish failures
//! and delivery/timeout failures surface separately.

pub mod consumer;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod pending;
pub mod transport;

pub use consumer::ReplyConsumer;
pub use pending::{
    cleanup_task, BrokerReply, Delivery, PendingReply, PendingRequestStore, ReplySlot,
};
pub use transport::{InboundReply, ReplyStream, RequestPublisher, TransportError};

use crate::domain::envelope::RequestMessage;
use crate::domain::error::{BridgeError, BridgeResult};
use crate::metrics::BridgeMetrics;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub struct CorrelationBroker {
    pending: Arc<PendingRequestStore>,
    publisher: Arc<dyn RequestPublisher>,
    metrics: Arc<BridgeMetrics>,
}

impl CorrelationBroker {
    pub fn new(
        pending: Arc<PendingRequestStore>,
        publisher: Arc<dyn RequestPublisher>,
        metrics: Arc<BridgeMetrics>,
    ) -> Self {
        Self {
            pending,
            publisher,
            metrics,
        }
    }

    /// Register a pending entry under a fresh correlation ID and publish the
    /// request keyed by it.
    ///
    /// The entry exists before the publish, so a reply can never beat its own
    /// registration. On failure the entry is removed again.
    pub async fn submit(&self, request: &RequestMessage) -> BridgeResult<PendingReply> {
        let pending = self.pending.register();
        let correlation_id = pending.correlation_id();

        let payload = match serde_json::to_vec(request) {
            Ok(payload) => payload,
            Err(e) => {
                self.pending.cancel(&correlation_id);
                return Err(e.into());
            }
        };

        if let Err(e) = self
            .publisher
            .publish(&correlation_id.to_key(), payload)
            .await
        {
            self.pending.cancel(&correlation_id);
            BridgeMetrics::incr(&self.metrics.publish_failures);
            warn!(correlation_id = %correlation_id, error = %e, "Failed to publish request");
            return Err(BridgeError::Publish {
                correlation_id,
                reason: e.to_string(),
            });
        }

        BridgeMetrics::incr(&self.metrics.requests_submitted);
        debug!(correlation_id = %correlation_id, "Published request");
        Ok(pending)
    }

    /// Wait for the reply to a submitted request.
    ///
    /// The entry is gone from the table by the time this returns, whatever
    /// the outcome. If the deadline fires while the consumer is mid-delivery,
    /// the consumer's claim wins and the reply is returned instead.
    pub async fn await_reply(
        &self,
        pending: PendingReply,
        timeout: Duration,
    ) -> BridgeResult<BrokerReply> {
        let correlation_id = pending.correlation_id();
        let mut receiver = pending.receiver;

        match tokio::time::timeout(timeout, &mut receiver).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => {
                self.pending.cancel(&correlation_id);
                Err(BridgeError::SlotClosed(correlation_id))
            }
            Err(_) => {
                if self.pending.cancel(&correlation_id) {
                    BridgeMetrics::incr(&self.metrics.timeouts);
                    debug!(
                        correlation_id = %correlation_id,
                        timeout_ms = timeout.as_millis() as u64,
                        "Request timed out"
                    );
                    return Err(BridgeError::Timeout {
                        correlation_id,
                        after: timeout,
                    });
                }

                // Claimed by the consumer; the slot is filled or about to be
                receiver
                    .await
                    .map_err(|_| BridgeError::SlotClosed(correlation_id))
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.pending_count()
    }

    pub fn pending_store(&self) -> &Arc<PendingRequestStore> {
        &self.pending
    }

    pub fn metrics(&self) -> &Arc<BridgeMetrics> {
        &self.metrics
    }

    /// Release the publish connection. Outstanding awaits end via their own
    /// timeout.
    pub async fn shutdown(&self) {
        self.publisher.close().await;
        debug!(pending = self.pending_count(), "Correlation broker shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::transport::channel::create_channel_transport;
    use super::*;
    use crate::domain::correlation::CorrelationId;
    use std::sync::atomic::Ordering;

    fn request(content: &str) -> RequestMessage {
        RequestMessage {
            credential: "tok".into(),
            content: content.into(),
        }
    }

    fn broker_with(publisher: Arc<dyn RequestPublisher>) -> CorrelationBroker {
        let metrics = Arc::new(BridgeMetrics::new());
        let store = Arc::new(PendingRequestStore::new(Arc::clone(&metrics)));
        CorrelationBroker::new(store, publisher, metrics)
    }

    #[tokio::test]
    async fn test_submit_publishes_keyed_request() {
        let mut transport = create_channel_transport(4);
        let broker = broker_with(Arc::new(transport.publisher));

        let pending = broker.submit(&request("hello")).await.unwrap();
        let published = transport.requests.recv().await.unwrap();

        assert_eq!(published.key, pending.correlation_id().to_key());
        let body: RequestMessage = serde_json::from_slice(&published.payload).unwrap();
        assert_eq!(body, request("hello"));
        assert_eq!(broker.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_submit_failure_leaves_no_entry() {
        let transport = create_channel_transport(4);
        drop(transport.requests);
        let broker = broker_with(Arc::new(transport.publisher));

        let err = broker.submit(&request("hello")).await.unwrap_err();
        assert!(matches!(err, BridgeError::Publish { .. }));
        assert_eq!(broker.pending_count(), 0);
        assert_eq!(broker.metrics.publish_failures.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_await_returns_reply() {
        let mut transport = create_channel_transport(4);
        let broker = broker_with(Arc::new(transport.publisher));

        let pending = broker.submit(&request("hello")).await.unwrap();
        let published = transport.requests.recv().await.unwrap();
        let id = CorrelationId::from_key(published.key.as_bytes()).unwrap();
        broker.pending_store().complete(id, b"reply".to_vec());

        let reply = broker
            .await_reply(pending, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(reply.correlation_id, id);
        assert_eq!(reply.payload, b"reply");
        assert_eq!(broker.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_timeout_removes_entry() {
        let transport = create_channel_transport(4);
        let broker = broker_with(Arc::new(transport.publisher));
        let _requests = transport.requests;

        let pending = broker.submit(&request("hello")).await.unwrap();
        let id = pending.correlation_id();

        let err = broker
            .await_reply(pending, Duration::from_secs(30))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(!broker.pending_store().is_pending(&id));

        // Late reply is discarded
        assert_eq!(
            broker.pending_store().complete(id, b"late".to_vec()),
            Delivery::Unmatched
        );
        assert_eq!(broker.metrics.timeouts.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_claimed_before_deadline_wins() {
        // Arrange
        let transport = create_channel_transport(4);
        let broker = Arc::new(broker_with(Arc::new(transport.publisher)));
        let _requests = transport.requests;

        let pending = broker.submit(&request("hello")).await.unwrap();
        let id = pending.correlation_id();
        // Consumer has taken the entry but not yet filled the slot
        let slot = broker
            .pending_store()
            .claim(&id)
            .expect("Entry should be claimable");

        let waiter = {
            let broker = Arc::clone(&broker);
            tokio::spawn(async move { broker.await_reply(pending, Duration::from_secs(30)).await })
        };

        // Act: let the deadline pass, then finish the delivery
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(!waiter.is_finished());
        assert_eq!(slot.deliver(b"reply".to_vec()), Delivery::Delivered);

        // Assert
        let reply = waiter
            .await
            .expect("Waiter should not panic")
            .expect("Claimed reply should win over the deadline");
        assert_eq!(reply.correlation_id, id);
        assert_eq!(reply.payload, b"reply");
        assert_eq!(broker.metrics.timeouts.load(Ordering::Relaxed), 0);
        assert_eq!(broker.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_table_bounded_under_sustained_timeouts() {
        let transport = create_channel_transport(64);
        let broker = broker_with(Arc::new(transport.publisher));
        let _requests = transport.requests;

        for _ in 0..20 {
            let pending = broker.submit(&request("x")).await.unwrap();
            let _ = broker.await_reply(pending, Duration::from_millis(10)).await;
        }
        assert_eq!(broker.pending_count(), 0);
    }
}
