//! Pending request table.
//!
//! Maps correlation IDs to the one-shot slot of the task waiting for the
//! reply. Every removal goes through `DashMap::remove`, so between the reply
//! consumer, the timing-out waiter and the sweeper exactly one caller ever
//! sees a given entry.

use crate::domain::correlation::CorrelationId;
use crate::metrics::BridgeMetrics;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Reply payload delivered by the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerReply {
    pub correlation_id: CorrelationId,
    /// Message value as read from the response topic
    pub payload: Vec<u8>,
    /// Time between registration and delivery
    pub response_time: Duration,
}

/// Outcome of handing a reply to the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Slot filled; the waiter will observe it
    Delivered,
    /// No entry: already timed out, never existed, or a duplicate reply
    Unmatched,
    /// Entry claimed but the waiter had already gone away
    ReceiverGone,
}

struct PendingRequest {
    sender: oneshot::Sender<BrokerReply>,
    created_at: Instant,
}

/// Handle held by the task waiting on a reply.
#[derive(Debug)]
pub struct PendingReply {
    correlation_id: CorrelationId,
    pub(crate) receiver: oneshot::Receiver<BrokerReply>,
}

impl PendingReply {
    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }
}

/// Reply slot claimed from the table, not yet filled
#[derive(Debug)]
pub struct ReplySlot {
    correlation_id: CorrelationId,
    sender: oneshot::Sender<BrokerReply>,
    created_at: Instant,
    metrics: Arc<BridgeMetrics>,
}

impl ReplySlot {
    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// Hand the payload to the waiter
    pub fn deliver(self, payload: Vec<u8>) -> Delivery {
        let correlation_id = self.correlation_id;
        let response_time = self.created_at.elapsed();
        let reply = BrokerReply {
            correlation_id,
            payload,
            response_time,
        };

        match self.sender.send(reply) {
            Ok(()) => {
                BridgeMetrics::incr(&self.metrics.replies_delivered);
                debug!(
                    correlation_id = %correlation_id,
                    response_time_ms = response_time.as_millis() as u64,
                    "Delivered reply to pending request"
                );
                Delivery::Delivered
            }
            Err(_) => {
                BridgeMetrics::incr(&self.metrics.replies_unmatched);
                debug!(
                    correlation_id = %correlation_id,
                    "Pending request receiver dropped before delivery"
                );
                Delivery::ReceiverGone
            }
        }
    }
}

/// Concurrent correlation table.
///
/// Flow:
/// 1. `register()` mints a CorrelationId and stores the sending half
/// 2. The request is published keyed by that ID
/// 3. The reply consumer calls `complete()`, or the waiter calls `cancel()`
///    when its timeout fires; whichever runs first removes the entry
pub struct PendingRequestStore {
    pending: DashMap<CorrelationId, PendingRequest>,
    metrics: Arc<BridgeMetrics>,
}

impl PendingRequestStore {
    pub fn new(metrics: Arc<BridgeMetrics>) -> Self {
        Self {
            pending: DashMap::new(),
            metrics,
        }
    }

    /// Register a new pending request under a fresh correlation ID
    pub fn register(&self) -> PendingReply {
        let correlation_id = CorrelationId::new();
        let (sender, receiver) = oneshot::channel();
        let created_at = Instant::now();

        self.pending.insert(
            correlation_id,
            PendingRequest { sender, created_at },
        );

        debug!(correlation_id = %correlation_id, "Registered pending request");

        PendingReply {
            correlation_id,
            receiver,
        }
    }

    /// Claim the entry for `correlation_id` and fill its slot.
    ///
    /// Never blocks: a oneshot send either succeeds immediately or reports
    /// that the receiver is gone.
    pub fn complete(&self, correlation_id: CorrelationId, payload: Vec<u8>) -> Delivery {
        match self.claim(&correlation_id) {
            Some(slot) => slot.deliver(payload),
            None => {
                BridgeMetrics::incr(&self.metrics.replies_unmatched);
                warn!(
                    correlation_id = %correlation_id,
                    "Reply for unknown or expired correlation ID, discarding"
                );
                Delivery::Unmatched
            }
        }
    }

    /// Remove the entry and take its reply slot.
    ///
    /// Once claimed, the waiter can no longer time out the entry and waits
    /// for the slot to be filled or dropped.
    pub fn claim(&self, correlation_id: &CorrelationId) -> Option<ReplySlot> {
        self.pending
            .remove(correlation_id)
            .map(|(correlation_id, pending)| ReplySlot {
                correlation_id,
                sender: pending.sender,
                created_at: pending.created_at,
                metrics: Arc::clone(&self.metrics),
            })
    }

    /// Remove an entry without delivering. Returns false if someone else
    /// already claimed it.
    pub fn cancel(&self, correlation_id: &CorrelationId) -> bool {
        self.pending.remove(correlation_id).is_some()
    }

    /// Drop entries older than `ttl`. Returns the number removed.
    pub fn remove_expired(&self, ttl: Duration) -> usize {
        let mut removed = 0;

        self.pending.retain(|id, request| {
            let age = request.created_at.elapsed();
            if age > ttl {
                warn!(
                    correlation_id = %id,
                    age_ms = age.as_millis() as u64,
                    "Removing stale pending request"
                );
                removed += 1;
                false
            } else {
                true
            }
        });

        for _ in 0..removed {
            BridgeMetrics::incr(&self.metrics.stale_swept);
        }
        removed
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, correlation_id: &CorrelationId) -> bool {
        self.pending.contains_key(correlation_id)
    }
}

/// Background sweep of entries whose waiter vanished without cleaning up.
pub async fn cleanup_task(
    store: Arc<PendingRequestStore>,
    interval: Duration,
    ttl: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut sweep = tokio::time::interval(interval);
    sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = sweep.tick() => {
                let removed = store.remove_expired(ttl);
                if removed > 0 {
                    debug!(removed = removed, "Swept stale pending requests");
                }
            }
            _ = shutdown.changed() => {
                debug!("Pending request sweeper stopping");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    fn store() -> PendingRequestStore {
        PendingRequestStore::new(Arc::new(BridgeMetrics::new()))
    }

    #[tokio::test]
    async fn test_register_and_complete() {
        let store = store();

        let pending = store.register();
        let id = pending.correlation_id();
        assert!(store.is_pending(&id));
        assert_eq!(store.pending_count(), 1);

        assert_eq!(store.complete(id, b"reply".to_vec()), Delivery::Delivered);

        let reply = pending.receiver.await.unwrap();
        assert_eq!(reply.correlation_id, id);
        assert_eq!(reply.payload, b"reply");
        assert_eq!(store.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_complete_is_exactly_once() {
        let store = store();
        let pending = store.register();
        let id = pending.correlation_id();

        assert_eq!(store.complete(id, b"first".to_vec()), Delivery::Delivered);
        assert_eq!(store.complete(id, b"second".to_vec()), Delivery::Unmatched);

        let reply = pending.receiver.await.unwrap();
        assert_eq!(reply.payload, b"first");
        assert_eq!(store.metrics.replies_unmatched.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_complete_unknown_id() {
        let store = store();
        assert_eq!(
            store.complete(CorrelationId::new(), b"{}".to_vec()),
            Delivery::Unmatched
        );
    }

    #[tokio::test]
    async fn test_cancel_then_complete_is_noop() {
        let store = store();
        let pending = store.register();
        let id = pending.correlation_id();

        assert!(store.cancel(&id));
        assert!(!store.cancel(&id));
        assert_eq!(store.complete(id, b"late".to_vec()), Delivery::Unmatched);
    }

    #[tokio::test]
    async fn test_receiver_dropped() {
        let store = store();
        let pending = store.register();
        let id = pending.correlation_id();
        drop(pending);

        assert_eq!(store.complete(id, b"x".to_vec()), Delivery::ReceiverGone);
        assert_eq!(store.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_expired() {
        let store = store();
        let _old = store.register();

        tokio::time::advance(Duration::from_secs(10)).await;
        let fresh = store.register();

        assert_eq!(store.remove_expired(Duration::from_secs(5)), 1);
        assert_eq!(store.pending_count(), 1);
        assert!(store.is_pending(&fresh.correlation_id()));
        assert_eq!(store.metrics.stale_swept.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_task_stops_on_shutdown() {
        let store = Arc::new(store());
        let _pending = store.register();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(cleanup_task(
            Arc::clone(&store),
            Duration::from_secs(1),
            Duration::from_secs(2),
            shutdown_rx,
        ));

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(store.pending_count(), 0);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
