//! Reply consumer loop.
//!
//! Single long-lived task: reads the response stream and resolves pending
//! requests by message key. It never waits on a waiter, so one slow client
//! cannot stall delivery to the others.

use crate::broker::pending::{Delivery, PendingRequestStore};
use crate::broker::transport::{InboundReply, ReplyStream};
use crate::domain::correlation::CorrelationId;
use crate::metrics::BridgeMetrics;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub struct ReplyConsumer<S> {
    pending: Arc<PendingRequestStore>,
    stream: S,
    metrics: Arc<BridgeMetrics>,
}

impl<S: ReplyStream + 'static> ReplyConsumer<S> {
    pub fn new(pending: Arc<PendingRequestStore>, stream: S, metrics: Arc<BridgeMetrics>) -> Self {
        Self {
            pending,
            stream,
            metrics,
        }
    }

    /// Run until the shutdown signal fires.
    ///
    /// A stream that ends early is reported and the task then idles until
    /// shutdown. The stream is dropped on return, which closes the
    /// underlying consumer.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Reply consumer started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("Reply consumer received shutdown signal, stopping");
                    break;
                }
                next = self.stream.next_reply() => match next {
                    Some(Ok(reply)) => self.route(reply),
                    Some(Err(e)) => {
                        error!(error = %e, "Error reading reply stream");
                    }
                    None => {
                        error!("Reply stream ended, no further replies will be delivered");
                        let _ = shutdown.wait_for(|stop| *stop).await;
                        info!("Reply consumer received shutdown signal, stopping");
                        break;
                    }
                },
            }
        }
    }

    /// Spawn the loop on the runtime
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    fn route(&self, reply: InboundReply) {
        let Some(correlation_id) = reply.key.as_deref().and_then(CorrelationId::from_key) else {
            BridgeMetrics::incr(&self.metrics.replies_unmatched);
            warn!(
                key = ?reply.key.as_deref().map(String::from_utf8_lossy),
                "Reply without a valid correlation key, discarding"
            );
            return;
        };

        match self.pending.complete(correlation_id, reply.payload) {
            Delivery::Delivered => {
                debug!(correlation_id = %correlation_id, "Reply routed");
            }
            Delivery::Unmatched | Delivery::ReceiverGone => {
                // Already logged and counted by the store
            }
        }
    }
}
