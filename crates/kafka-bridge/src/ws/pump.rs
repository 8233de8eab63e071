//! Duplex pump: the inbound and outbound loops driving one connection.
//!
//! Inbound reads frames and hands each accepted one to a detached request
//! task; outbound drains the connection's queue and sends liveness pings.
//! Either loop failing closes the connection, which stops the other one.

use crate::broker::CorrelationBroker;
use crate::domain::config::{WebSocketConfig, MAX_TIMEOUT};
use crate::domain::correlation::ConnectionId;
use crate::domain::envelope::{ReplyEnvelope, RequestMessage};
use crate::domain::error::BridgeError;
use crate::metrics::BridgeMetrics;
use crate::ws::connection::{
    payload_frame, ConnectionHandle, ConnectionState, OutboundQueue, SingleFlight,
};
use crate::ws::hub::HubHandle;
use axum::extract::ws::Message;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Shared by every connection; `run` is called once per upgraded socket.
pub struct DuplexPump {
    broker: Arc<CorrelationBroker>,
    hub: HubHandle,
    config: WebSocketConfig,
    request_timeout: Duration,
    metrics: Arc<BridgeMetrics>,
}

impl DuplexPump {
    pub fn new(
        broker: Arc<CorrelationBroker>,
        hub: HubHandle,
        config: WebSocketConfig,
        request_timeout: Duration,
    ) -> Self {
        let metrics = Arc::clone(broker.metrics());
        Self {
            broker,
            hub,
            config,
            request_timeout,
            metrics,
        }
    }

    /// Drive one connection to completion.
    ///
    /// Registers with the hub, runs both loops until either ends, then
    /// unregisters. Returns once no further I/O will be attempted.
    pub async fn run<R, W>(&self, reader: R, mut writer: W)
    where
        R: Stream<Item = Result<Message, axum::Error>> + Unpin + Send,
        W: Sink<Message, Error = axum::Error> + Unpin + Send,
    {
        let connection_id = ConnectionId::new();
        let (handle, close_rx) = ConnectionHandle::new(connection_id);

        if let Err(e) = self.hub.register(handle.clone()).await {
            warn!(connection_id = %connection_id, error = %e, "Hub unavailable, rejecting connection");
            let _ = write_frame(&mut writer, Message::Close(None), self.config.write_timeout).await;
            handle.transition(ConnectionState::Closed);
            return;
        }

        // Unregisters on every exit path, unwinding and task abort included
        let _entry = HubEntry {
            hub: &self.hub,
            handle: handle.clone(),
            metrics: &self.metrics,
        };

        handle.transition(ConnectionState::Active);
        BridgeMetrics::incr(&self.metrics.connections_opened);
        info!(connection_id = %connection_id, "Connection active");

        let (queue, queue_rx) = OutboundQueue::new(
            connection_id,
            self.config.outbound_capacity,
            Arc::clone(&self.metrics),
        );

        tokio::join!(
            self.inbound_loop(reader, queue, handle.clone(), close_rx.clone()),
            self.outbound_loop(writer, queue_rx, handle.clone(), close_rx),
        );
    }

    async fn inbound_loop<R>(
        &self,
        mut reader: R,
        queue: OutboundQueue,
        handle: ConnectionHandle,
        mut close_rx: watch::Receiver<bool>,
    ) where
        R: Stream<Item = Result<Message, axum::Error>> + Unpin + Send,
    {
        let connection_id = handle.id();
        let single_flight = SingleFlight::new();

        while !*close_rx.borrow() {
            // Any frame, pongs included, resets the liveness deadline
            let next = tokio::select! {
                _ = close_rx.changed() => break,
                next = tokio::time::timeout(self.config.liveness_timeout, reader.next()) => next,
            };

            let message = match next {
                Ok(Some(Ok(message))) => message,
                Ok(Some(Err(e))) => {
                    debug!(connection_id = %connection_id, error = %e, "Read failed");
                    break;
                }
                Ok(None) => {
                    debug!(connection_id = %connection_id, "Peer closed the stream");
                    break;
                }
                Err(_) => {
                    warn!(
                        connection_id = %connection_id,
                        liveness_timeout_s = self.config.liveness_timeout.as_secs(),
                        "Liveness deadline missed"
                    );
                    break;
                }
            };

            let frame = match message {
                Message::Text(text) => text.into_bytes(),
                Message::Binary(data) => data,
                Message::Ping(_) | Message::Pong(_) => continue,
                Message::Close(_) => {
                    debug!(connection_id = %connection_id, "Close frame received");
                    break;
                }
            };

            let Some(guard) = single_flight.try_acquire() else {
                BridgeMetrics::incr(&self.metrics.duplicate_requests_dropped);
                warn!(
                    connection_id = %connection_id,
                    "Request already in flight on this connection, dropping frame"
                );
                continue;
            };

            let broker = Arc::clone(&self.broker);
            let metrics = Arc::clone(&self.metrics);
            let queue = queue.clone();
            let timeout = self.request_timeout;
            tokio::spawn(async move {
                let reply = process_frame(&broker, &metrics, &frame, timeout).await;
                queue.enqueue(reply);
                drop(guard);
            });
        }

        handle.close();
    }

    async fn outbound_loop<W>(
        &self,
        mut writer: W,
        mut queue_rx: mpsc::Receiver<Message>,
        handle: ConnectionHandle,
        mut close_rx: watch::Receiver<bool>,
    ) where
        W: Sink<Message, Error = axum::Error> + Unpin + Send,
    {
        let connection_id = handle.id();
        let write_timeout = self.config.write_timeout;
        let period = self.config.ping_interval;
        let first_ping = Instant::now()
            .checked_add(period)
            .unwrap_or_else(|| Instant::now() + MAX_TIMEOUT);
        let mut ping = interval_at(first_ping, period);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !*close_rx.borrow() {
            let frame = tokio::select! {
                _ = close_rx.changed() => break,
                frame = queue_rx.recv() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
                _ = ping.tick() => Message::Ping(Vec::new()),
            };

            let is_ping = matches!(frame, Message::Ping(_));
            if let Err(e) = write_frame(&mut writer, frame, write_timeout).await {
                debug!(connection_id = %connection_id, error = %e, ping = is_ping, "Write failed");
                handle.close();
                return;
            }
            if !is_ping {
                BridgeMetrics::incr(&self.metrics.frames_sent);
            }
        }

        handle.close();
        let _ = write_frame(&mut writer, Message::Close(None), write_timeout).await;
    }
}

/// Registration held by a running pump; dropping it retires the connection.
struct HubEntry<'a> {
    hub: &'a HubHandle,
    handle: ConnectionHandle,
    metrics: &'a BridgeMetrics,
}

impl Drop for HubEntry<'_> {
    fn drop(&mut self) {
        let connection_id = self.handle.id();
        self.handle.close();
        self.handle.transition(ConnectionState::Closed);
        self.hub.unregister(connection_id);
        BridgeMetrics::incr(&self.metrics.connections_closed);
        info!(connection_id = %connection_id, "Connection closed");
    }
}

/// Handle one request frame end to end and build the frame to send back.
///
/// Never fails: every outcome maps to exactly one reply frame.
pub async fn process_frame(
    broker: &CorrelationBroker,
    metrics: &BridgeMetrics,
    frame: &[u8],
    timeout: Duration,
) -> Message {
    let request = match RequestMessage::from_frame(frame) {
        Ok(request) => request,
        Err(e) => {
            BridgeMetrics::incr(&metrics.malformed_frames);
            let error = BridgeError::Protocol(e.to_string());
            debug!(error = %error, "Malformed request frame");
            return error_frame(error.client_message());
        }
    };

    let pending = match broker.submit(&request).await {
        Ok(pending) => pending,
        Err(e) => return error_frame(e.client_message()),
    };

    match broker.await_reply(pending, timeout).await {
        Ok(reply) => payload_frame(reply.payload),
        Err(e) => {
            if !e.is_timeout() {
                warn!(error = %e, "Request failed");
            }
            error_frame(e.client_message())
        }
    }
}

fn error_frame(error: &str) -> Message {
    Message::Text(ReplyEnvelope::error(error).to_json())
}

async fn write_frame<W>(writer: &mut W, frame: Message, deadline: Duration) -> Result<(), BridgeError>
where
    W: Sink<Message, Error = axum::Error> + Unpin,
{
    match tokio::time::timeout(deadline, writer.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(BridgeError::Transport(e.to_string())),
        Err(_) => Err(BridgeError::Transport(format!(
            "write exceeded {}ms deadline",
            deadline.as_millis()
        ))),
    }
}
