//! Per-connection primitives: lifecycle state, close signal, single-flight
//! guard and the bounded outbound queue.

use crate::domain::correlation::ConnectionId;
use crate::metrics::BridgeMetrics;
use axum::extract::ws::Message;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

/// Connection lifecycle. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Active = 1,
    Closing = 2,
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Active,
            2 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

/// Non-owning reference to a live connection.
///
/// The hub keeps one per registered connection; closing it asks both pump
/// loops to stop.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    state: Arc<AtomicU8>,
    close_tx: Arc<watch::Sender<bool>>,
}

impl ConnectionHandle {
    /// New handle in `Connecting`, plus the receiver the pump loops watch
    pub fn new(id: ConnectionId) -> (Self, watch::Receiver<bool>) {
        let (close_tx, close_rx) = watch::channel(false);
        let handle = Self {
            id,
            state: Arc::new(AtomicU8::new(ConnectionState::Connecting as u8)),
            close_tx: Arc::new(close_tx),
        };
        (handle, close_rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move to `next` if it is later than the current state.
    pub fn transition(&self, next: ConnectionState) -> bool {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (next as u8 > current).then_some(next as u8)
            })
            .is_ok()
    }

    /// Request shutdown of the connection. Idempotent.
    pub fn close(&self) {
        if self.transition(ConnectionState::Closing) {
            debug!(connection_id = %self.id, "Closing connection");
        }
        self.close_tx.send_replace(true);
    }

    pub fn is_closing(&self) -> bool {
        *self.close_tx.borrow()
    }
}

/// At most one request in flight per connection.
#[derive(Debug, Clone)]
pub struct SingleFlight {
    permit: Arc<Semaphore>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self {
            permit: Arc::new(Semaphore::new(1)),
        }
    }

    /// Take the guard, or `None` if a request is already in flight
    pub fn try_acquire(&self) -> Option<InFlightGuard> {
        Arc::clone(&self.permit)
            .try_acquire_owned()
            .ok()
            .map(|permit| InFlightGuard { _permit: permit })
    }

    pub fn is_in_flight(&self) -> bool {
        self.permit.available_permits() == 0
    }
}

impl Default for SingleFlight {
    fn default() -> Self {
        Self::new()
    }
}

/// Released on drop
#[derive(Debug)]
pub struct InFlightGuard {
    _permit: OwnedSemaphorePermit,
}

/// Producer side of a connection's bounded outbound queue.
///
/// Enqueue never waits: when the queue is full the frame is dropped.
#[derive(Debug, Clone)]
pub struct OutboundQueue {
    connection_id: ConnectionId,
    sender: mpsc::Sender<Message>,
    metrics: Arc<BridgeMetrics>,
}

impl OutboundQueue {
    pub fn new(
        connection_id: ConnectionId,
        capacity: usize,
        metrics: Arc<BridgeMetrics>,
    ) -> (Self, mpsc::Receiver<Message>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (
            Self {
                connection_id,
                sender,
                metrics,
            },
            receiver,
        )
    }

    /// Returns false when the frame was dropped
    pub fn enqueue(&self, frame: Message) -> bool {
        match self.sender.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                BridgeMetrics::incr(&self.metrics.frames_dropped);
                warn!(
                    connection_id = %self.connection_id,
                    capacity = self.sender.max_capacity(),
                    "Outbound queue full, dropping frame"
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(
                    connection_id = %self.connection_id,
                    "Connection gone, dropping frame"
                );
                false
            }
        }
    }
}

/// Socket frame for a broker reply payload: text when it is UTF-8, binary
/// otherwise.
pub fn payload_frame(payload: Vec<u8>) -> Message {
    match String::from_utf8(payload) {
        Ok(text) => Message::Text(text),
        Err(e) => Message::Binary(e.into_bytes()),
    }
}
