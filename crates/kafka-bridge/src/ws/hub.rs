//! Connection registry.
//!
//! One task owns the set of live connections. Registrations and removals
//! arrive on their own intake queues and are applied in order by that task;
//! nothing else touches the set. Queries and mass close go through a
//! command queue and are answered over oneshot channels.

use crate::domain::correlation::ConnectionId;
use crate::domain::error::{BridgeError, BridgeResult};
use crate::ws::connection::{ConnectionHandle, ConnectionState};
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

const REGISTER_QUEUE_SIZE: usize = 64;
const COMMAND_QUEUE_SIZE: usize = 16;

struct Registration {
    handle: ConnectionHandle,
    ack: oneshot::Sender<()>,
}

enum HubCommand {
    Count(oneshot::Sender<usize>),
    Ids(oneshot::Sender<Vec<ConnectionId>>),
    CloseAll(oneshot::Sender<usize>),
}

/// Registry task state
pub struct Hub {
    connections: HashMap<ConnectionId, ConnectionHandle>,
    register_rx: mpsc::Receiver<Registration>,
    unregister_rx: mpsc::UnboundedReceiver<ConnectionId>,
    command_rx: mpsc::Receiver<HubCommand>,
}

/// Cloneable front end of the registry
#[derive(Clone)]
pub struct HubHandle {
    register_tx: mpsc::Sender<Registration>,
    unregister_tx: mpsc::UnboundedSender<ConnectionId>,
    command_tx: mpsc::Sender<HubCommand>,
}

impl Hub {
    pub fn new() -> (Hub, HubHandle) {
        let (register_tx, register_rx) = mpsc::channel(REGISTER_QUEUE_SIZE);
        let (unregister_tx, unregister_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_SIZE);

        let hub = Hub {
            connections: HashMap::new(),
            register_rx,
            unregister_rx,
            command_rx,
        };
        let handle = HubHandle {
            register_tx,
            unregister_tx,
            command_tx,
        };
        (hub, handle)
    }

    /// Run until the shutdown signal fires.
    ///
    /// Intake queues are drained in a fixed order, so a removal sent before a
    /// query is always applied before it is answered. On shutdown every
    /// registered connection is asked to close.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Connection hub started");

        loop {
            tokio::select! {
                biased;

                Some(registration) = self.register_rx.recv() => {
                    self.add(registration);
                }
                Some(id) = self.unregister_rx.recv() => {
                    self.remove(id);
                }
                Some(command) = self.command_rx.recv() => {
                    self.handle_command(command);
                }
                _ = shutdown.changed() => {
                    let closed = self.close_all();
                    info!(closed = closed, "Connection hub received shutdown signal, stopping");
                    return;
                }
            }
        }
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    fn add(&mut self, registration: Registration) {
        let Registration { handle, ack } = registration;
        let id = handle.id();
        self.connections.insert(id, handle);
        debug!(connection_id = %id, live = self.connections.len(), "Connection registered");
        // The pump may have given up waiting; the entry stays until it unregisters
        let _ = ack.send(());
    }

    fn remove(&mut self, id: ConnectionId) {
        match self.connections.remove(&id) {
            Some(_) => {
                debug!(connection_id = %id, live = self.connections.len(), "Connection unregistered")
            }
            None => debug!(connection_id = %id, "Unregister for unknown connection, ignoring"),
        }
    }

    fn handle_command(&mut self, command: HubCommand) {
        match command {
            HubCommand::Count(reply) => {
                let _ = reply.send(self.connections.len());
            }
            HubCommand::Ids(reply) => {
                let mut ids: Vec<_> = self.connections.keys().copied().collect();
                ids.sort();
                let _ = reply.send(ids);
            }
            HubCommand::CloseAll(reply) => {
                let _ = reply.send(self.close_all());
            }
        }
    }

    /// Signal every connection to close and forget them all
    fn close_all(&mut self) -> usize {
        let count = self.connections.len();
        for (_, handle) in self.connections.drain() {
            if handle.state() < ConnectionState::Closing {
                handle.close();
            }
        }
        count
    }
}

impl HubHandle {
    /// Add a connection. Returns once the hub has applied the registration.
    pub async fn register(&self, handle: ConnectionHandle) -> BridgeResult<()> {
        let (ack, acked) = oneshot::channel();
        self.register_tx
            .send(Registration { handle, ack })
            .await
            .map_err(|_| BridgeError::ShuttingDown)?;
        acked.await.map_err(|_| BridgeError::ShuttingDown)
    }

    /// Remove a connection. Removing an absent connection is a no-op.
    pub fn unregister(&self, id: ConnectionId) {
        if self.unregister_tx.send(id).is_err() {
            debug!(connection_id = %id, "Hub stopped, skipping unregister");
        }
    }

    pub async fn connection_count(&self) -> BridgeResult<usize> {
        self.query(HubCommand::Count).await
    }

    pub async fn connection_ids(&self) -> BridgeResult<Vec<ConnectionId>> {
        self.query(HubCommand::Ids).await
    }

    /// Close every live connection. Returns how many were signalled.
    pub async fn close_all(&self) -> BridgeResult<usize> {
        self.query(HubCommand::CloseAll).await
    }

    async fn query<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> HubCommand) -> BridgeResult<T> {
        let (reply, response) = oneshot::channel();
        self.command_tx
            .send(command(reply))
            .await
            .map_err(|_| BridgeError::ShuttingDown)?;
        response.await.map_err(|_| BridgeError::ShuttingDown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection() -> ConnectionHandle {
        ConnectionHandle::new(ConnectionId::new()).0
    }

    #[tokio::test]
    async fn test_register_then_unregister_subset() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (hub, handle) = Hub::new();
        let task = hub.spawn(shutdown_rx);

        let connections: Vec<_> = (0..5).map(|_| connection()).collect();
        for c in &connections {
            handle.register(c.clone()).await.unwrap();
        }
        for c in connections.iter().take(2) {
            handle.unregister(c.id());
        }

        assert_eq!(handle.connection_count().await.unwrap(), 3);
        let ids = handle.connection_ids().await.unwrap();
        assert!(!ids.contains(&connections[0].id()));
        assert!(ids.contains(&connections[4].id()));

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
        // Survivors were closed by the shutdown
        assert!(connections[4].is_closing());
        assert!(!connections[0].is_closing());
    }

    #[tokio::test]
    async fn test_unregister_unknown_is_noop() {
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (hub, handle) = Hub::new();
        hub.spawn(shutdown_rx);

        let c = connection();
        handle.register(c.clone()).await.unwrap();
        handle.unregister(ConnectionId::new());
        handle.unregister(c.id());
        handle.unregister(c.id());

        assert_eq!(handle.connection_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_close_all_signals_connections() {
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (hub, handle) = Hub::new();
        hub.spawn(shutdown_rx);

        let (c, mut close_rx) = ConnectionHandle::new(ConnectionId::new());
        c.transition(ConnectionState::Active);
        handle.register(c.clone()).await.unwrap();

        assert_eq!(handle.close_all().await.unwrap(), 1);
        close_rx.changed().await.unwrap();
        assert!(c.is_closing());
        assert_eq!(handle.connection_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_closes_connections_and_stops() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (hub, handle) = Hub::new();
        let task = hub.spawn(shutdown_rx);

        let c = connection();
        handle.register(c.clone()).await.unwrap();

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();

        assert!(c.is_closing());
        assert!(matches!(
            handle.connection_count().await,
            Err(BridgeError::ShuttingDown)
        ));
        assert!(matches!(
            handle.register(connection()).await,
            Err(BridgeError::ShuttingDown)
        ));
    }
}
