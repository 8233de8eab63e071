//! # Gateway Runtime
//!
//! Wires the bridge service to its transport and drives it for the lifetime
//! of the process.
//!
//! ## Startup Sequence
//!
//! 1. Initialize telemetry
//! 2. Load configuration from the environment
//! 3. Bind the listener
//! 4. Connect the Kafka producer and the reply consumer
//! 5. Spawn the hub, consumer and sweeper tasks
//! 6. Serve until a shutdown signal arrives

pub mod config;
pub mod signal;

use bridge_telemetry::TelemetryError;
use kafka_bridge::{
    BridgeConfig, BridgeError, BridgeService, KafkaPublisher, KafkaReplyStream, ReplyStream,
    RequestPublisher,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

pub use config::load_config;
pub use signal::shutdown_signal;

/// How long background tasks get to stop after the server has drained
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Runtime errors
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),

    #[error("background task failed: {0}")]
    Task(String),
}

/// The running gateway: service plus its background tasks.
pub struct GatewayRuntime {
    service: BridgeService,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl GatewayRuntime {
    /// Connect to Kafka and build the runtime.
    ///
    /// Must be called inside a Tokio runtime; background tasks start here.
    pub async fn connect_kafka(config: BridgeConfig) -> Result<Self, RuntimeError> {
        config.validate().map_err(BridgeError::from)?;

        let publisher = KafkaPublisher::connect(&config.broker)?;

        // Partition assignment blocks on a metadata round trip
        let broker_config = config.broker.clone();
        let replies = tokio::task::spawn_blocking(move || KafkaReplyStream::connect(&broker_config))
            .await
            .map_err(|e| RuntimeError::Task(e.to_string()))??;

        Self::with_transport(config, Arc::new(publisher), replies)
    }

    /// Build the runtime over any transport.
    ///
    /// Must be called inside a Tokio runtime; background tasks start here.
    pub fn with_transport<S>(
        config: BridgeConfig,
        publisher: Arc<dyn RequestPublisher>,
        replies: S,
    ) -> Result<Self, RuntimeError>
    where
        S: ReplyStream + 'static,
    {
        let mut service = BridgeService::new(config, publisher)?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let tasks = service.spawn_background(replies, shutdown_rx.clone());

        Ok(Self {
            service,
            shutdown_tx,
            shutdown_rx,
            tasks,
        })
    }

    pub fn service(&self) -> &BridgeService {
        &self.service
    }

    /// Serve on `listener` until `signal` resolves, then shut down.
    ///
    /// Shutdown order: stop accepting, close every connection, stop the
    /// background tasks, flush the producer.
    pub async fn run<F>(self, listener: TcpListener, signal: F) -> Result<(), RuntimeError>
    where
        F: Future<Output = ()> + Send,
    {
        let Self {
            service,
            shutdown_tx,
            shutdown_rx,
            tasks,
        } = self;

        let serve = service.serve(listener, shutdown_rx);
        tokio::pin!(serve);

        let served = tokio::select! {
            result = &mut serve => {
                warn!("Server stopped before a shutdown signal");
                let _ = shutdown_tx.send(true);
                result
            }
            _ = signal => {
                info!("Shutdown signal received, draining connections");
                let _ = shutdown_tx.send(true);
                serve.await
            }
        };

        for task in tasks {
            match tokio::time::timeout(SHUTDOWN_GRACE, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "Background task failed"),
                Err(_) => warn!(
                    grace_s = SHUTDOWN_GRACE.as_secs(),
                    "Background task did not stop in time"
                ),
            }
        }

        service.shutdown().await;
        served?;
        info!("Gateway stopped");
        Ok(())
    }
}
