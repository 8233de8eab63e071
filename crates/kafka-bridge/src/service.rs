//! Bridge service: owns the broker, hub and pump, and exposes them over HTTP.
//!
//! Routes:
//! - `GET {ws_path}`: WebSocket upgrade, one duplex pump per connection
//! - `GET /health`: liveness with connection, pending and counter figures
//! - `GET /metrics`: Prometheus text format (feature `metrics`)

use crate::broker::{cleanup_task, CorrelationBroker, PendingRequestStore, ReplyConsumer};
use crate::broker::{ReplyStream, RequestPublisher};
use crate::domain::config::BridgeConfig;
use crate::domain::error::BridgeResult;
use crate::metrics::{BridgeMetrics, MetricsSnapshot};
use crate::ws::{DuplexPump, Hub, HubHandle};
use axum::{
    extract::{ws::WebSocketUpgrade, State},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub struct BridgeService {
    config: BridgeConfig,
    metrics: Arc<BridgeMetrics>,
    broker: Arc<CorrelationBroker>,
    hub: HubHandle,
    /// Taken when the background tasks are spawned
    hub_task: Option<Hub>,
    pump: Arc<DuplexPump>,
}

impl BridgeService {
    /// Validate the configuration and build the core around `publisher`
    pub fn new(config: BridgeConfig, publisher: Arc<dyn RequestPublisher>) -> BridgeResult<Self> {
        config.validate()?;

        let metrics = Arc::new(BridgeMetrics::new());
        let pending = Arc::new(PendingRequestStore::new(Arc::clone(&metrics)));
        let broker = Arc::new(CorrelationBroker::new(
            pending,
            publisher,
            Arc::clone(&metrics),
        ));

        let (hub_task, hub) = Hub::new();
        let pump = Arc::new(DuplexPump::new(
            Arc::clone(&broker),
            hub.clone(),
            config.websocket.clone(),
            config.timeouts.request,
        ));

        Ok(Self {
            config,
            metrics,
            broker,
            hub,
            hub_task: Some(hub_task),
            pump,
        })
    }

    /// Spawn the process-lifetime tasks: hub, reply consumer and sweeper.
    ///
    /// All of them stop when `shutdown` flips to true.
    pub fn spawn_background<S>(
        &mut self,
        replies: S,
        shutdown: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>>
    where
        S: ReplyStream + 'static,
    {
        let mut tasks = Vec::with_capacity(3);

        match self.hub_task.take() {
            Some(hub) => tasks.push(hub.spawn(shutdown.clone())),
            None => warn!("Connection hub already running"),
        }

        tasks.push(
            ReplyConsumer::new(
                Arc::clone(self.broker.pending_store()),
                replies,
                Arc::clone(&self.metrics),
            )
            .spawn(shutdown.clone()),
        );

        tasks.push(tokio::spawn(cleanup_task(
            Arc::clone(self.broker.pending_store()),
            self.config.timeouts.sweep_interval,
            self.config.pending_ttl(),
            shutdown,
        )));

        tasks
    }

    pub fn router(&self) -> Router {
        let state = AppState {
            pump: Arc::clone(&self.pump),
            hub: self.hub.clone(),
            broker: Arc::clone(&self.broker),
            max_message_size: self.config.websocket.max_message_size,
        };

        let router = Router::new()
            .route(&self.config.http.ws_path, get(ws_upgrade))
            .route("/health", get(health_check));

        #[cfg(feature = "metrics")]
        let router = router.route("/metrics", get(prometheus_metrics));

        router.layer(TraceLayer::new_for_http()).with_state(state)
    }

    /// Serve until `shutdown` flips to true
    pub async fn serve(
        &self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> std::io::Result<()> {
        let addr = listener.local_addr()?;
        info!(addr = %addr, ws_path = %self.config.http.ws_path, "Starting WebSocket gateway");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|stop| *stop).await;
            })
            .await
    }

    /// Flush the publisher and log final counters
    pub async fn shutdown(&self) {
        self.broker.shutdown().await;
        let snapshot = self.metrics.snapshot();
        info!(
            requests = snapshot.requests_submitted,
            replies = snapshot.replies_delivered,
            timeouts = snapshot.timeouts,
            frames_dropped = snapshot.frames_dropped,
            "Bridge service stopped"
        );
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn broker(&self) -> &Arc<CorrelationBroker> {
        &self.broker
    }

    pub fn pump(&self) -> &Arc<DuplexPump> {
        &self.pump
    }

    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    pub fn metrics(&self) -> &Arc<BridgeMetrics> {
        &self.metrics
    }
}

/// Application state shared across handlers
#[derive(Clone)]
struct AppState {
    pump: Arc<DuplexPump>,
    hub: HubHandle,
    broker: Arc<CorrelationBroker>,
    max_message_size: usize,
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let pump = state.pump;
    ws.max_message_size(state.max_message_size)
        .on_failed_upgrade(|e| warn!(error = %e, "WebSocket upgrade failed"))
        .on_upgrade(move |socket| async move {
            let (writer, reader) = socket.split();
            pump.run(reader, writer).await;
        })
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    connections: usize,
    pending_requests: usize,
    metrics: MetricsSnapshot,
}

/// Gateway liveness only; the broker is not probed
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let metrics = state.broker.metrics().snapshot();
    // Fall back to the counters if the hub already stopped
    let connections = match state.hub.connection_count().await {
        Ok(count) => count,
        Err(_) => state.broker.metrics().live_connections() as usize,
    };

    Json(HealthResponse {
        status: "healthy",
        service: "kafka-ws-gateway",
        version: env!("CARGO_PKG_VERSION"),
        connections,
        pending_requests: state.broker.pending_count(),
        metrics,
    })
}

#[cfg(feature = "metrics")]
async fn prometheus_metrics(State(state): State<AppState>) -> Response {
    use axum::http::{header, StatusCode};

    let snapshot = state.broker.metrics().snapshot();
    match snapshot.to_prometheus(state.broker.pending_count()) {
        Ok(body) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::transport::channel::create_channel_transport;
    use crate::domain::config::ConfigError;
    use crate::domain::error::BridgeError;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = BridgeConfig::default();
        config.websocket.outbound_capacity = 0;
        let transport = create_channel_transport(1);

        let result = BridgeService::new(config, Arc::new(transport.publisher));
        assert!(matches!(
            result,
            Err(BridgeError::Config(ConfigError::InvalidLimit(_)))
        ));
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let transport = create_channel_transport(4);
        let mut service =
            BridgeService::new(BridgeConfig::default(), Arc::new(transport.publisher)).unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let tasks = service.spawn_background(transport.stream, shutdown_rx);

        let response = service
            .router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["connections"], 0);
        assert_eq!(json["pending_requests"], 0);

        shutdown_tx.send(true).unwrap();
        for task in tasks {
            task.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_plain_get_on_ws_route_is_rejected() {
        let transport = create_channel_transport(4);
        let service =
            BridgeService::new(BridgeConfig::default(), Arc::new(transport.publisher)).unwrap();

        let response = service
            .router()
            .oneshot(
                Request::builder()
                    .uri("/api/chat/ws")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }

    #[cfg(feature = "metrics")]
    #[tokio::test]
    async fn test_metrics_endpoint() {
        let transport = create_channel_transport(4);
        let service =
            BridgeService::new(BridgeConfig::default(), Arc::new(transport.publisher)).unwrap();
        BridgeMetrics::incr(&service.metrics().malformed_frames);

        let response = service
            .router()
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()[axum::http::header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/plain"));

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("bridge_malformed_frames_total 1"));
        assert!(text.contains("bridge_pending_requests 0"));
    }
}
