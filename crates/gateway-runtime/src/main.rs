//! Kafka WebSocket gateway entry point.

use anyhow::{Context, Result};
use bridge_telemetry::{init_telemetry, TelemetryConfig};
use gateway_runtime::{load_config, shutdown_signal, GatewayRuntime};
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let _telemetry = init_telemetry(TelemetryConfig::from_env())
        .context("Failed to initialize telemetry")?;

    let config = load_config();
    info!(
        listen_addr = %config.http.listen_addr,
        ws_path = %config.http.ws_path,
        brokers = %config.broker.bootstrap_servers(),
        request_topic = %config.broker.request_topic,
        response_topic = %config.broker.response_topic,
        request_timeout_s = config.timeouts.request.as_secs(),
        "Configuration loaded"
    );

    let listener = TcpListener::bind(config.http.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.http.listen_addr))?;

    let runtime = GatewayRuntime::connect_kafka(config)
        .await
        .context("Failed to connect to Kafka")?;

    runtime
        .run(listener, shutdown_signal())
        .await
        .context("Gateway terminated with an error")
}
