//! # Bridge Telemetry
//!
//! Structured logging for the Kafka WebSocket bridge, built on `tracing` and
//! `tracing-subscriber`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bridge_telemetry::{init_telemetry, TelemetryConfig};
//!
//! fn main() {
//!     let _guard = init_telemetry(TelemetryConfig::from_env()).expect("Failed to init telemetry");
//!     // Spans and events are now written to stdout
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `GATEWAY_SERVICE_NAME` | `kafka-ws-gateway` | Service name in the startup log |
//! | `GATEWAY_LOG_LEVEL` / `RUST_LOG` | `info` | Filter directives |
//! | `GATEWAY_JSON_LOGS` | `false` (`true` in containers) | JSON log lines |
//! | `GATEWAY_CONSOLE_OUTPUT` | `true` | Write logs to stdout |
//! | `GATEWAY_ENV` | `dev` | Environment label |

mod config;
mod logging;

pub use config::TelemetryConfig;
pub use logging::build_filter;

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Invalid log filter {0}")]
    Filter(String),

    #[error("Failed to install subscriber: {0}")]
    Init(String),
}

/// Install the global subscriber described by `config`.
///
/// Returns a guard to hold for the lifetime of the application.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    logging::init_logging(&config)?;

    tracing::info!(
        service = %config.service_name,
        environment = %config.environment,
        version = env!("CARGO_PKG_VERSION"),
        json_logs = config.json_logs,
        "Telemetry initialized"
    );

    Ok(TelemetryGuard {
        service_name: config.service_name,
    })
}

/// Guard that keeps telemetry active.
pub struct TelemetryGuard {
    service_name: String,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!(service = %self.service_name, "Shutting down telemetry...");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_rejects_bad_filter() {
        let config = TelemetryConfig {
            log_level: "kafka_bridge=loud".to_string(),
            ..TelemetryConfig::default()
        };
        assert!(matches!(
            init_telemetry(config),
            Err(TelemetryError::Filter(_))
        ));
    }

    #[test]
    fn test_init_only_once() {
        let config = TelemetryConfig {
            console_output: false,
            ..TelemetryConfig::default()
        };
        let _guard = init_telemetry(config.clone()).expect("first init succeeds");
        assert!(matches!(
            init_telemetry(config),
            Err(TelemetryError::Init(_))
        ));
    }
}
