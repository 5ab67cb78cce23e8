//! # Change Telemetry
//!
//! Logging and metrics for services embedding the change bus.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use change_telemetry::{init_telemetry, spawn_stats_exporter, TelemetryConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = TelemetryConfig::from_env();
//!     let guard = init_telemetry(&config).expect("Failed to init telemetry");
//!
//!     let bus = change_bus::ChangeBus::new();
//!     bus.start().await;
//!     let _exporter = spawn_stats_exporter(bus.clone(), guard.metrics().clone(), Duration::from_secs(15));
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `CS_SERVICE_NAME` | `change-stream` | Service name on the root span |
//! | `CS_LOG_LEVEL` / `RUST_LOG` | `info` | Log filter |
//! | `CS_CONSOLE_OUTPUT` | `true` | Write logs to stdout |
//! | `CS_JSON_LOGS` | `false` | JSON log lines |

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod config;
mod logging;
mod metrics;

pub use config::TelemetryConfig;
pub use logging::{init_logging, service_span};
pub use metrics::{
    encode, gather_text, register_metrics, spawn_stats_exporter, BusMetrics, REGISTRY,
};

pub use prometheus::Registry;

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize logging: {0}")]
    Logging(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    Metrics(String),
}

/// Install logging and register the bus gauges with the process-wide
/// registry.
///
/// Call once per process. A pre-existing global log subscriber is kept.
///
/// # Errors
///
/// - `TelemetryError::Logging` if the log filter is invalid
/// - `TelemetryError::Metrics` if the gauges were already registered
pub fn init_telemetry(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    logging::init_logging(config)?;
    let metrics = register_metrics()?;

    Ok(TelemetryGuard { metrics })
}

/// Keeps the registered gauges reachable for exporters.
pub struct TelemetryGuard {
    metrics: BusMetrics,
}

impl TelemetryGuard {
    /// The registered bus gauges.
    #[must_use]
    pub fn metrics(&self) -> &BusMetrics {
        &self.metrics
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!("Shutting down telemetry...");
    }
}
