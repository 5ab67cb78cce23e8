//! Prometheus export of bus statistics.
//!
//! All metrics follow the naming convention: `cs_bus_<metric>`
//!
//! Bus counters live inside the bus as atomics; these gauges mirror a
//! [`BusStats`] snapshot, so they are set rather than incremented.

use change_bus::{BusStats, ChangeBus};
use lazy_static::lazy_static;
use prometheus::{Encoder, IntGauge, Registry, TextEncoder};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::TelemetryError;

lazy_static! {
    /// Process-wide metrics registry
    pub static ref REGISTRY: Registry = Registry::new();
}

/// Gauges mirroring [`BusStats`].
#[derive(Clone)]
pub struct BusMetrics {
    events_published: IntGauge,
    total_deliveries: IntGauge,
    events_dropped: IntGauge,
    publishes_rejected: IntGauge,
    subscriptions_created: IntGauge,
    subscriptions_cleaned: IntGauge,
    active_subscriptions: IntGauge,
    running: IntGauge,
}

fn gauge(registry: &Registry, name: &str, help: &str) -> Result<IntGauge, TelemetryError> {
    let gauge = IntGauge::new(name, help).map_err(|e| TelemetryError::Metrics(e.to_string()))?;
    registry
        .register(Box::new(gauge.clone()))
        .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
    Ok(gauge)
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl BusMetrics {
    /// Create the gauges and register them with `registry`.
    ///
    /// # Errors
    ///
    /// Returns `TelemetryError::Metrics` if any gauge is already registered.
    pub fn register(registry: &Registry) -> Result<Self, TelemetryError> {
        Ok(Self {
            events_published: gauge(
                registry,
                "cs_bus_events_published",
                "Publish calls accepted while the bus was running",
            )?,
            total_deliveries: gauge(
                registry,
                "cs_bus_total_deliveries",
                "Events enqueued across all subscriptions",
            )?,
            events_dropped: gauge(
                registry,
                "cs_bus_events_dropped",
                "Matching deliveries lost to full queues",
            )?,
            publishes_rejected: gauge(
                registry,
                "cs_bus_publishes_rejected",
                "Publish calls discarded because the bus was stopped",
            )?,
            subscriptions_created: gauge(
                registry,
                "cs_bus_subscriptions_created",
                "Subscriptions ever created",
            )?,
            subscriptions_cleaned: gauge(
                registry,
                "cs_bus_subscriptions_cleaned",
                "Subscriptions removed by any path",
            )?,
            active_subscriptions: gauge(
                registry,
                "cs_bus_active_subscriptions",
                "Subscriptions currently registered",
            )?,
            running: gauge(registry, "cs_bus_running", "1 while the bus is running")?,
        })
    }

    /// Copy a statistics snapshot into the gauges.
    pub fn record_bus_stats(&self, stats: &BusStats) {
        self.events_published.set(saturating_i64(stats.events_published));
        self.total_deliveries.set(saturating_i64(stats.total_deliveries));
        self.events_dropped.set(saturating_i64(stats.events_dropped));
        self.publishes_rejected.set(saturating_i64(stats.publishes_rejected));
        self.subscriptions_created.set(saturating_i64(stats.subscriptions_created));
        self.subscriptions_cleaned.set(saturating_i64(stats.subscriptions_cleaned));
        self.active_subscriptions
            .set(saturating_i64(stats.active_subscriptions as u64));
        self.running.set(i64::from(stats.is_running));
    }
}

/// Register the bus gauges with the process-wide [`REGISTRY`].
///
/// # Errors
///
/// Fails if called more than once per process.
pub fn register_metrics() -> Result<BusMetrics, TelemetryError> {
    BusMetrics::register(&REGISTRY)
}

/// Encode the process-wide registry as Prometheus text format.
pub fn gather_text() -> Result<String, TelemetryError> {
    encode(&REGISTRY)
}

/// Encode any registry as Prometheus text format.
pub fn encode(registry: &Registry) -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::Metrics(e.to_string()))
}

/// Record `bus.stats()` into `metrics` every `period` until the returned
/// task is aborted.
pub fn spawn_stats_exporter(bus: ChangeBus, metrics: BusMetrics, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            metrics.record_bus_stats(&bus.stats());
        }
    })
}
