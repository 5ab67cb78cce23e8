//! Log subscriber installation.
//!
//! Output is either human-readable or JSON lines with these fields:
//! - `timestamp`, `level`, `target`
//! - `fields.message` and any structured fields from the call site
//! - `service` on the root span when the caller enters [`service_span`]

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{TelemetryConfig, TelemetryError};

/// Install the global tracing subscriber described by `config`.
///
/// # Returns
///
/// - `Ok(true)` - The subscriber was installed
/// - `Ok(false)` - A global subscriber already existed and was left alone
///
/// # Errors
///
/// Returns `TelemetryError::Logging` if `config.log_level` is not a valid
/// filter directive.
pub fn init_logging(config: &TelemetryConfig) -> Result<bool, TelemetryError> {
    let env_filter = EnvFilter::try_new(&config.log_level)
        .map_err(|e| TelemetryError::Logging(e.to_string()))?;

    let installed = if !config.console_output {
        tracing_subscriber::registry().with(env_filter).try_init()
    } else if config.json_logs {
        let json_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_current_span(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(json_layer)
            .try_init()
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_ansi(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
    };

    match installed {
        Ok(()) => {
            tracing::info!(
                service = %config.service_name,
                level = %config.log_level,
                json = config.json_logs,
                "Logging initialized"
            );
            Ok(true)
        }
        Err(e) => {
            tracing::debug!(error = %e, "Global subscriber already set, keeping it");
            Ok(false)
        }
    }
}

/// Root span carrying the service name. Enter it once in `main`.
pub fn service_span(config: &TelemetryConfig) -> tracing::Span {
    tracing::info_span!("service", service = %config.service_name)
}
