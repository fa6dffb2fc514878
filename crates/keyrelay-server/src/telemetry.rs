//! Logging setup for the relay server.
//!
//! `RUST_LOG` controls the filter (default: `info,keyrelay=debug,keyrelay_server=debug`).
//! Output is pretty-printed for local runs or one JSON object per line for
//! log collectors.
//!
//! Metrics go through the global OpenTelemetry meter; without an installed
//! provider they are no-ops.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogFormat;

const DEFAULT_FILTER: &str = "info,keyrelay=debug,keyrelay_server=debug";

/// Install the global tracing subscriber.
pub fn init(format: LogFormat) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let (pretty_layer, json_layer) = match format {
        LogFormat::Pretty => (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(true)
                    .with_line_number(true)
                    .pretty(),
            ),
            None,
        ),
        LogFormat::Json => (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .json()
                    .with_current_span(true),
            ),
        ),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(pretty_layer)
        .with(json_layer)
        .try_init()?;

    tracing::info!(format = %format, "Telemetry initialized");

    Ok(())
}

/// Flush logging before exit.
pub fn shutdown() {
    tracing::info!("Telemetry shutdown complete");
}
