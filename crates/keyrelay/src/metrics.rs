//! Relay metrics for observability.
//!
//! Uses the global OpenTelemetry meter provider, which must be installed by
//! the host application. Without one, every instrument is a no-op.

use opentelemetry::metrics::{Counter, Gauge, Meter};
use opentelemetry::KeyValue;
use std::sync::OnceLock;

static METER: OnceLock<Meter> = OnceLock::new();

fn meter() -> &'static Meter {
    METER.get_or_init(|| opentelemetry::global::meter("keyrelay"))
}

// ============================================================================
// Counters (Cumulative)
// ============================================================================

/// Counter for envelopes handed to the router.
pub fn envelopes_routed() -> Counter<u64> {
    meter()
        .u64_counter("relay.envelopes.routed")
        .with_description("Total envelopes routed between identities")
        .with_unit("envelope")
        .build()
}

/// Counter for registration attempts.
pub fn registrations() -> Counter<u64> {
    meter()
        .u64_counter("relay.registrations")
        .with_description("Total username registration attempts")
        .with_unit("attempt")
        .build()
}

// ============================================================================
// Gauges (Current State)
// ============================================================================

/// Gauge for open WebSocket connections, registered or not.
pub fn connections_active() -> Gauge<i64> {
    meter()
        .i64_gauge("relay.connections.active")
        .with_description("Current number of open relay connections")
        .with_unit("connection")
        .build()
}

/// Gauge for registered identities.
pub fn identities_online() -> Gauge<i64> {
    meter()
        .i64_gauge("relay.identities.online")
        .with_description("Current number of registered identities")
        .with_unit("user")
        .build()
}

// ============================================================================
// Metric Recording Helpers
// ============================================================================

/// Record the outcome of routing one envelope.
pub fn record_route(kind: &str, result: &str) {
    envelopes_routed().add(
        1,
        &[
            KeyValue::new("kind", kind.to_string()),
            KeyValue::new("result", result.to_string()),
        ],
    );
}

/// Record a registration attempt.
pub fn record_registration(result: &str) {
    registrations().add(1, &[KeyValue::new("result", result.to_string())]);
}

/// Record the current connection count.
pub fn record_connection_count(count: i64) {
    connections_active().record(count, &[KeyValue::new("transport", "ws")]);
}

/// Record the current number of online identities.
pub fn record_online_count(count: usize) {
    identities_online().record(i64::try_from(count).unwrap_or(i64::MAX), &[]);
}
