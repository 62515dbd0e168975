//! Metrics collection and export for Switchboard.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;
use switchboard_core::{Hub, HubStats};
use tokio::task::JoinHandle;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "switchboard_connections_total";
    pub const SESSIONS_ACTIVE: &str = "switchboard_sessions_active";
    pub const USERS_ONLINE: &str = "switchboard_users_online";
    pub const EVICTIONS_TOTAL: &str = "switchboard_evictions_total";
    pub const DELIVERIES_TOTAL: &str = "switchboard_deliveries_total";
    pub const BROADCASTS_TOTAL: &str = "switchboard_broadcasts_total";
    pub const ERRORS_TOTAL: &str = "switchboard_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of sessions admitted since server start"
    );
    metrics::describe_gauge!(names::SESSIONS_ACTIVE, "Sessions currently registered");
    metrics::describe_gauge!(names::USERS_ONLINE, "Users with a delivery target");
    metrics::describe_counter!(
        names::EVICTIONS_TOTAL,
        "Sessions disconnected because their outbound queue was full"
    );
    metrics::describe_counter!(
        names::DELIVERIES_TOTAL,
        "Targeted deliveries by outcome"
    );
    metrics::describe_counter!(names::BROADCASTS_TOTAL, "Broadcasts accepted");
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record an admitted session.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
}

/// Record the outcome of a targeted delivery.
pub fn record_delivery(delivered: bool) {
    let outcome = if delivered { "delivered" } else { "undelivered" };
    counter!(names::DELIVERIES_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_broadcast() {
    counter!(names::BROADCASTS_TOTAL).increment(1);
}

/// Record an error.
pub fn record_error(error_type: &str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type.to_string()).increment(1);
}

/// Publish a hub snapshot.
pub fn set_hub_stats(stats: HubStats) {
    gauge!(names::SESSIONS_ACTIVE).set(stats.sessions as f64);
    gauge!(names::USERS_ONLINE).set(stats.users as f64);
    counter!(names::EVICTIONS_TOTAL).absolute(stats.evictions);
}

/// Refresh the hub gauges every `period`.
pub fn spawn_sampler(hub: Hub, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            set_hub_stats(hub.stats());
        }
    })
}
