//! Metrics collection and exposition.
//!
//! # Metrics
//! - `panel_requests_total` (counter): requests by method and status
//! - `panel_request_duration_seconds` (histogram): handler latency
//! - `panel_login_attempts_total` (counter): login outcomes
//! - `panel_lockouts_total` (counter): clients locked out
//! - `panel_rate_limited_total` (counter): requests rejected with 429
//! - `panel_sessions_active` (gauge): authenticated sessions alive
//! - `panel_panics_total` (counter): faults caught by recovery
//!
//! Recording is a no-op until [`init_metrics`] installs the recorder.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    counter!(
        "panel_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("panel_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

/// `outcome` is `success` or the failure cause.
pub fn record_login(outcome: &'static str) {
    counter!("panel_login_attempts_total", "outcome" => outcome).increment(1);
}

pub fn record_lockout() {
    counter!("panel_lockouts_total").increment(1);
}

pub fn record_rate_limited() {
    counter!("panel_rate_limited_total").increment(1);
}

pub fn record_active_sessions(count: usize) {
    gauge!("panel_sessions_active").set(count as f64);
}

pub fn record_panic() {
    counter!("panel_panics_total").increment(1);
}
