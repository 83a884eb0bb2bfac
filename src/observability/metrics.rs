//! Metrics collection and exposition.
//!
//! # Metrics
//! - `mux_sessions_total` (counter): sessions started
//! - `mux_sessions_active` (gauge): sessions currently running
//! - `mux_session_close_total` (counter): closes by `reason`
//! - `mux_streams_total` (counter): streams opened
//! - `mux_streams_active` (gauge): streams currently open
//! - `mux_frames_read_total` / `mux_frames_written_total` (counter): by `kind`
//! - `mux_protocol_violations_total` (counter): by `kind`
//! - `mux_resource_failures_total` (counter): connections refused for lack of buffers

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its HTTP scrape endpoint.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint started");
    Ok(())
}

pub fn session_opened() {
    counter!("mux_sessions_total").increment(1);
    gauge!("mux_sessions_active").increment(1.0);
}

pub fn session_closed(reason: &'static str) {
    gauge!("mux_sessions_active").decrement(1.0);
    counter!("mux_session_close_total", "reason" => reason).increment(1);
}

pub fn stream_opened() {
    counter!("mux_streams_total").increment(1);
    gauge!("mux_streams_active").increment(1.0);
}

pub fn stream_closed() {
    gauge!("mux_streams_active").decrement(1.0);
}

pub fn frame_read(kind: &'static str) {
    counter!("mux_frames_read_total", "kind" => kind).increment(1);
}

pub fn frame_written(kind: &'static str) {
    counter!("mux_frames_written_total", "kind" => kind).increment(1);
}

pub fn protocol_violation(kind: &'static str) {
    counter!("mux_protocol_violations_total", "kind" => kind).increment(1);
}

pub fn resource_failure() {
    counter!("mux_resource_failures_total").increment(1);
}
