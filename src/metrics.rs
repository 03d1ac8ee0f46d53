//! Metrics registry (§6.2a of SPEC_FULL.md): a Prometheus exporter
//! bound to its own port, grounded on the teacher's
//! `performance/metrics.rs` use of the `metrics` facade.
//!
//! Counters/gauges are recorded at their call sites via the `metrics`
//! macros directly (see `ingestion`, `event_engine`, `signal_engine`,
//! `tracker`, `persistence`); this module only wires up the exporter
//! and documents the registry's exact names:
//!
//! - `ingest_frames_total{kind}`
//! - `ingest_invalid_total{kind}`
//! - `ingest_reconnects_total{chunk}`
//! - `update_bus_dropped_total`
//! - `event_queue_dropped_total`
//! - `events_triggered_total{type}`
//! - `signals_emitted_total{direction}`
//! - `signals_open` (gauge)
//! - `tracker_closed_total{outcome}`
//! - `persistence_batch_flush_total`
//! - `persistence_batch_failed_total`

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub fn install_recorder(bind_addr: std::net::SocketAddr) -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .with_http_listener(bind_addr)
        .install_recorder()
        .context("installing prometheus recorder")?;
    Ok(handle)
}

/// Renders the registry in text-exposition format for the bridge's
/// `/metrics` route, which serves it alongside the engine's own
/// auto-bound exporter listener.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}
