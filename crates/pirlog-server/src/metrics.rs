//! Prometheus metrics for replicas and the layout coordinator
//!
//! Privacy-safe metrics: only role and outcome labels, never request
//! vectors, pads or message contents.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

pub const OUTCOME_OK: &str = "ok";
pub const OUTCOME_STALE: &str = "stale";
pub const OUTCOME_CLIENT_ERROR: &str = "client_error";
pub const OUTCOME_SERVER_ERROR: &str = "server_error";

pub fn record_write(outcome: &str) {
    counter!("pirlog_writes_total", "outcome" => outcome.to_string()).increment(1);
}

pub fn record_read(outcome: &str, batch: usize, duration: Duration) {
    counter!("pirlog_reads_total", "outcome" => outcome.to_string()).increment(1);
    counter!("pirlog_read_requests_total", "outcome" => outcome.to_string())
        .increment(batch as u64);
    histogram!("pirlog_read_duration_seconds", "outcome" => outcome.to_string())
        .record(duration.as_secs_f64());
}

pub fn record_layout_apply(outcome: &str, duration: Duration) {
    counter!("pirlog_layout_apply_total", "outcome" => outcome.to_string()).increment(1);
    histogram!("pirlog_layout_apply_duration_seconds", "outcome" => outcome.to_string())
        .record(duration.as_secs_f64());
}

pub fn record_refresh_coalesced() {
    counter!("pirlog_layout_refresh_coalesced_total").increment(1);
}

pub fn set_active_snapshot(snapshot_id: u64) {
    gauge!("pirlog_active_snapshot_id").set(snapshot_id as f64);
}

pub fn set_pending_entries(count: usize) {
    gauge!("pirlog_pending_entries").set(count as f64);
}

pub fn record_publish(outcome: &str) {
    counter!("pirlog_publish_total", "outcome" => outcome.to_string()).increment(1);
}

pub fn set_table_load(entries: usize, load_factor: f64) {
    gauge!("pirlog_table_entries").set(entries as f64);
    gauge!("pirlog_table_load_factor").set(load_factor);
}

pub fn record_snapshot_built(snapshot_id: u64, duration: Duration) {
    gauge!("pirlog_coordinator_snapshot_id").set(snapshot_id as f64);
    histogram!("pirlog_snapshot_build_duration_seconds").record(duration.as_secs_f64());
}

pub fn init_prometheus_recorder() -> anyhow::Result<metrics_exporter_prometheus::PrometheusHandle> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let handle = builder
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {}", e))?;
    Ok(handle)
}
