//! Prometheus metrics for the frame loop and episode workers.

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{info, warn};

/// Metric names as constants for consistency.
pub mod names {
    pub const FRAMES_TOTAL: &str = "pancam_frames_total";
    pub const FRAMES_DROPPED_TOTAL: &str = "pancam_frames_dropped_total";
    pub const DECODE_ERRORS_TOTAL: &str = "pancam_decode_errors_total";
    pub const DETECT_DURATION_SECONDS: &str = "pancam_detect_duration_seconds";
    pub const COMMANDS_TOTAL: &str = "pancam_commands_total";
    pub const RECONNECTS_TOTAL: &str = "pancam_reconnects_total";
    pub const ALERTS_TOTAL: &str = "pancam_alerts_total";
    pub const EPISODES_TOTAL: &str = "pancam_episodes_total";
    pub const EPISODE_WORKERS_ACTIVE: &str = "pancam_episode_workers_active";
}

/// Start the Prometheus exporter on `addr`. Failure only disables metrics.
pub fn init_exporter(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => info!(%addr, "Prometheus exporter listening"),
        Err(e) => warn!(error = %e, "Failed to start Prometheus exporter"),
    }
}

pub fn record_frame() {
    counter!(names::FRAMES_TOTAL).increment(1);
}

/// `reason` is `rate` (above max_fps) or `freeze`.
pub fn record_frame_dropped(reason: &'static str) {
    counter!(names::FRAMES_DROPPED_TOTAL, "reason" => reason).increment(1);
}

pub fn record_decode_error() {
    counter!(names::DECODE_ERRORS_TOTAL).increment(1);
}

pub fn record_detect_duration(strategy: &'static str, secs: f64) {
    histogram!(names::DETECT_DURATION_SECONDS, "strategy" => strategy).record(secs);
}

/// `source` is `track` or `scan`.
pub fn record_command(source: &'static str) {
    counter!(names::COMMANDS_TOTAL, "source" => source).increment(1);
}

pub fn record_reconnect() {
    counter!(names::RECONNECTS_TOTAL).increment(1);
}

pub fn record_alert() {
    counter!(names::ALERTS_TOTAL).increment(1);
}

/// `status` is `sent`, `failed` or `dropped`.
pub fn record_episode(status: &'static str) {
    counter!(names::EPISODES_TOTAL, "status" => status).increment(1);
}

pub fn set_episode_workers(active: usize) {
    gauge!(names::EPISODE_WORKERS_ACTIVE).set(active as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names() {
        assert!(names::FRAMES_TOTAL.starts_with("pancam_"));
        assert!(names::EPISODES_TOTAL.ends_with("_total"));
        assert!(names::DETECT_DURATION_SECONDS.ends_with("_seconds"));
    }
}
