use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub fn init_metrics() {
    let builder = PrometheusBuilder::new();
    let handle = builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    if METRICS_HANDLE.set(handle).is_err() {
        panic!("failed to set metrics handle: already initialized");
    }
}

pub fn get_metrics() -> String {
    METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string())
}

/// Count an order status transition.
pub fn record_order_transition(to_status: &str) {
    metrics::counter!("tune_order_transitions_total", "status" => to_status.to_string())
        .increment(1);
}

/// Count a successful promo redemption.
pub fn record_promo_redemption(code: &str) {
    metrics::counter!("tune_promo_redemptions_total", "code" => code.to_string()).increment(1);
}

/// Count a precheck verdict.
pub fn record_precheck(status: &str) {
    metrics::counter!("tune_prechecks_total", "status" => status.to_string()).increment(1);
}
