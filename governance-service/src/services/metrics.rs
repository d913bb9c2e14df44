use prometheus::{Encoder, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

// Global registry
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

// Metrics
pub static HTTP_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static HTTP_REQUEST_DURATION_SECONDS: OnceLock<HistogramVec> = OnceLock::new();
pub static GOVERNANCE_DECISIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static GOVERNANCE_ANOMALIES_TOTAL: OnceLock<IntCounter> = OnceLock::new();

/// Outcome labels for `governance_decisions_total`.
pub mod outcome {
    pub const APPLIED: &str = "applied";
    pub const QUEUED: &str = "queued";
    pub const APPROVED: &str = "approved";
    pub const REJECTED: &str = "rejected";
    pub const EXPIRED: &str = "expired";
    pub const PROVISIONED: &str = "provisioned";
    pub const PROVISION_PENDING: &str = "provision_pending";
}

/// Create and register all collectors. Safe to call more than once; later
/// calls keep the first registry.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    if REGISTRY.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    let requests_total = IntCounterVec::new(
        Opts::new("http_requests_total", "Total number of HTTP requests"),
        &["method", "path", "status"],
    )?;
    let request_duration = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "http_request_duration_seconds",
            "HTTP request duration in seconds",
        ),
        &["method", "path", "status"],
    )?;
    let decisions_total = IntCounterVec::new(
        Opts::new(
            "governance_decisions_total",
            "Governance decisions by outcome",
        ),
        &["outcome"],
    )?;
    let anomalies_total = IntCounter::new(
        "governance_anomalies_total",
        "Privileged actions flagged anomalous by the risk scorer",
    )?;

    registry.register(Box::new(requests_total.clone()))?;
    registry.register(Box::new(request_duration.clone()))?;
    registry.register(Box::new(decisions_total.clone()))?;
    registry.register(Box::new(anomalies_total.clone()))?;

    let _ = REGISTRY.set(registry);
    let _ = HTTP_REQUESTS_TOTAL.set(requests_total);
    let _ = HTTP_REQUEST_DURATION_SECONDS.set(request_duration);
    let _ = GOVERNANCE_DECISIONS_TOTAL.set(decisions_total);
    let _ = GOVERNANCE_ANOMALIES_TOTAL.set(anomalies_total);
    Ok(())
}

pub fn record_decision(outcome: &str) {
    if let Some(counter) = GOVERNANCE_DECISIONS_TOTAL.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}

pub fn record_anomaly() {
    if let Some(counter) = GOVERNANCE_ANOMALIES_TOTAL.get() {
        counter.inc();
    }
}

pub fn record_http_request(method: &str, path: &str, status: u16, seconds: f64) {
    let status = status.to_string();
    if let Some(counter) = HTTP_REQUESTS_TOTAL.get() {
        counter.with_label_values(&[method, path, &status]).inc();
    }
    if let Some(histogram) = HTTP_REQUEST_DURATION_SECONDS.get() {
        histogram
            .with_label_values(&[method, path, &status])
            .observe(seconds);
    }
}

/// Render the registry in the Prometheus text format.
pub fn get_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return String::new();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }

    String::from_utf8(buffer).unwrap_or_default()
}
