//! Prometheus metrics
//!
//! All collectors live in a single process registry and are rendered in
//! text exposition format by `GET /metrics`.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = {
        let registry = Registry::new();
        #[cfg(target_os = "linux")]
        if let Err(e) = registry.register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        )) {
            tracing::warn!(error = %e, "Process metrics unavailable");
        }
        registry
    };

    pub static ref TOKENS_ISSUED: IntCounterVec = register(IntCounterVec::new(
        Opts::new("scribe_tokens_issued_total", "Tokens issued by kind"),
        &["kind"],
    ));

    pub static ref TOKEN_ROTATIONS: IntCounter = register(IntCounter::new(
        "scribe_token_rotations_total",
        "Refresh tokens redeemed for a new pair",
    ));

    pub static ref REVOCATIONS: IntCounter = register(IntCounter::new(
        "scribe_revocations_total",
        "Tokens newly written to the revocation store",
    ));

    pub static ref REVOCATION_STORE_FAILURES: IntCounterVec = register(IntCounterVec::new(
        Opts::new(
            "scribe_revocation_store_failures_total",
            "Failed or timed out revocation store calls by operation",
        ),
        &["operation"],
    ));

    pub static ref RATE_LIMITED: IntCounterVec = register(IntCounterVec::new(
        Opts::new("scribe_rate_limited_total", "Requests rejected by the rate limiter"),
        &["operation"],
    ));

    pub static ref HTTP_REQUESTS: IntCounterVec = register(IntCounterVec::new(
        Opts::new("scribe_http_requests_total", "HTTP requests by endpoint and status"),
        &["endpoint", "status"],
    ));

    pub static ref HTTP_REQUEST_DURATION: Histogram = register(Histogram::with_opts(
        HistogramOpts::new("scribe_http_request_duration_seconds", "HTTP request latency")
            .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
    ));

    pub static ref REVOKED_TOKENS: IntGauge = register(IntGauge::new(
        "scribe_revoked_tokens",
        "Revoked token count reported by the revocation store",
    ));

    pub static ref RATE_LIMIT_WINDOWS: IntGauge = register(IntGauge::new(
        "scribe_rate_limit_windows",
        "Rate-limit windows currently held in memory",
    ));
}

/// Register a collector built from static options
///
/// Names and labels are compile-time constants, so failure here is a
/// programming error.
fn register<C>(collector: prometheus::Result<C>) -> C
where
    C: prometheus::core::Collector + Clone + 'static,
{
    let collector = collector.expect("metric options are valid");
    REGISTRY
        .register(Box::new(collector.clone()))
        .expect("metric is registered once");
    collector
}

pub fn record_issued(kind: scribe_core::TokenKind) {
    TOKENS_ISSUED.with_label_values(&[kind.as_str()]).inc();
}

pub fn record_store_failure(operation: &str) {
    REVOCATION_STORE_FAILURES
        .with_label_values(&[operation])
        .inc();
}

pub fn record_rate_limited(operation: &str) {
    RATE_LIMITED.with_label_values(&[operation]).inc();
}

pub fn record_request(endpoint: &str, status: u16, latency_secs: f64) {
    HTTP_REQUESTS
        .with_label_values(&[endpoint, &status.to_string()])
        .inc();
    HTTP_REQUEST_DURATION.observe(latency_secs);
}

/// Render every registered metric in Prometheus text format
pub fn render() -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use scribe_core::TokenKind;

    #[test]
    fn test_render_contains_recorded_metrics() {
        record_issued(TokenKind::Access);
        record_store_failure("exists");
        record_request("/health", 200, 0.002);

        let text = render().unwrap();
        assert!(text.contains("scribe_tokens_issued_total{kind=\"access\"}"));
        assert!(text.contains("scribe_revocation_store_failures_total{operation=\"exists\"}"));
        assert!(text.contains("scribe_http_request_duration_seconds_bucket"));
    }
}
