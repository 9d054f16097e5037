//! Metrics tracking middleware
//!
//! Tracks request latency, counts and status codes for the Prometheus
//! endpoint.

use crate::metrics;
use crate::state::AppState;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

/// Metrics tracking middleware
///
/// Records:
/// - Request count per endpoint and status
/// - Request latency distribution
pub async fn metrics_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let endpoint = normalize_endpoint(request.uri().path());

    let response = next.run(request).await;

    state.increment_requests();
    metrics::record_request(
        &endpoint,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );

    response
}

/// Normalize endpoint paths for consistent metrics
///
/// Replaces ID and IP segments with placeholders so label cardinality stays
/// bounded (rate-limit reset paths carry client IPs as actors).
fn normalize_endpoint(path: &str) -> String {
    path.split('/')
        .map(|seg| {
            if is_uuid(seg) || is_numeric(seg) {
                ":id"
            } else if seg.parse::<IpAddr>().is_ok() {
                ":ip"
            } else {
                seg
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn is_uuid(s: &str) -> bool {
    uuid::Uuid::parse_str(s).is_ok() && s.len() == 36
}

fn is_numeric(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_endpoint() {
        assert_eq!(
            normalize_endpoint("/api/v1/admin/rate-limits/auth/42"),
            "/api/v1/admin/rate-limits/auth/:id"
        );
        assert_eq!(
            normalize_endpoint("/api/v1/users/550e8400-e29b-41d4-a716-446655440000"),
            "/api/v1/users/:id"
        );
        assert_eq!(
            normalize_endpoint("/api/v1/admin/rate-limits/general/203.0.113.9"),
            "/api/v1/admin/rate-limits/general/:ip"
        );
        assert_eq!(normalize_endpoint("/health"), "/health");
    }

    #[test]
    fn test_is_numeric() {
        assert!(is_numeric("123"));
        assert!(!is_numeric("12a"));
        assert!(!is_numeric(""));
    }
}
