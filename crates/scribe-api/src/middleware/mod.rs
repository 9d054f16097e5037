//! HTTP middleware
//!
//! Request metrics and per-client rate limiting.

pub mod metrics;
pub mod rate_limit;

pub use metrics::metrics_middleware;
pub use rate_limit::{rate_limit_middleware, Operation, RateLimiter};
