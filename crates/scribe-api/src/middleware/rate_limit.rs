//! Fixed-window rate limiting
//!
//! Counts requests per `(operation, actor)` in discrete windows whose length
//! is configured per operation. When a window has elapsed the next request
//! opens a fresh one with a count of 1. Fixed windows allow up to twice the
//! limit across a window boundary; that burst is accepted.
//!
//! The check-and-increment runs under the map's per-shard write lock, so
//! concurrent callers on the same key can never both observe `max - 1`.

use crate::audit::extract_ip_address;
use crate::error::AppError;
use crate::metrics;
use crate::state::AppState;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;
use scribe_core::{RateLimitConfig, RateLimitRule};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use utoipa::ToSchema;

/// Rate-limited operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    PostCreation,
    CommentCreation,
    Reaction,
    #[serde(rename = "auth")]
    AuthAttempt,
    General,
    #[serde(rename = "follow")]
    FollowAction,
    Search,
    Upload,
}

impl Operation {
    pub const ALL: [Operation; 8] = [
        Operation::PostCreation,
        Operation::CommentCreation,
        Operation::Reaction,
        Operation::AuthAttempt,
        Operation::General,
        Operation::FollowAction,
        Operation::Search,
        Operation::Upload,
    ];

    /// Tag used in window keys and the `rate_limits` config table
    pub fn tag(&self) -> &'static str {
        match self {
            Operation::PostCreation => "post_creation",
            Operation::CommentCreation => "comment_creation",
            Operation::Reaction => "reaction",
            Operation::AuthAttempt => "auth",
            Operation::General => "general",
            Operation::FollowAction => "follow",
            Operation::Search => "search",
            Operation::Upload => "upload",
        }
    }

    pub fn default_rule(&self) -> RateLimitRule {
        match self {
            Operation::PostCreation => RateLimitRule::new(10, 3600),
            Operation::CommentCreation => RateLimitRule::new(50, 3600),
            Operation::Reaction => RateLimitRule::new(200, 3600),
            Operation::AuthAttempt => RateLimitRule::new(5, 3600),
            Operation::General => RateLimitRule::new(60, 60),
            Operation::FollowAction => RateLimitRule::new(20, 3600),
            Operation::Search => RateLimitRule::new(30, 60),
            Operation::Upload => RateLimitRule::new(10, 3600),
        }
    }
}

impl std::str::FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .into_iter()
            .find(|op| op.tag() == s)
            .ok_or_else(|| format!("unknown operation: {s}"))
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started_at: Instant,
    length: Duration,
    count: u32,
}

impl Window {
    fn open(now: Instant, length: Duration) -> Self {
        Self {
            started_at: now,
            length,
            count: 0,
        }
    }

    fn elapsed(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.started_at) > self.length
    }
}

/// In-process rate limiter shared by every request task
#[derive(Debug)]
pub struct RateLimiter {
    windows: DashMap<String, Window>,
    rules: HashMap<Operation, RateLimitRule>,
}

impl RateLimiter {
    /// Rules come from `config`; operations missing from it use their defaults
    pub fn new(config: &RateLimitConfig) -> Self {
        let rules = Operation::ALL
            .into_iter()
            .map(|op| {
                let rule = config
                    .rules
                    .get(op.tag())
                    .copied()
                    .unwrap_or_else(|| op.default_rule());
                (op, rule)
            })
            .collect();
        Self {
            windows: DashMap::new(),
            rules,
        }
    }

    pub fn rule(&self, operation: Operation) -> RateLimitRule {
        self.rules
            .get(&operation)
            .copied()
            .unwrap_or_else(|| operation.default_rule())
    }

    /// Count one request for `actor` and report whether it is within the limit
    pub fn allow(&self, operation: Operation, actor: &str) -> bool {
        self.allow_at(operation, actor, Instant::now())
    }

    pub fn allow_at(&self, operation: Operation, actor: &str, now: Instant) -> bool {
        let rule = self.rule(operation);
        let length = Duration::from_secs(rule.window_secs);

        let count = {
            let mut window = self
                .windows
                .entry(window_key(operation, actor))
                .or_insert_with(|| Window::open(now, length));
            if window.elapsed(now) {
                *window = Window::open(now, length);
            }
            window.count = window.count.saturating_add(1);
            window.count
        };

        let allowed = count <= rule.max_requests;
        if !allowed {
            warn!(
                operation = %operation,
                actor = %actor,
                count,
                max = rule.max_requests,
                "Rate limit exceeded"
            );
            metrics::record_rate_limited(operation.tag());
        }
        allowed
    }

    /// Requests left in the current window
    pub fn remaining(&self, operation: Operation, actor: &str) -> u32 {
        self.remaining_at(operation, actor, Instant::now())
    }

    pub fn remaining_at(&self, operation: Operation, actor: &str, now: Instant) -> u32 {
        let max = self.rule(operation).max_requests;
        match self.windows.get(&window_key(operation, actor)) {
            Some(window) if !window.elapsed(now) => max.saturating_sub(window.count),
            _ => max,
        }
    }

    /// Drop the window for one key; returns whether it existed
    pub fn reset(&self, operation: Operation, actor: &str) -> bool {
        self.windows.remove(&window_key(operation, actor)).is_some()
    }

    pub fn clear_all(&self) {
        self.windows.clear();
    }

    /// Windows currently held
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Drop windows that have elapsed; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    pub fn purge_expired_at(&self, now: Instant) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, window| !window.elapsed(now));
        before.saturating_sub(self.windows.len())
    }

    /// Periodically purge elapsed windows until the task is aborted
    pub fn spawn_sweeper(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let purged = self.purge_expired();
                if purged > 0 {
                    debug!(purged, remaining = self.len(), "Swept rate-limit windows");
                }
            }
        })
    }
}

fn window_key(operation: Operation, actor: &str) -> String {
    format!("{}:{}", operation.tag(), actor)
}

/// Client address used as the actor for unauthenticated requests
///
/// Proxy headers win over the peer address of the connection.
pub fn client_actor(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    extract_ip_address(headers).or_else(|| peer.map(|addr| addr.ip().to_string()))
}

/// Per-client limit on the `general` operation for unauthenticated routes
///
/// Requires the server to be run with connect info; a request with neither
/// proxy headers nor a peer address is refused rather than pooled.
pub async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let peer = connect_info.map(|ConnectInfo(addr)| addr);
    let Some(actor) = client_actor(request.headers(), peer) else {
        warn!("No client address for rate limiting; is connect info enabled?");
        return Err(AppError::Internal(
            "client address unavailable".to_string(),
        ));
    };
    if !state.limiter.allow(Operation::General, &actor) {
        return Err(AppError::TooManyRequests(Operation::General.to_string()));
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter_with(operation: Operation, rule: RateLimitRule) -> RateLimiter {
        let mut config = RateLimitConfig::default();
        config.rules.insert(operation.tag().to_string(), rule);
        RateLimiter::new(&config)
    }

    #[test]
    fn test_fourth_call_rejected_then_window_resets() {
        let limiter = limiter_with(Operation::PostCreation, RateLimitRule::new(3, 60));
        let start = Instant::now();

        assert!(limiter.allow_at(Operation::PostCreation, "u1", start));
        assert!(limiter.allow_at(Operation::PostCreation, "u1", start));
        assert!(limiter.allow_at(Operation::PostCreation, "u1", start));
        assert!(!limiter.allow_at(Operation::PostCreation, "u1", start));

        // still inside the window at exactly its length
        let edge = start + Duration::from_secs(60);
        assert!(!limiter.allow_at(Operation::PostCreation, "u1", edge));

        let next = start + Duration::from_secs(61);
        assert!(limiter.allow_at(Operation::PostCreation, "u1", next));
        assert_eq!(limiter.remaining_at(Operation::PostCreation, "u1", next), 2);
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = limiter_with(Operation::Search, RateLimitRule::new(1, 60));
        let now = Instant::now();

        assert!(limiter.allow_at(Operation::Search, "a", now));
        assert!(!limiter.allow_at(Operation::Search, "a", now));
        assert!(limiter.allow_at(Operation::Search, "b", now));
        // same actor, different operation
        assert!(limiter.allow_at(Operation::Upload, "a", now));
    }

    #[test]
    fn test_boundary_burst_is_allowed() {
        let limiter = limiter_with(Operation::Reaction, RateLimitRule::new(2, 10));
        let start = Instant::now();

        assert!(limiter.allow_at(Operation::Reaction, "u", start + Duration::from_secs(9)));
        assert!(limiter.allow_at(Operation::Reaction, "u", start + Duration::from_secs(9)));
        // the window opened at 9s, so 20s is past it
        let after = start + Duration::from_secs(20);
        assert!(limiter.allow_at(Operation::Reaction, "u", after));
        assert!(limiter.allow_at(Operation::Reaction, "u", after));
        assert!(!limiter.allow_at(Operation::Reaction, "u", after));
    }

    #[test]
    fn test_defaults_when_rule_missing() {
        let config = RateLimitConfig {
            rules: Default::default(),
            ..RateLimitConfig::default()
        };
        let limiter = RateLimiter::new(&config);
        assert_eq!(
            limiter.rule(Operation::AuthAttempt),
            Operation::AuthAttempt.default_rule()
        );
    }

    #[test]
    fn test_reset_and_clear() {
        let limiter = limiter_with(Operation::FollowAction, RateLimitRule::new(1, 60));
        assert!(limiter.allow(Operation::FollowAction, "u"));
        assert!(!limiter.allow(Operation::FollowAction, "u"));
        assert_eq!(limiter.remaining(Operation::FollowAction, "u"), 0);

        assert!(limiter.reset(Operation::FollowAction, "u"));
        assert!(!limiter.reset(Operation::FollowAction, "u"));
        assert!(limiter.allow(Operation::FollowAction, "u"));

        limiter.allow(Operation::Search, "v");
        assert_eq!(limiter.len(), 2);
        limiter.clear_all();
        assert!(limiter.is_empty());
    }

    #[test]
    fn test_purge_expired() {
        let mut config = RateLimitConfig::default();
        config
            .rules
            .insert("general".to_string(), RateLimitRule::new(10, 1));
        config
            .rules
            .insert("upload".to_string(), RateLimitRule::new(10, 3600));
        let limiter = RateLimiter::new(&config);
        let start = Instant::now();

        limiter.allow_at(Operation::General, "a", start);
        limiter.allow_at(Operation::Upload, "a", start);

        assert_eq!(limiter.purge_expired_at(start + Duration::from_secs(2)), 1);
        assert_eq!(limiter.len(), 1);
    }

    #[test]
    fn test_operation_tags_roundtrip() {
        for op in Operation::ALL {
            assert_eq!(op.tag().parse::<Operation>().unwrap(), op);
            assert_eq!(
                serde_json::to_value(op).unwrap(),
                serde_json::Value::String(op.tag().to_string())
            );
        }
        assert!("bogus".parse::<Operation>().is_err());
    }

    #[test]
    fn test_concurrent_callers_never_exceed_max() {
        let limiter = Arc::new(limiter_with(Operation::Upload, RateLimitRule::new(3, 3600)));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || limiter.allow(Operation::Upload, "shared"))
            })
            .collect();

        let allowed = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|allowed| *allowed)
            .count();
        assert_eq!(allowed, 3);
    }

    #[test]
    fn test_client_actor_prefers_proxy_headers() {
        let peer: SocketAddr = "198.51.100.4:51000".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(
            client_actor(&headers, Some(peer)),
            Some("198.51.100.4".to_string())
        );
        assert_eq!(client_actor(&headers, None), None);

        headers.insert("x-forwarded-for", "203.0.113.9, 10.0.0.1".parse().unwrap());
        assert_eq!(
            client_actor(&headers, Some(peer)),
            Some("203.0.113.9".to_string())
        );
    }

    #[tokio::test]
    async fn test_sweeper_purges() {
        let mut config = RateLimitConfig::default();
        config
            .rules
            .insert("general".to_string(), RateLimitRule::new(10, 0));
        let limiter = Arc::new(RateLimiter::new(&config));
        limiter.allow(Operation::General, "a");

        let handle = limiter.clone().spawn_sweeper(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.abort();

        assert!(limiter.is_empty());
    }
}
