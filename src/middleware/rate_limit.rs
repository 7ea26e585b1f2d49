//! Rate limiting middleware.
//!
//! Fixed-window counters keyed by `{route_id}-{identity_or_ip}`. Each key owns
//! one window that starts with its first request; bursts across a window
//! boundary are accepted in exchange for O(1) state per key.

use crate::auth::cookies::ACCESS_COOKIE_NAME;
use crate::error::{AuthError, ConfigError};
use axum::{
    extract::{Request, State},
    http::{header::RETRY_AFTER, HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use dashmap::DashMap;
use metrics::increment_counter;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

pub const ANONYMOUS_KEY: &str = "anon";

/// Longest accepted window
pub const MAX_RATE_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

// IETF draft-6 header names
const RATELIMIT_POLICY: &str = "ratelimit-policy";
const RATELIMIT_LIMIT: &str = "ratelimit-limit";
const RATELIMIT_REMAINING: &str = "ratelimit-remaining";
const RATELIMIT_RESET: &str = "ratelimit-reset";

/// Limit for one route.
#[derive(Debug, Clone)]
pub struct RateLimitRule {
    /// Prefix of every key counted under this rule.
    pub route_id: String,
    /// Maximum requests per window.
    pub limit: u32,
    /// Window duration.
    pub window: Duration,
}

impl RateLimitRule {
    pub fn new(route_id: impl Into<String>, limit: u32, window: Duration) -> Self {
        Self {
            route_id: route_id.into(),
            limit,
            window,
        }
    }

    /// Reject rules that would block everything or overflow the clock
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.limit == 0 {
            return Err(ConfigError::ZeroValue("rate limit"));
        }
        if self.window.is_zero() {
            return Err(ConfigError::ZeroValue("rate limit window"));
        }
        if self.window > MAX_RATE_WINDOW {
            return Err(ConfigError::WindowTooLong {
                route: self.route_id.clone(),
                max_secs: MAX_RATE_WINDOW.as_secs(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    window_start: Instant,
    count: u32,
}

/// Counters shared by every limiter in the process.
///
/// Each key is updated under its shard's lock through the entry API, so the
/// increment and the limit comparison happen as one step and unrelated keys
/// rarely contend.
#[derive(Debug, Default)]
pub struct RateWindowStore {
    windows: DashMap<String, RateWindow>,
}

impl RateWindowStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn hit(&self, key: &str, limit: u32, window: Duration, now: Instant) -> RateLimitStatus {
        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert(RateWindow {
                window_start: now,
                count: 0,
            });

        // Reset window if expired
        if now.saturating_duration_since(entry.window_start) >= window {
            entry.window_start = now;
            entry.count = 0;
        }

        entry.count = entry.count.saturating_add(1);

        RateLimitStatus {
            allowed: entry.count <= limit,
            limit,
            remaining: limit.saturating_sub(entry.count),
            reset_after: entry
                .window_start
                .checked_add(window)
                .map_or(window, |end| end.saturating_duration_since(now)),
            window,
        }
    }

    /// Drop windows that ended long ago (call from a background task).
    pub fn purge_expired(&self, longest_window: Duration) {
        self.purge_expired_at(longest_window, Instant::now());
    }

    pub fn purge_expired_at(&self, longest_window: Duration, now: Instant) {
        self.windows.retain(|_, entry| {
            now.saturating_duration_since(entry.window_start) < longest_window.saturating_mul(2)
        });
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

/// Outcome of counting one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_after: Duration,
    window: Duration,
}

impl RateLimitStatus {
    /// Whole seconds until the window resets, never longer than the window.
    pub fn retry_after_secs(&self) -> u64 {
        ceil_secs(self.reset_after).clamp(1, ceil_secs(self.window).max(1))
    }

    fn apply_headers(&self, headers: &mut HeaderMap) {
        let policy = format!("{};w={}", self.limit, ceil_secs(self.window));
        if let Ok(value) = HeaderValue::from_str(&policy) {
            headers.insert(RATELIMIT_POLICY, value);
        }
        headers.insert(RATELIMIT_LIMIT, HeaderValue::from(self.limit));
        headers.insert(RATELIMIT_REMAINING, HeaderValue::from(self.remaining));
        headers.insert(
            RATELIMIT_RESET,
            HeaderValue::from(ceil_secs(self.reset_after)),
        );
    }
}

fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

/// Per-route limiter backed by a shared store.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    rule: Arc<RateLimitRule>,
    store: Arc<RateWindowStore>,
}

impl RateLimiter {
    pub fn new(rule: RateLimitRule, store: Arc<RateWindowStore>) -> Result<Self, ConfigError> {
        rule.validate()?;
        Ok(Self {
            rule: Arc::new(rule),
            store,
        })
    }

    pub fn rule(&self) -> &RateLimitRule {
        &self.rule
    }

    /// Check if request should be allowed.
    pub fn check(&self, identity_or_ip: &str) -> RateLimitStatus {
        self.check_at(identity_or_ip, Instant::now())
    }

    pub fn check_at(&self, identity_or_ip: &str, now: Instant) -> RateLimitStatus {
        let key = format!("{}-{}", self.rule.route_id, identity_or_ip);
        self.store.hit(&key, self.rule.limit, self.rule.window, now)
    }
}

/// Identity part of the rate-limit key.
///
/// A session cookie keeps one user on one bucket across IP changes; it is
/// hashed so raw credentials never sit in the store.
pub fn client_key(headers: &HeaderMap) -> String {
    let jar = CookieJar::from_headers(headers);
    if let Some(token) = jar
        .get(ACCESS_COOKIE_NAME)
        .map(|c| c.value())
        .filter(|v| !v.is_empty())
    {
        return hex::encode(Sha256::digest(token.as_bytes()));
    }

    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    header("x-forwarded-for")
        .or_else(|| header("x-real-ip"))
        .unwrap_or_else(|| ANONYMOUS_KEY.to_string())
}

/// Rate limiting middleware function.
pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    request: Request,
    next: Next,
) -> Response {
    let client = client_key(request.headers());
    let status = limiter.check(&client);

    let mut response = if status.allowed {
        next.run(request).await
    } else {
        increment_counter!("rate_limit_rejected_total", "route" => limiter.rule().route_id.clone());
        warn!(
            route = %limiter.rule().route_id,
            retry_after_secs = status.retry_after_secs(),
            "Rate limit exceeded"
        );

        let mut response = AuthError::RateLimited.into_response();
        response
            .headers_mut()
            .insert(RETRY_AFTER, HeaderValue::from(status.retry_after_secs()));
        response
    };

    status.apply_headers(response.headers_mut());
    response
}
