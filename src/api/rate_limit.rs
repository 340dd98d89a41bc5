//! Rate limiting middleware using a sliding window algorithm.
//!
//! Counters are process-local and approximate under multi-instance
//! deployment; they deliberately reset on restart. The clock is injected so
//! tests can drive the window deterministically.

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::error::ApiError;
use crate::config::RateLimitConfig;
use crate::AppState;

/// Rate limit tier for different endpoint types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitTier {
    /// General API endpoints (100 req/min default)
    Api,
    /// Login/register endpoints (20 req/min default)
    Auth,
    /// Transaction creation, per user (5 req/min default)
    TransactionWrite,
}

/// What a rate-limit window is keyed by: the caller's IP for anonymous
/// traffic, the user id for per-user throttles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientKey {
    Ip(IpAddr),
    User(i64),
}

/// Time source for the limiter
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Production clock
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Entry in the rate limit tracker
#[derive(Debug, Clone)]
struct RateLimitEntry {
    /// Tokens remaining in the current window
    tokens: u32,
    /// Start of the current window
    window_start: Instant,
    /// Last request time (for sliding window)
    last_request: Instant,
}

impl RateLimitEntry {
    fn new(max_tokens: u32, now: Instant) -> Self {
        Self {
            tokens: max_tokens,
            window_start: now,
            last_request: now,
        }
    }
}

/// Thread-safe rate limiter using dashmap
pub struct RateLimiter {
    entries: DashMap<(ClientKey, RateLimitTier), RateLimitEntry>,
    config: RateLimitConfig,
    window_duration: Duration,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a new rate limiter with the given configuration
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a rate limiter with an injected time source
    pub fn with_clock(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            window_duration: Duration::from_secs(config.window_seconds),
            config,
            clock,
        }
    }

    /// Check if a request should be allowed and consume a token if so.
    /// Returns Ok(remaining_tokens) if allowed, Err(retry_after_seconds) if rate limited.
    pub fn check_rate_limit(
        &self,
        key: ClientKey,
        tier: RateLimitTier,
    ) -> Result<RateLimitInfo, u64> {
        if !self.config.enabled {
            return Ok(RateLimitInfo {
                remaining: u32::MAX,
                limit: u32::MAX,
                reset_after: 0,
            });
        }

        let max_tokens = self.max_tokens(tier);
        let now = self.clock.now();

        let mut entry = self
            .entries
            .entry((key, tier))
            .or_insert_with(|| RateLimitEntry::new(max_tokens, now));

        // Check if we need to reset the window
        let elapsed = now.duration_since(entry.window_start);
        if elapsed >= self.window_duration {
            entry.tokens = max_tokens;
            entry.window_start = now;
        } else {
            // Sliding window: replenish tokens gradually based on time elapsed
            // since the last request
            let since_last = now.duration_since(entry.last_request);
            let replenish_rate = max_tokens as f64 / self.window_duration.as_secs_f64();
            let replenished = (since_last.as_secs_f64() * replenish_rate) as u32;
            entry.tokens = (entry.tokens + replenished).min(max_tokens);
        }

        entry.last_request = now;

        if entry.tokens > 0 {
            entry.tokens -= 1;
            let remaining = entry.tokens;
            let reset_after = self.window_duration.saturating_sub(elapsed).as_secs();
            Ok(RateLimitInfo {
                remaining,
                limit: max_tokens,
                reset_after,
            })
        } else {
            let retry_after = self
                .window_duration
                .saturating_sub(elapsed)
                .as_secs()
                .max(1);
            Err(retry_after)
        }
    }

    /// Get the maximum tokens for a given tier
    fn max_tokens(&self, tier: RateLimitTier) -> u32 {
        match tier {
            RateLimitTier::Api => self.config.api_requests_per_window,
            RateLimitTier::Auth => self.config.auth_requests_per_window,
            RateLimitTier::TransactionWrite => self.config.write_requests_per_window,
        }
    }

    /// Clean up expired entries to prevent memory leaks
    pub fn cleanup_expired(&self) {
        let now = self.clock.now();
        let expiry = self.window_duration * 2;

        self.entries
            .retain(|_, entry| now.duration_since(entry.window_start) < expiry);
    }

    /// Get the number of tracked entries (for monitoring)
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }
}

/// Information about rate limit status
#[derive(Debug, Clone)]
pub struct RateLimitInfo {
    /// Remaining requests in the current window
    pub remaining: u32,
    /// Maximum requests per window
    pub limit: u32,
    /// Seconds until the window resets
    pub reset_after: u64,
}

/// Extract client IP from request headers
pub fn extract_client_ip(request: &Request<Body>) -> IpAddr {
    // Check X-Forwarded-For header first (for reverse proxy setups)
    if let Some(forwarded) = request.headers().get("x-forwarded-for") {
        if let Ok(value) = forwarded.to_str() {
            if let Some(ip_str) = value.split(',').next() {
                if let Ok(ip) = ip_str.trim().parse::<IpAddr>() {
                    return ip;
                }
            }
        }
    }

    if let Some(real_ip) = request.headers().get("x-real-ip") {
        if let Ok(value) = real_ip.to_str() {
            if let Ok(ip) = value.trim().parse::<IpAddr>() {
                return ip;
            }
        }
    }

    IpAddr::V4(std::net::Ipv4Addr::LOCALHOST)
}

/// Rate limiting middleware for general API endpoints
pub async fn rate_limit_api(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, Response> {
    rate_limit_with_tier(state, request, next, RateLimitTier::Api).await
}

/// Rate limiting middleware for login/register endpoints
pub async fn rate_limit_auth(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, Response> {
    rate_limit_with_tier(state, request, next, RateLimitTier::Auth).await
}

/// Core rate limiting logic
async fn rate_limit_with_tier(
    state: Arc<AppState>,
    request: Request<Body>,
    next: Next,
    tier: RateLimitTier,
) -> Result<Response, Response> {
    let ip = extract_client_ip(&request);

    match state.rate_limiter.check_rate_limit(ClientKey::Ip(ip), tier) {
        Ok(info) => {
            let response = next.run(request).await;

            // Add rate limit headers to successful responses
            let (mut parts, body) = response.into_parts();
            if let Ok(value) = info.limit.to_string().parse() {
                parts.headers.insert("X-RateLimit-Limit", value);
            }
            if let Ok(value) = info.remaining.to_string().parse() {
                parts.headers.insert("X-RateLimit-Remaining", value);
            }
            if let Ok(value) = info.reset_after.to_string().parse() {
                parts.headers.insert("X-RateLimit-Reset", value);
            }

            Ok(Response::from_parts(parts, body))
        }
        Err(retry_after) => Err(too_many_requests(retry_after)),
    }
}

/// Build a 429 response with a Retry-After hint
pub fn too_many_requests(retry_after: u64) -> Response {
    let error = ApiError::rate_limited(format!(
        "Too many requests, please try again in {} seconds",
        retry_after
    ));
    let (mut parts, body) = error.into_response().into_parts();
    if let Ok(value) = retry_after.to_string().parse() {
        parts.headers.insert("Retry-After", value);
    }
    Response::from_parts(parts, body)
}

/// Spawn a background task to periodically clean up expired rate limit entries
pub fn spawn_cleanup_task(rate_limiter: Arc<RateLimiter>, cleanup_interval_secs: u64) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(cleanup_interval_secs);
        loop {
            tokio::time::sleep(interval).await;
            rate_limiter.cleanup_expired();
            tracing::debug!(
                "Rate limiter cleanup complete, {} entries remaining",
                rate_limiter.entry_count()
            );
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn test_config() -> RateLimitConfig {
        RateLimitConfig {
            enabled: true,
            api_requests_per_window: 10,
            auth_requests_per_window: 3,
            write_requests_per_window: 5,
            window_seconds: 60,
            cleanup_interval: 300,
        }
    }

    fn ip_key(addr: &str) -> ClientKey {
        ClientKey::Ip(addr.parse().unwrap())
    }

    /// Clock that only advances when told to
    struct ManualClock {
        now: Mutex<Instant>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self {
                now: Mutex::new(Instant::now()),
            }
        }

        fn advance(&self, d: Duration) {
            let mut now = self.now.lock().unwrap();
            *now += d;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            *self.now.lock().unwrap()
        }
    }

    #[test]
    fn allows_requests_under_limit() {
        let limiter = RateLimiter::new(test_config());
        let key = ip_key("192.168.1.1");

        for i in 0..10 {
            let result = limiter.check_rate_limit(key, RateLimitTier::Api);
            assert!(result.is_ok(), "Request {} should be allowed", i);
        }
    }

    #[test]
    fn blocks_after_limit() {
        let limiter = RateLimiter::new(test_config());
        let key = ip_key("192.168.1.1");

        for _ in 0..10 {
            let _ = limiter.check_rate_limit(key, RateLimitTier::Api);
        }

        let result = limiter.check_rate_limit(key, RateLimitTier::Api);
        assert!(result.is_err(), "Request should be rate limited");
    }

    #[test]
    fn different_clients_have_separate_limits() {
        let limiter = RateLimiter::new(test_config());
        let a = ip_key("192.168.1.1");
        let b = ip_key("192.168.1.2");

        for _ in 0..10 {
            let _ = limiter.check_rate_limit(a, RateLimitTier::Api);
        }

        assert!(limiter.check_rate_limit(b, RateLimitTier::Api).is_ok());
    }

    #[test]
    fn user_write_throttle_is_independent_of_api_tier() {
        let limiter = RateLimiter::new(test_config());
        let user = ClientKey::User(42);

        for _ in 0..5 {
            assert!(limiter
                .check_rate_limit(user, RateLimitTier::TransactionWrite)
                .is_ok());
        }

        assert!(limiter
            .check_rate_limit(user, RateLimitTier::TransactionWrite)
            .is_err());
        assert!(limiter.check_rate_limit(user, RateLimitTier::Api).is_ok());
        assert!(limiter
            .check_rate_limit(ClientKey::User(43), RateLimitTier::TransactionWrite)
            .is_ok());
    }

    #[test]
    fn window_expiry_resets_tokens() {
        let clock = Arc::new(ManualClock::new());
        let limiter = RateLimiter::with_clock(test_config(), clock.clone());
        let key = ClientKey::User(7);

        for _ in 0..5 {
            let _ = limiter.check_rate_limit(key, RateLimitTier::TransactionWrite);
        }
        assert!(limiter
            .check_rate_limit(key, RateLimitTier::TransactionWrite)
            .is_err());

        clock.advance(Duration::from_secs(61));
        assert!(limiter
            .check_rate_limit(key, RateLimitTier::TransactionWrite)
            .is_ok());
    }

    #[test]
    fn tokens_replenish_within_window() {
        let clock = Arc::new(ManualClock::new());
        let limiter = RateLimiter::with_clock(test_config(), clock.clone());
        let key = ip_key("10.0.0.1");

        // Auth tier: 3 per 60s, one token replenished every 20s
        for _ in 0..3 {
            let _ = limiter.check_rate_limit(key, RateLimitTier::Auth);
        }
        assert!(limiter.check_rate_limit(key, RateLimitTier::Auth).is_err());

        clock.advance(Duration::from_secs(21));
        assert!(limiter.check_rate_limit(key, RateLimitTier::Auth).is_ok());
    }

    #[test]
    fn disabled_rate_limiting_allows_everything() {
        let mut config = test_config();
        config.enabled = false;
        let limiter = RateLimiter::new(config);
        let key = ip_key("192.168.1.1");

        for _ in 0..100 {
            assert!(limiter.check_rate_limit(key, RateLimitTier::Api).is_ok());
        }
    }

    #[test]
    fn cleanup_drops_stale_entries() {
        let clock = Arc::new(ManualClock::new());
        let limiter = RateLimiter::with_clock(test_config(), clock.clone());
        let key = ip_key("192.168.1.1");

        let _ = limiter.check_rate_limit(key, RateLimitTier::Api);
        assert_eq!(limiter.entry_count(), 1);

        limiter.cleanup_expired();
        assert_eq!(limiter.entry_count(), 1);

        clock.advance(Duration::from_secs(121));
        limiter.cleanup_expired();
        assert_eq!(limiter.entry_count(), 0);
    }
}
