use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use std::{net::IpAddr, net::SocketAddr, sync::Arc, time::Duration};

use crate::error::AppError;
use crate::store::{Store, WindowCount};

pub const RATE_LIMIT_LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const RATE_LIMIT_REMAINING_HEADER: &str = "x-ratelimit-remaining";
pub const RATE_LIMIT_RESET_HEADER: &str = "x-ratelimit-reset";

/// Threshold for one route class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRule {
    /// Requests accepted per window.
    pub limit: u32,
    pub window: Duration,
    /// Reset the counter after a successful response.
    pub forgive_on_success: bool,
}

impl RateLimitRule {
    pub fn new(limit: u32, window_seconds: u64) -> Self {
        Self {
            limit: limit.max(1),
            window: Duration::from_secs(window_seconds.max(1)),
            forgive_on_success: false,
        }
    }

    pub fn forgiving(mut self) -> Self {
        self.forgive_on_success = true;
        self
    }
}

/// Outcome of counting one request against a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub count: u64,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

impl RateLimitDecision {
    fn from_window(hit: WindowCount, limit: u32) -> Self {
        let remaining = (limit as u64).saturating_sub(hit.count) as u32;
        Self {
            allowed: hit.count <= limit as u64,
            limit,
            count: hit.count,
            remaining,
            reset_at: hit.reset_at,
        }
    }

    /// Whole seconds until the window resets, never less than one.
    pub fn retry_after_secs(&self) -> u64 {
        let secs = (self.reset_at - Utc::now()).num_milliseconds().max(0) as u64;
        secs.div_ceil(1000).max(1)
    }

    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        headers.insert(RATE_LIMIT_LIMIT_HEADER, HeaderValue::from(self.limit));
        headers.insert(RATE_LIMIT_REMAINING_HEADER, HeaderValue::from(self.remaining));
        headers.insert(
            RATE_LIMIT_RESET_HEADER,
            HeaderValue::from(self.reset_at.timestamp().max(0) as u64),
        );
    }
}

/// Windowed request counter over a pluggable [`Store`].
///
/// Counts are only as shared as the backing store: a `MemoryStore` limits
/// per process, a `RedisStore` limits across replicas.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn Store>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    fn bucket_key(key: &str) -> String {
        format!("ratelimit:{}", key)
    }

    /// Count one hit for `key`. An unseen or expired key starts a fresh window
    /// at 1; otherwise the count increments in place.
    pub async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount, anyhow::Error> {
        self.store
            .increment_window(&Self::bucket_key(key), window)
            .await
    }

    pub async fn check(
        &self,
        key: &str,
        rule: &RateLimitRule,
    ) -> Result<RateLimitDecision, anyhow::Error> {
        let hit = self.increment(key, rule.window).await?;
        Ok(RateLimitDecision::from_window(hit, rule.limit))
    }

    /// Forget the bucket for `key`.
    pub async fn reset(&self, key: &str) -> Result<(), anyhow::Error> {
        self.store.delete(&Self::bucket_key(key)).await?;
        Ok(())
    }

    /// Drop buckets whose window has elapsed.
    pub async fn cleanup(&self) -> Result<usize, anyhow::Error> {
        self.store.purge_expired().await
    }
}

/// Callback invoked when a request is rejected.
pub type RejectHook = Arc<dyn Fn(&str, &RateLimitDecision) + Send + Sync>;

/// Middleware state binding a limiter to one route class.
#[derive(Clone)]
pub struct RouteRateLimit {
    pub limiter: RateLimiter,
    pub class: &'static str,
    pub rule: RateLimitRule,
    /// Reverse proxies in front of the service whose `x-forwarded-for`
    /// entries are trusted. Zero ignores the header.
    pub trusted_proxy_hops: usize,
    pub on_reject: Option<RejectHook>,
}

impl RouteRateLimit {
    pub fn new(limiter: RateLimiter, class: &'static str, rule: RateLimitRule) -> Self {
        Self {
            limiter,
            class,
            rule,
            trusted_proxy_hops: 0,
            on_reject: None,
        }
    }

    pub fn with_trusted_proxy_hops(mut self, hops: usize) -> Self {
        self.trusted_proxy_hops = hops;
        self
    }

    pub fn with_reject_hook(mut self, hook: RejectHook) -> Self {
        self.on_reject = Some(hook);
        self
    }
}

/// Client address as seen through `trusted_proxy_hops` reverse proxies.
///
/// Each trusted proxy appends the address it received from, so the client is
/// the `trusted_proxy_hops`-th entry from the right of `x-forwarded-for`.
/// Anything left of it is caller-controlled. With no trusted proxies, or a
/// header too short to reach that entry, the socket peer is used.
pub fn forwarded_client_ip(
    headers: &HeaderMap,
    peer: Option<IpAddr>,
    trusted_proxy_hops: usize,
) -> Option<IpAddr> {
    if trusted_proxy_hops == 0 {
        return peer;
    }

    let hops: Vec<&str> = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    hops.iter()
        .rev()
        .nth(trusted_proxy_hops - 1)
        .and_then(|s| s.parse::<IpAddr>().ok())
        .or(peer)
}

/// Socket peer recorded by `into_make_service_with_connect_info`.
pub fn peer_ip(extensions: &axum::http::Extensions) -> Option<IpAddr> {
    extensions
        .get::<axum::extract::ConnectInfo<SocketAddr>>()
        .map(|axum::extract::ConnectInfo(addr)| addr.ip())
}

pub fn client_ip(request: &Request, trusted_proxy_hops: usize) -> Option<IpAddr> {
    forwarded_client_ip(
        request.headers(),
        peer_ip(request.extensions()),
        trusted_proxy_hops,
    )
}

/// Middleware counting requests per client IP and route class. Requests with
/// no resolvable address share one `unknown` bucket per class.
pub async fn rate_limit_middleware(
    State(route): State<RouteRateLimit>,
    request: Request,
    next: Next,
) -> Response {
    let ip = client_ip(&request, route.trusted_proxy_hops)
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| {
            tracing::debug!(class = route.class, "No client address; using shared bucket");
            "unknown".to_string()
        });
    let key = format!("{}:{}", route.class, ip);

    let decision = match route.limiter.check(&key, &route.rule).await {
        Ok(decision) => decision,
        Err(e) => {
            // Store outage: fail open
            tracing::error!(error = %e, class = route.class, "Rate limit store unavailable");
            return next.run(request).await;
        }
    };

    if !decision.allowed {
        tracing::warn!(
            class = route.class,
            ip = %ip,
            count = decision.count,
            limit = decision.limit,
            "Rate limit exceeded"
        );
        if let Some(hook) = &route.on_reject {
            hook(&key, &decision);
        }
        let mut response = AppError::TooManyRequests(
            "Too many requests. Please try again later.".to_string(),
            Some(decision.retry_after_secs()),
        )
        .into_response();
        decision.apply_headers(response.headers_mut());
        return response;
    }

    let mut response = next.run(request).await;

    if route.rule.forgive_on_success && response.status().is_success() {
        if let Err(e) = route.limiter.reset(&key).await {
            tracing::warn!(error = %e, class = route.class, "Failed to reset rate limit bucket");
        }
    }

    decision.apply_headers(response.headers_mut());
    response
}
