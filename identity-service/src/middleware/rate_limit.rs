use service_core::middleware::rate_limit::{
    RateLimitDecision, RateLimitRule, RateLimiter, RouteRateLimit,
};
use std::sync::Arc;

use crate::models::{AuthEvent, AuthEventKind};
use crate::services::AuthEventLogger;

/// Route classes with their own buckets.
pub const LOGIN: &str = "login";
pub const SSO: &str = "sso";
pub const REFRESH: &str = "refresh";
pub const TWO_FACTOR: &str = "two_factor";
pub const GENERAL: &str = "general";

/// Limiter state for one route class; rejections are recorded as
/// `rate_limited` auth events.
pub fn route_limit(
    limiter: &RateLimiter,
    class: &'static str,
    rule: RateLimitRule,
    trusted_proxy_hops: usize,
    events: Arc<AuthEventLogger>,
) -> RouteRateLimit {
    RouteRateLimit::new(limiter.clone(), class, rule)
        .with_trusted_proxy_hops(trusted_proxy_hops)
        .with_reject_hook(Arc::new(move |key: &str, decision: &RateLimitDecision| {
            events.log(AuthEvent::new(AuthEventKind::RateLimited).details(
                serde_json::json!({
                    "class": class,
                    "key": key,
                    "count": decision.count,
                    "limit": decision.limit,
                    "reset_at": decision.reset_at,
                }),
            ));
        }))
}
