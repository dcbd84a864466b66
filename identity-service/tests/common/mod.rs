//! Test helpers for identity-service integration tests.
//!
//! Everything runs against the in-process store and in-memory repositories,
//! so no Redis or MongoDB is needed.

#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, Response},
    Router,
};
use identity_service::{
    build_router,
    config::{
        Environment, IdentityConfig, JwtConfig, MongoConfig, RateLimitConfig, RedisConfig,
        SecurityConfig, SessionConfig, TwoFactorConfig,
    },
    models::ClaimSet,
    services::AuthEventLogger,
    AppState, Repositories,
};
use secrecy::Secret;
use service_core::config::Config;
use service_core::store::MemoryStore;
use std::sync::Arc;
use tower::util::ServiceExt;

pub const TEST_USER: &str = "user-1";
pub const TEST_IP: &str = "203.0.113.10";
pub const TEST_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) Firefox/128.0";

pub fn test_config() -> IdentityConfig {
    IdentityConfig {
        common: Config {
            port: 8080,
            host: "127.0.0.1".to_string(),
        },
        environment: Environment::Dev,
        service_name: "identity-service-test".to_string(),
        service_version: "0.0.0".to_string(),
        log_level: "error".to_string(),
        otlp_endpoint: None,
        mongodb: MongoConfig {
            uri: None,
            database: "identity_test".to_string(),
        },
        redis: RedisConfig {
            url: None,
            key_prefix: "identity-test".to_string(),
        },
        jwt: JwtConfig {
            access_secret: Secret::new("test-access-secret-0123456789abcdef".to_string()),
            refresh_secret: Secret::new("test-refresh-secret-0123456789abcdef".to_string()),
            issuer: "https://auth.cyber-eco.test".to_string(),
            audience: "cybereco".to_string(),
            access_token_ttl_seconds: 3600,
            refresh_token_ttl_seconds: 604800,
            sso_token_ttl_seconds: 300,
            csrf_token_ttl_seconds: 3600,
        },
        session: SessionConfig {
            ttl_seconds: 604800,
            activity_threshold_seconds: 300,
            cleanup_batch_size: 100,
            cleanup_max_batches: 10,
        },
        two_factor: TwoFactorConfig {
            issuer: "CyberEco Test".to_string(),
            backup_code_key: Secret::new("test-backup-code-key".to_string()),
        },
        security: SecurityConfig {
            allowed_origins: vec!["http://localhost:40000".to_string()],
            trusted_proxy_hops: 1,
        },
        rate_limit: RateLimitConfig::default(),
        maintenance_interval_seconds: 300,
    }
}

pub struct TestApp {
    pub state: AppState,
    pub router: Router,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: IdentityConfig) -> Self {
        let state = AppState::new(
            config,
            Arc::new(MemoryStore::new()),
            Repositories::in_memory(),
            Arc::new(AuthEventLogger::default()),
        )
        .expect("Failed to build app state");
        let router = build_router(state.clone())
            .await
            .expect("Failed to build router");
        Self { state, router }
    }

    /// Access token for `user_id` with no session binding, as issued at the hub.
    pub fn access_token(&self, user_id: &str) -> String {
        self.state
            .tokens
            .generate_token_pair(
                user_id,
                ClaimSet::default().with_permissions(vec!["expenses:read".to_string()]),
            )
            .expect("Failed to issue token pair")
            .access_token
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("Router call failed")
    }
}

/// Request with the usual client headers, an optional bearer token and an
/// optional JSON body.
pub fn request(
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<serde_json::Value>,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-forwarded-for", TEST_IP)
        .header(header::USER_AGENT, TEST_AGENT);

    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }

    match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .expect("Failed to build request"),
        None => builder.body(Body::empty()).expect("Failed to build request"),
    }
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read body");
    serde_json::from_slice(&bytes).expect("Body is not JSON")
}

/// Value of the `refresh_token` cookie set on the response, if any.
pub fn refresh_cookie(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with("refresh_token="))
        .map(|v| v.to_string())
}

/// Run the hub to justsplit hand-off and return the verify response body.
pub async fn sso_sign_in(app: &TestApp, user_id: &str) -> serde_json::Value {
    let hub_token = app.access_token(user_id);
    let generated = app
        .send(request(
            Method::POST,
            "/auth/sso/generate",
            Some(&hub_token),
            Some(serde_json::json!({ "target_app": "justsplit" })),
        ))
        .await;
    assert_eq!(generated.status(), 200);
    let generated = body_json(generated).await;

    let verified = app
        .send(request(
            Method::POST,
            "/auth/sso/verify",
            None,
            Some(serde_json::json!({
                "token": generated["token"],
                "app": "justsplit",
            })),
        ))
        .await;
    assert_eq!(verified.status(), 200);
    body_json(verified).await
}
