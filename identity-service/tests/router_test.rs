mod common;

use axum::http::{header, Method, StatusCode};
use common::{body_json, request, test_config, TestApp, TEST_USER};
use service_core::middleware::rate_limit::RateLimitRule;

#[tokio::test]
async fn test_health_check() {
    let app = TestApp::new().await;

    let response = app.send(request(Method::GET, "/health", None, None)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "identity-service-test");
    assert_eq!(body["checks"]["store"], "up");
    assert_eq!(body["checks"]["mongodb"], "disabled");
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let app = TestApp::new().await;

    let mut req = request(Method::GET, "/health", None, None);
    req.headers_mut()
        .insert("x-request-id", "req-abc-123".parse().unwrap());
    let response = app.send(req).await;
    assert_eq!(response.headers()["x-request-id"], "req-abc-123");

    // Minted when absent
    let response = app.send(request(Method::GET, "/health", None, None)).await;
    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn test_prometheus_endpoint_without_recorder() {
    let app = TestApp::new().await;

    let response = app.send(request(Method::GET, "/metrics", None, None)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_auth_metrics_snapshot() {
    let app = TestApp::new().await;
    let token = app.access_token(TEST_USER);
    app.state.tokens.revoke_user_tokens(TEST_USER).await.unwrap();

    let response = app
        .send(request(Method::GET, "/metrics/auth", None, None))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let metrics = body_json(response).await;
    assert_eq!(metrics["active_tokens"], 0);
    assert_eq!(metrics["login_success_rate"], 1.0);
    assert!(!token.is_empty());
}

#[tokio::test]
async fn test_protected_routes_require_bearer_token() {
    let app = TestApp::new().await;

    for (method, uri) in [
        (Method::GET, "/auth/sessions"),
        (Method::GET, "/auth/consent"),
        (Method::GET, "/auth/privacy"),
        (Method::GET, "/auth/2fa"),
    ] {
        let response = app.send(request(method, uri, None, None)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{}", uri);
    }

    let response = app
        .send(request(
            Method::GET,
            "/auth/consent",
            Some("not.a.token"),
            None,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"], "Authentication failed");
}

#[tokio::test]
async fn test_refresh_token_is_not_an_access_token() {
    let app = TestApp::new().await;
    let pair = app
        .state
        .tokens
        .generate_token_pair(TEST_USER, Default::default())
        .unwrap();

    let response = app
        .send(request(
            Method::GET,
            "/auth/consent",
            Some(&pair.refresh_token),
            None,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_refresh_route_is_rate_limited() {
    let mut config = test_config();
    config.rate_limit.refresh = RateLimitRule::new(2, 60);
    let app = TestApp::with_config(config).await;

    for _ in 0..2 {
        let response = app
            .send(request(Method::POST, "/auth/token/refresh", None, None))
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    let response = app
        .send(request(Method::POST, "/auth/token/refresh", None, None))
        .await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(header::RETRY_AFTER));

    let metrics = app.state.events.metrics();
    assert_eq!(metrics.rate_limited, 1);

    // Buckets are per route class
    let response = app.send(request(Method::GET, "/health", None, None)).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_login_class_counts_failed_second_factor() {
    let mut config = test_config();
    config.rate_limit.login = RateLimitRule::new(1, 900).forgiving();
    let app = TestApp::with_config(config).await;
    let token = app.access_token(TEST_USER);

    // Not enrolled: 400 counts against the bucket
    let verify = || {
        request(
            Method::POST,
            "/auth/2fa/verify",
            Some(&token),
            Some(serde_json::json!({ "code": "123456" })),
        )
    };
    assert_eq!(app.send(verify()).await.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        app.send(verify()).await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
}

#[tokio::test]
async fn test_cors_preflight_for_allowed_origin() {
    let app = TestApp::new().await;

    let mut req = request(Method::OPTIONS, "/auth/token/refresh", None, None);
    req.headers_mut()
        .insert(header::ORIGIN, "http://localhost:40000".parse().unwrap());
    req.headers_mut().insert(
        header::ACCESS_CONTROL_REQUEST_METHOD,
        "POST".parse().unwrap(),
    );

    let response = app.send(req).await;
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "http://localhost:40000"
    );
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_CREDENTIALS],
        "true"
    );
}
