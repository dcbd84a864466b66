mod common;

use axum::http::{Method, StatusCode};
use common::{body_json, request, TestApp, TEST_USER};
use totp_rs::{Algorithm, Secret, TOTP};

fn current_code(secret: &str) -> String {
    let bytes = Secret::Encoded(secret.to_string()).to_bytes().unwrap();
    TOTP::new(
        Algorithm::SHA1,
        6,
        1,
        30,
        bytes,
        None,
        "test@cyber-eco.test".to_string(),
    )
    .unwrap()
    .generate_current()
    .unwrap()
}

/// Wrong six-digit code for `secret`.
fn wrong_code(secret: &str) -> String {
    let code: u32 = current_code(secret).parse().unwrap();
    format!("{:06}", (code + 500_000) % 1_000_000)
}

/// Setup then enable; returns the secret and the plaintext backup codes.
async fn enrol(app: &TestApp, token: &str) -> (String, Vec<String>) {
    let response = app
        .send(request(
            Method::POST,
            "/auth/2fa/setup",
            Some(token),
            Some(serde_json::json!({ "email": "test@cyber-eco.test" })),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let setup = body_json(response).await;

    let secret = setup["secret"].as_str().unwrap().to_string();
    assert!(setup["otpauth_url"]
        .as_str()
        .unwrap()
        .starts_with("otpauth://totp/"));
    let backup_codes: Vec<String> = serde_json::from_value(setup["backup_codes"].clone()).unwrap();
    assert_eq!(backup_codes.len(), 10);

    let response = app
        .send(request(
            Method::POST,
            "/auth/2fa/enable",
            Some(token),
            Some(serde_json::json!({
                "secret": secret,
                "code": current_code(&secret),
                "backup_codes": backup_codes,
            })),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    (secret, backup_codes)
}

#[tokio::test]
async fn test_enrol_and_verify() {
    let app = TestApp::new().await;
    let token = app.access_token(TEST_USER);

    let status = body_json(
        app.send(request(Method::GET, "/auth/2fa", Some(&token), None))
            .await,
    )
    .await;
    assert_eq!(status["enabled"], false);

    let (secret, _) = enrol(&app, &token).await;

    // The enrolling device is trusted
    let status = body_json(
        app.send(request(Method::GET, "/auth/2fa", Some(&token), None))
            .await,
    )
    .await;
    assert_eq!(status["enabled"], true);
    assert_eq!(status["trusted_device"], true);

    let response = app
        .send(request(
            Method::POST,
            "/auth/2fa/verify",
            Some(&token),
            Some(serde_json::json!({ "code": current_code(&secret) })),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["verified"], true);

    let response = app
        .send(request(
            Method::POST,
            "/auth/2fa/verify",
            Some(&token),
            Some(serde_json::json!({ "code": wrong_code(&secret) })),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_enable_twice_conflicts() {
    let app = TestApp::new().await;
    let token = app.access_token(TEST_USER);
    let (secret, _) = enrol(&app, &token).await;

    let response = app
        .send(request(
            Method::POST,
            "/auth/2fa/enable",
            Some(&token),
            Some(serde_json::json!({
                "secret": secret,
                "code": current_code(&secret),
            })),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_enable_with_wrong_code_fails() {
    let app = TestApp::new().await;
    let token = app.access_token(TEST_USER);

    let setup = body_json(
        app.send(request(
            Method::POST,
            "/auth/2fa/setup",
            Some(&token),
            Some(serde_json::json!({ "email": "test@cyber-eco.test" })),
        ))
        .await,
    )
    .await;
    let secret = setup["secret"].as_str().unwrap();

    let response = app
        .send(request(
            Method::POST,
            "/auth/2fa/enable",
            Some(&token),
            Some(serde_json::json!({ "secret": secret, "code": wrong_code(secret) })),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(!app.state.two_factor.is_enabled(TEST_USER).await.unwrap());
}

#[tokio::test]
async fn test_backup_codes_are_single_use() {
    let app = TestApp::new().await;
    let token = app.access_token(TEST_USER);
    let (_, backup_codes) = enrol(&app, &token).await;

    let body = serde_json::json!({ "code": backup_codes[0], "backup": true });
    let response = app
        .send(request(
            Method::POST,
            "/auth/2fa/verify",
            Some(&token),
            Some(body.clone()),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .send(request(Method::POST, "/auth/2fa/verify", Some(&token), Some(body)))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_regenerated_backup_codes_replace_old_ones() {
    let app = TestApp::new().await;
    let token = app.access_token(TEST_USER);
    let (_, old_codes) = enrol(&app, &token).await;

    let response = app
        .send(request(
            Method::POST,
            "/auth/2fa/backup-codes",
            Some(&token),
            None,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let fresh: Vec<String> =
        serde_json::from_value(body_json(response).await["backup_codes"].clone()).unwrap();
    assert_eq!(fresh.len(), 10);

    let check = |code: &str| {
        request(
            Method::POST,
            "/auth/2fa/verify",
            Some(&token),
            Some(serde_json::json!({ "code": code, "backup": true })),
        )
    };
    assert_eq!(
        app.send(check(&old_codes[0])).await.status(),
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(app.send(check(&fresh[0])).await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_verify_when_not_enrolled_is_bad_request() {
    let app = TestApp::new().await;
    let token = app.access_token(TEST_USER);

    let response = app
        .send(request(
            Method::POST,
            "/auth/2fa/verify",
            Some(&token),
            Some(serde_json::json!({ "code": "123456" })),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_disable_requires_valid_code() {
    let app = TestApp::new().await;
    let token = app.access_token(TEST_USER);
    let (secret, _) = enrol(&app, &token).await;

    let response = app
        .send(request(
            Method::DELETE,
            "/auth/2fa",
            Some(&token),
            Some(serde_json::json!({ "code": wrong_code(&secret) })),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(app.state.two_factor.is_enabled(TEST_USER).await.unwrap());

    let response = app
        .send(request(
            Method::DELETE,
            "/auth/2fa",
            Some(&token),
            Some(serde_json::json!({ "code": current_code(&secret) })),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(!app.state.two_factor.is_enabled(TEST_USER).await.unwrap());
}

#[tokio::test]
async fn test_second_factor_outcomes_feed_login_rate() {
    let app = TestApp::new().await;
    let token = app.access_token(TEST_USER);
    let (secret, _) = enrol(&app, &token).await;

    for code in [current_code(&secret), wrong_code(&secret)] {
        app.send(request(
            Method::POST,
            "/auth/2fa/verify",
            Some(&token),
            Some(serde_json::json!({ "code": code })),
        ))
        .await;
    }

    let response = app
        .send(request(Method::GET, "/metrics/auth", None, None))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let metrics = body_json(response).await;
    assert_eq!(metrics["login_success"], 1);
    assert_eq!(metrics["login_failure"], 1);
    assert_eq!(metrics["login_success_rate"], 0.5);
}
