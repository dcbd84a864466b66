mod common;

use axum::http::{Method, StatusCode};
use common::{body_json, request, TestApp, TEST_AGENT, TEST_IP, TEST_USER};
use identity_service::models::{DataType, Relationship};

#[tokio::test]
async fn test_consent_defaults() {
    let app = TestApp::new().await;
    let token = app.access_token(TEST_USER);

    let response = app
        .send(request(Method::GET, "/auth/consent", Some(&token), None))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let consent = body_json(response).await;
    assert_eq!(consent["necessary"], true);
    assert_eq!(consent["functional"], false);
    assert_eq!(consent["analytics"], false);
    assert_eq!(consent["marketing"], false);
    assert_eq!(consent["personalization"], false);
}

#[tokio::test]
async fn test_consent_update_and_history() {
    let app = TestApp::new().await;
    let token = app.access_token(TEST_USER);

    let response = app
        .send(request(
            Method::PUT,
            "/auth/consent",
            Some(&token),
            Some(serde_json::json!({
                "categories": { "analytics": true, "marketing": true }
            })),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let consent = body_json(response).await;
    assert_eq!(consent["analytics"], true);
    assert_eq!(consent["marketing"], true);
    assert_eq!(consent["functional"], false);

    // Withdraw one
    let response = app
        .send(request(
            Method::PUT,
            "/auth/consent",
            Some(&token),
            Some(serde_json::json!({ "categories": { "marketing": false } })),
        ))
        .await;
    let consent = body_json(response).await;
    assert_eq!(consent["analytics"], true);
    assert_eq!(consent["marketing"], false);

    let response = app
        .send(request(
            Method::GET,
            "/auth/consent/history",
            Some(&token),
            None,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let history = body_json(response).await;
    let history = history.as_array().unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[0]["category"], "marketing");
    assert_eq!(history[0]["granted"], false);
    assert_eq!(history[0]["metadata"]["ip_address"], TEST_IP);
    assert_eq!(history[0]["metadata"]["user_agent"], TEST_AGENT);

    let response = app
        .send(request(
            Method::GET,
            "/auth/consent/history?limit=1",
            Some(&token),
            None,
        ))
        .await;
    assert_eq!(body_json(response).await.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_necessary_consent_cannot_change() {
    let app = TestApp::new().await;
    let token = app.access_token(TEST_USER);

    let response = app
        .send(request(
            Method::PUT,
            "/auth/consent",
            Some(&token),
            Some(serde_json::json!({ "categories": { "necessary": false } })),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .send(request(
            Method::PUT,
            "/auth/consent",
            Some(&token),
            Some(serde_json::json!({ "categories": {} })),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_privacy_visibility_and_blocking() {
    let app = TestApp::new().await;
    let owner = app.access_token(TEST_USER);

    let response = app
        .send(request(
            Method::PUT,
            "/auth/privacy",
            Some(&owner),
            Some(serde_json::json!({ "visibility": { "email": "everyone" } })),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let settings = body_json(response).await;
    assert_eq!(settings["visibility"]["email"], "everyone");

    assert!(app
        .state
        .privacy
        .can_view("user-2", TEST_USER, DataType::Email, Some(Relationship::Stranger))
        .await
        .unwrap());

    let response = app
        .send(request(
            Method::PUT,
            "/auth/privacy/blocked/user-2",
            Some(&owner),
            None,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // Blocking overrides the everyone level
    assert!(!app
        .state
        .privacy
        .can_view("user-2", TEST_USER, DataType::Email, Some(Relationship::Stranger))
        .await
        .unwrap());

    let settings = body_json(
        app.send(request(Method::GET, "/auth/privacy", Some(&owner), None))
            .await,
    )
    .await;
    assert_eq!(settings["blocked_users"], serde_json::json!(["user-2"]));

    let unblock = || {
        request(
            Method::DELETE,
            "/auth/privacy/blocked/user-2",
            Some(&owner),
            None,
        )
    };
    assert_eq!(app.send(unblock()).await.status(), StatusCode::NO_CONTENT);
    assert_eq!(app.send(unblock()).await.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cannot_block_self() {
    let app = TestApp::new().await;
    let token = app.access_token(TEST_USER);

    let response = app
        .send(request(
            Method::PUT,
            &format!("/auth/privacy/blocked/{}", TEST_USER),
            Some(&token),
            None,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
