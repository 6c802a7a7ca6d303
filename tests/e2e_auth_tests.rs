//! End-to-end tests for authentication endpoints
//!
//! Tests signup, login, logout, session management, and authentication
//! requirements.

mod common;

use common::{TestClient, TestServer, OTHER_USER, TEST_PASS, TEST_USER};
use reqwest::StatusCode;
use serde_json::Value;

#[tokio::test]
async fn test_signup_creates_account_and_session() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client.signup("newuser", "secret99", "New", "User").await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let body: Value = response.json().await.unwrap();
    assert!(body["token"].as_str().unwrap().len() == 64);
    assert_eq!(body["user"]["username"], "newuser");

    // The session cookie is usable right away
    let response = client.get("/api/account").await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_signup_with_taken_username() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client.signup(TEST_USER, "secret99", "Copy", "Cat").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_signup_username_is_case_insensitive() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client
        .signup(&TEST_USER.to_uppercase(), "secret99", "Copy", "Cat")
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_signup_with_short_password() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client.signup("shorty", "abc", "Short", "Pass").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_login_with_valid_credentials() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client.login(TEST_USER, TEST_PASS).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["user"]["username"], TEST_USER);
}

#[tokio::test]
async fn test_login_with_invalid_password() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client.login(TEST_USER, "wrong_password").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_login_with_nonexistent_user() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client.login("nonexistent_user", "password").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_session_token_in_authorization_header() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client.login(TEST_USER, TEST_PASS).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    let token = body["token"].as_str().unwrap().to_string();

    // A fresh client with no cookies, using the Authorization header
    let bare = reqwest::Client::new();
    let response = bare
        .get(format!("{}/api/account", server.base_url))
        .header("Authorization", &token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_logout_clears_session() {
    let server = TestServer::spawn().await;
    let client = TestClient::authenticated(server.base_url.clone()).await;

    let response = client.get("/api/account").await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = client.logout().await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = client.get("/api/account").await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_protected_routes_require_session() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let protected_routes = vec![
        "/api/account",
        "/api/users",
        "/api/subscription",
        "/api/playlists",
        "/api/countries",
        "/api/artists",
        "/api/genres",
        "/api/albums",
        "/api/songs",
    ];

    for route in protected_routes {
        let response = client.get(route).await;
        assert_eq!(
            response.status(),
            StatusCode::FORBIDDEN,
            "route {} should require a session",
            route
        );
    }
}

#[tokio::test]
async fn test_update_account() {
    let server = TestServer::spawn().await;
    let client = TestClient::authenticated(server.base_url.clone()).await;

    let response = client
        .put_json(
            "/api/account",
            &serde_json::json!({
                "username": TEST_USER,
                "first_name": "Renamed",
                "last_name": "McTest",
            }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["first_name"], "Renamed");
}

#[tokio::test]
async fn test_update_account_to_taken_username() {
    let server = TestServer::spawn().await;
    let client = TestClient::authenticated(server.base_url.clone()).await;

    let response = client
        .put_json(
            "/api/account",
            &serde_json::json!({
                "username": OTHER_USER,
                "first_name": "Testy",
                "last_name": "McTest",
            }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_update_password() {
    let server = TestServer::spawn().await;
    let client = TestClient::authenticated(server.base_url.clone()).await;

    // Wrong current password is rejected
    let response = client
        .put_json(
            "/api/account/password",
            &serde_json::json!({
                "current_password": "not_the_password",
                "new_password": "brandnew99",
            }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = client
        .put_json(
            "/api/account/password",
            &serde_json::json!({
                "current_password": TEST_PASS,
                "new_password": "brandnew99",
            }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    // The new password works, the old one does not
    let fresh = TestClient::new(server.base_url.clone());
    let response = fresh.login(TEST_USER, TEST_PASS).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let response = fresh.login(TEST_USER, "brandnew99").await;
    assert_eq!(response.status(), StatusCode::OK);
}
