use axum::http::{Method, StatusCode};
use serde_json::json;

mod common;

use common::{create_test_app, unique_email};

#[tokio::test]
#[ignore = "requires MongoDB replica set and Redis (.env.test)"]
async fn test_register_returns_token_and_student_profile() {
    let app = create_test_app().await;
    let email = unique_email("ada");

    let (status, body) = app
        .send(
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({ "email": email, "password": "password123", "name": "Ada" })),
        )
        .await;

    assert_eq!(status, StatusCode::CREATED);
    assert!(body["token"].as_str().is_some_and(|t| !t.is_empty()));
    assert_eq!(body["user"]["role"], "student");
    assert_eq!(body["user"]["email"], email);
}

#[tokio::test]
#[ignore = "requires MongoDB replica set and Redis (.env.test)"]
async fn test_duplicate_email_is_conflict() {
    let app = create_test_app().await;
    let user = app.register_student("Grace").await;

    let (status, _) = app
        .send(
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({ "email": user.email.to_uppercase(), "password": "password123", "name": "Grace" })),
        )
        .await;

    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
#[ignore = "requires MongoDB replica set and Redis (.env.test)"]
async fn test_short_password_is_rejected() {
    let app = create_test_app().await;

    let (status, body) = app
        .send(
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({ "email": unique_email("short"), "password": "short", "name": "S" })),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].is_string());
}

#[tokio::test]
#[ignore = "requires MongoDB replica set and Redis (.env.test)"]
async fn test_login_with_wrong_password_is_unauthorized() {
    let app = create_test_app().await;
    let user = app.register_student("Linus").await;

    let (status, body) = app
        .send(
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "email": user.email, "password": "wrong-password" })),
        )
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Invalid email or password");
}

#[tokio::test]
#[ignore = "requires MongoDB replica set and Redis (.env.test)"]
async fn test_repeated_login_failures_lock_the_account() {
    let app = create_test_app().await;
    let user = app.register_student("Locked").await;

    for _ in 0..5 {
        app.send(
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "email": user.email, "password": "wrong-password" })),
        )
        .await;
    }

    let (status, _) = app
        .send(
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "email": user.email, "password": "password123" })),
        )
        .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
#[ignore = "requires MongoDB replica set and Redis (.env.test)"]
async fn test_me_requires_token() {
    let app = create_test_app().await;

    let (status, _) = app.send(Method::GET, "/api/auth/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app.get("/api/auth/me", "not-a-jwt").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
#[ignore = "requires MongoDB replica set and Redis (.env.test)"]
async fn test_me_returns_resolved_role() {
    let app = create_test_app().await;
    let user = app.register_student("Barbara").await;

    let (status, body) = app.get("/api/auth/me", &user.token).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], user.id);
    assert_eq!(body["role"], "student");
}

#[tokio::test]
#[ignore = "requires MongoDB replica set and Redis (.env.test)"]
async fn test_malformed_json_uses_error_body_shape() {
    let app = create_test_app().await;

    let (status, body) = app
        .send(Method::POST, "/api/auth/login", None, Some(json!("not an object")))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().is_some());
}
