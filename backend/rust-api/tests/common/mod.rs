#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use coursegraph_api::{config::Config, create_router, models::user::UserRole, services::AppState};
use http_body_util::BodyExt;
use mongodb::bson::{doc, oid::ObjectId, Document};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
}

pub struct TestUser {
    pub id: String,
    pub name: String,
    pub email: String,
    pub token: String,
}

pub async fn create_test_app() -> TestApp {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    dotenvy::from_filename(".env.test").ok();
    std::env::set_var("RATE_LIMIT_DISABLED", "1");

    let config = Config::load().expect("Failed to load test configuration");
    let mongo_client = mongodb::Client::with_uri_str(&config.mongo_uri)
        .await
        .expect("Failed to connect to test MongoDB");
    let redis_client =
        redis::Client::open(config.redis_uri.clone()).expect("Failed to create test Redis client");

    let state = Arc::new(
        AppState::new(config, mongo_client, redis_client)
            .await
            .expect("Failed to initialize test app state"),
    );

    TestApp {
        router: create_router(state.clone()),
        state,
    }
}

impl TestApp {
    /// Sends a JSON request and returns the status with the parsed body
    /// (`Value::Null` for empty bodies).
    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).to_string())
            })
        };
        (status, value)
    }

    pub async fn get(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.send(Method::GET, uri, Some(token), None).await
    }

    pub async fn post(&self, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.send(Method::POST, uri, Some(token), Some(body)).await
    }

    pub async fn put(&self, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.send(Method::PUT, uri, Some(token), Some(body)).await
    }

    pub async fn patch(&self, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.send(Method::PATCH, uri, Some(token), Some(body)).await
    }

    pub async fn delete(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.send(Method::DELETE, uri, Some(token), None).await
    }

    pub fn db(&self) -> &mongodb::Database {
        &self.state.mongo
    }

    /// Registers a fresh student account.
    pub async fn register_student(&self, name: &str) -> TestUser {
        let email = unique_email(name);
        let (status, body) = self
            .send(
                Method::POST,
                "/api/auth/register",
                None,
                Some(json!({ "email": email, "password": "password123", "name": name })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "register failed: {}", body);

        TestUser {
            id: body["user"]["id"].as_str().unwrap().to_string(),
            name: name.to_string(),
            email,
            token: body["token"].as_str().unwrap().to_string(),
        }
    }

    /// Registers an account, sets its role directly in the database and logs
    /// in again so the token carries the new role.
    pub async fn register_with_role(&self, name: &str, role: UserRole) -> TestUser {
        let user = self.register_student(name).await;
        if role == UserRole::Student {
            return user;
        }

        let id = ObjectId::parse_str(&user.id).unwrap();
        self.db()
            .collection::<Document>("users")
            .update_one(doc! { "_id": id }, doc! { "$set": { "role_id": role.id() } })
            .await
            .unwrap();

        let (status, body) = self
            .send(
                Method::POST,
                "/api/auth/login",
                None,
                Some(json!({ "email": user.email, "password": "password123" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "login failed: {}", body);

        TestUser {
            token: body["token"].as_str().unwrap().to_string(),
            ..user
        }
    }

    /// Creates a course owned by `teacher` and returns its id.
    pub async fn create_course(&self, teacher: &TestUser, title: &str) -> String {
        let (status, body) = self
            .post("/api/courses", &teacher.token, json!({ "title": title }))
            .await;
        assert_eq!(status, StatusCode::CREATED, "create course failed: {}", body);
        body["id"].as_str().unwrap().to_string()
    }

    pub async fn create_hub(
        &self,
        teacher: &TestUser,
        course_id: &str,
        title: &str,
        is_required: bool,
    ) -> Value {
        let (status, body) = self
            .post(
                "/api/hubs",
                &teacher.token,
                json!({
                    "course_id": course_id,
                    "title": title,
                    "x": 0.0,
                    "y": 0.0,
                    "is_required": is_required,
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create hub failed: {}", body);
        body
    }

    pub async fn create_task(&self, teacher: &TestUser, hub_id: &str, title: &str) -> String {
        let (status, body) = self
            .post(
                "/api/tasks",
                &teacher.token,
                json!({ "hub_id": hub_id, "title": title, "x": 0.0, "y": 0.0, "is_required": true }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create task failed: {}", body);
        body["id"].as_str().unwrap().to_string()
    }

    pub async fn enroll(&self, teacher: &TestUser, course_id: &str, student: &TestUser) {
        let (status, body) = self
            .post(
                &format!("/api/courses/{}/enrollments", course_id),
                &teacher.token,
                json!({ "user_id": student.id }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "enroll failed: {}", body);
    }
}

pub fn unique_email(prefix: &str) -> String {
    format!(
        "{}-{}@example.com",
        prefix.to_lowercase().replace(' ', "-"),
        uuid::Uuid::new_v4().simple()
    )
}
