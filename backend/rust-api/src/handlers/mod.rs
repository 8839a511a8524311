use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose, Engine as _};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::metrics;
use crate::services::AppState;

pub mod activity;
pub mod answers;
pub mod auth;
pub mod certificates;
pub mod courses;
pub mod edges;
pub mod hubs;
pub mod questions;
pub mod quizzes;
pub mod student_quiz;
pub mod tasks;
pub mod users;

/// Runs one dependency check under a timeout and reports it as JSON.
async fn probe<F, E>(name: &str, timeout: Duration, check: F) -> (bool, Value)
where
    F: Future<Output = Result<(), E>>,
    E: std::fmt::Display,
{
    match tokio::time::timeout(timeout, check).await {
        Ok(Ok(())) => (true, json!({ "status": "healthy" })),
        Ok(Err(e)) => (
            false,
            json!({ "status": "unhealthy", "error": format!("{} error: {}", name, e) }),
        ),
        Err(_) => (
            false,
            json!({
                "status": "unhealthy",
                "error": format!("{} timeout after {}ms", name, timeout.as_millis()),
            }),
        ),
    }
}

/// GET /health
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (mongo_ok, mongodb) = probe("MongoDB", Duration::from_secs(1), async {
        state
            .mongo
            .run_command(mongodb::bson::doc! { "ping": 1 })
            .await
            .map(|_| ())
    })
    .await;

    let mut conn = state.redis.clone();
    let (redis_ok, redis) = probe("Redis", Duration::from_millis(500), async {
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
    })
    .await;

    let healthy = mongo_ok && redis_ok;
    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(json!({
            "status": if healthy { "healthy" } else { "degraded" },
            "service": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "dependencies": { "mongodb": mongodb, "redis": redis },
        })),
    )
}

/// GET /metrics
pub async fn metrics_handler() -> impl IntoResponse {
    match metrics::render_metrics() {
        Ok(text) => (StatusCode::OK, text),
        Err(e) => {
            tracing::error!(error = %e, "Failed to render metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to render metrics".to_string(),
            )
        }
    }
}

fn basic_credentials(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = general_purpose::STANDARD.decode(encoded.trim()).ok()?;
    String::from_utf8(decoded).ok()
}

/// HTTP Basic guard for /metrics; expects `user:password` from configuration.
pub async fn metrics_auth_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    match basic_credentials(request.headers()) {
        Some(credentials) if credentials == state.config.metrics_basic_auth => {
            Ok(next.run(request).await)
        }
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}
