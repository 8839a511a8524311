use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use std::sync::Arc;
use validator::Validate;

use crate::{
    error::{ApiError, ApiResult},
    extractors::AppJson,
    middlewares::auth::JwtService,
    models::user::{AuthResponse, CurrentUser, LoginRequest, RegisterRequest, UserProfile},
    services::{auth_service::AuthService, AppState},
};

fn auth_service(state: &AppState) -> AuthService {
    AuthService::new(
        state.mongo.clone(),
        state.redis.clone(),
        JwtService::new(&state.config.jwt_secret),
        state.config.token_ttl_seconds,
    )
}

/// POST /api/auth/register
pub async fn register(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    req.validate()?;
    let response = auth_service(&state).register(req).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /api/auth/login
///
/// Repeated failures lock the email for a while; the lock is checked before
/// the password so a locked account cannot be probed.
pub async fn login(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    req.validate()?;
    let service = auth_service(&state);
    let email = req.email.trim().to_lowercase();

    if service.check_failed_attempts(&email).await? {
        tracing::warn!(email = %email, "Login blocked: too many failed attempts");
        return Err(ApiError::RateLimited(
            "Too many failed login attempts. Try again in 15 minutes".to_string(),
        ));
    }

    match service.login(req, &state.roles()).await {
        Ok(response) => {
            if let Err(e) = service.clear_failed_attempts(&email).await {
                tracing::warn!(error = %e, "Failed to reset login attempt counter");
            }
            Ok(Json(response))
        }
        Err(err @ ApiError::Unauthorized(_)) => {
            match service.increment_failed_attempts(&email).await {
                Ok(count) => tracing::info!(email = %email, count, "Failed login recorded"),
                Err(e) => tracing::warn!(error = %e, "Failed to record failed login"),
            }
            Err(err)
        }
        Err(err) => Err(err),
    }
}

/// GET /api/auth/me
pub async fn me(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> ApiResult<Json<UserProfile>> {
    let stored = auth_service(&state).get_user(user.id).await?;
    Ok(Json(UserProfile::from_user(stored, user.role)))
}
