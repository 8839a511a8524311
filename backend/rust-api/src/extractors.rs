use axum::{
    extract::{FromRequest, FromRequestParts, Request},
    http::request::Parts,
    Json,
};
use std::sync::Arc;

use crate::error::ApiError;
use crate::middlewares::auth::JwtClaims;
use crate::models::parse_object_id;
use crate::models::user::CurrentUser;
use crate::services::AppState;

/// JSON body extractor whose rejection uses the regular error body shape.
pub struct AppJson<T>(pub T);

impl<T, S> FromRequest<S> for AppJson<T>
where
    T: serde::de::DeserializeOwned + 'static,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(AppJson(value)),
            Err(rejection) => {
                tracing::warn!(error = %rejection, "Rejected request body");
                Err(ApiError::validation(format!(
                    "Failed to parse JSON request body: {}",
                    rejection.body_text()
                )))
            }
        }
    }
}

/// The authenticated caller. Reads the claims left by the auth middleware and
/// resolves the role id carried in the token.
impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let claims = parts
            .extensions
            .get::<JwtClaims>()
            .cloned()
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;
        let id = parse_object_id(&claims.sub, "token subject")
            .map_err(|_| ApiError::unauthorized("Invalid token subject"))?;
        let role = state.roles().role_name(claims.role_id).await;

        Ok(CurrentUser {
            id,
            email: claims.email,
            name: claims.name,
            role,
        })
    }
}
