use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;

use crate::{
    error::ApiResult,
    models::{
        certificate::{CertificateResponse, ClaimCertificateResponse},
        parse_object_id,
        user::CurrentUser,
    },
    services::{certificate_service::CertificateService, AppState},
};

/// GET /api/certificates/my
pub async fn my_certificates(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> ApiResult<Json<Vec<CertificateResponse>>> {
    let certificates = CertificateService::new(state.mongo.clone())
        .list_for_user(user.id)
        .await?;
    Ok(Json(certificates))
}

/// GET /api/certificates/users/{user_id}
pub async fn user_certificates(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(user_id): Path<String>,
) -> ApiResult<Json<Vec<CertificateResponse>>> {
    let user_id = parse_object_id(&user_id, "user id")?;
    let certificates = CertificateService::new(state.mongo.clone())
        .list_for_requester(&user, user_id)
        .await?;
    Ok(Json(certificates))
}

/// POST /api/certificates/courses/{course_id}/claim
pub async fn claim_certificate(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(course_id): Path<String>,
) -> ApiResult<Json<ClaimCertificateResponse>> {
    let course_id = parse_object_id(&course_id, "course id")?;
    let claimed = CertificateService::new(state.mongo.clone())
        .claim(&user, course_id)
        .await?;
    Ok(Json(claimed))
}
