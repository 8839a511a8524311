use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use crate::{
    error::ApiResult,
    extractors::AppJson,
    models::{
        parse_object_id,
        quiz::{AttemptSummary, SubmitAttemptRequest, SubmitAttemptResponse},
        user::CurrentUser,
    },
    services::{quiz_engine::QuizEngine, AppState},
};

fn engine(state: &AppState) -> QuizEngine {
    QuizEngine::new(
        state.mongo_client.clone(),
        state.mongo.clone(),
        state.notifier(),
        state.config.quiz_attempt_ttl_seconds,
    )
}

/// POST /api/student-quiz/hubs/{hub_id}/quiz/start
pub async fn start_attempt(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(hub_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let hub_id = parse_object_id(&hub_id, "hub id")?;
    let attempt = engine(&state).start_attempt(&user, hub_id).await?;
    Ok((StatusCode::CREATED, Json(attempt)))
}

/// POST /api/student-quiz/quizzes/{quiz_id}/submit
pub async fn submit_attempt(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(quiz_id): Path<String>,
    AppJson(req): AppJson<SubmitAttemptRequest>,
) -> ApiResult<Json<SubmitAttemptResponse>> {
    let quiz_id = parse_object_id(&quiz_id, "quiz id")?;
    Ok(Json(engine(&state).submit_attempt(&user, quiz_id, req).await?))
}

/// GET /api/student-quiz/quizzes/{quiz_id}/attempts
pub async fn list_attempts(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(quiz_id): Path<String>,
) -> ApiResult<Json<Vec<AttemptSummary>>> {
    let quiz_id = parse_object_id(&quiz_id, "quiz id")?;
    Ok(Json(engine(&state).list_attempts(&user, quiz_id).await?))
}
