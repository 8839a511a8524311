use axum::{
    extract::{Path, Query, State},
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
        quiz::{CreateQuizRequest, ListQuizzesQuery, QuizResponse, UpdateQuizRequest},
        user::CurrentUser,
    },
    services::{quiz_service::QuizService, AppState},
};

fn quizzes(state: &AppState) -> QuizService {
    QuizService::new(state.mongo_client.clone(), state.mongo.clone())
}

/// GET /api/quizzes?course_id=
pub async fn list_quizzes(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Query(query): Query<ListQuizzesQuery>,
) -> ApiResult<Json<Vec<QuizResponse>>> {
    let course_id = parse_object_id(&query.course_id, "course_id")?;
    Ok(Json(quizzes(&state).list(&user, course_id).await?))
}

/// POST /api/quizzes
pub async fn create_quiz(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    AppJson(req): AppJson<CreateQuizRequest>,
) -> ApiResult<impl IntoResponse> {
    let quiz = quizzes(&state).create(&user, req).await?;
    Ok((StatusCode::CREATED, Json(quiz)))
}

/// GET /api/quizzes/{id}
pub async fn get_quiz(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<QuizResponse>> {
    let quiz_id = parse_object_id(&id, "quiz id")?;
    Ok(Json(quizzes(&state).get(&user, quiz_id).await?))
}

/// PATCH /api/quizzes/{id}
pub async fn update_quiz(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
    AppJson(req): AppJson<UpdateQuizRequest>,
) -> ApiResult<Json<QuizResponse>> {
    let quiz_id = parse_object_id(&id, "quiz id")?;
    Ok(Json(quizzes(&state).update(&user, quiz_id, req).await?))
}

/// DELETE /api/quizzes/{id}
pub async fn delete_quiz(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let quiz_id = parse_object_id(&id, "quiz id")?;
    quizzes(&state).delete(&user, quiz_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
