//! Question bank routes. Under `/api/questions/{id}` the id is a quiz id for
//! `/questions` and a question id everywhere else.

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
        quiz::{CreateAnswerRequest, CreateQuestionRequest, QuestionResponse, UpdateQuestionRequest},
        user::CurrentUser,
    },
    services::{quiz_service::QuizService, AppState},
};

fn quizzes(state: &AppState) -> QuizService {
    QuizService::new(state.mongo_client.clone(), state.mongo.clone())
}

/// GET /api/questions/{quiz_id}/questions
pub async fn list_questions(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<QuestionResponse>>> {
    let quiz_id = parse_object_id(&id, "quiz id")?;
    Ok(Json(quizzes(&state).list_questions(&user, quiz_id).await?))
}

/// POST /api/questions/{quiz_id}/questions
pub async fn create_question(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
    AppJson(req): AppJson<CreateQuestionRequest>,
) -> ApiResult<impl IntoResponse> {
    let quiz_id = parse_object_id(&id, "quiz id")?;
    let question = quizzes(&state).create_question(&user, quiz_id, req).await?;
    Ok((StatusCode::CREATED, Json(question)))
}

/// PATCH /api/questions/{id}
pub async fn update_question(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
    AppJson(req): AppJson<UpdateQuestionRequest>,
) -> ApiResult<Json<QuestionResponse>> {
    let question_id = parse_object_id(&id, "question id")?;
    Ok(Json(quizzes(&state).update_question(&user, question_id, req).await?))
}

/// DELETE /api/questions/{id}
pub async fn delete_question(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let question_id = parse_object_id(&id, "question id")?;
    quizzes(&state).delete_question(&user, question_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/questions/{question_id}/answers
pub async fn create_answer(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
    AppJson(req): AppJson<CreateAnswerRequest>,
) -> ApiResult<impl IntoResponse> {
    let question_id = parse_object_id(&id, "question id")?;
    let answer = quizzes(&state).create_answer(&user, question_id, req).await?;
    Ok((StatusCode::CREATED, Json(answer)))
}
