use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::{
    error::ApiResult,
    extractors::AppJson,
    models::{
        parse_object_id,
        quiz::{AnswerResponse, UpdateAnswerRequest},
        user::CurrentUser,
    },
    services::{quiz_service::QuizService, AppState},
};

/// PATCH /api/answers/{id}
pub async fn update_answer(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
    AppJson(req): AppJson<UpdateAnswerRequest>,
) -> ApiResult<Json<AnswerResponse>> {
    let answer_id = parse_object_id(&id, "answer id")?;
    let answer = QuizService::new(state.mongo_client.clone(), state.mongo.clone())
        .update_answer(&user, answer_id, req)
        .await?;
    Ok(Json(answer))
}

/// DELETE /api/answers/{id}
pub async fn delete_answer(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let answer_id = parse_object_id(&id, "answer id")?;
    QuizService::new(state.mongo_client.clone(), state.mongo.clone())
        .delete_answer(&user, answer_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
