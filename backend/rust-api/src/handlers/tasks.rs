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
        graph::{ContentPayload, CreateTaskRequest, TaskResponse, UpdateTaskRequest},
        parse_object_id,
        progress::{ProgressRequest, ProgressResponse},
        user::CurrentUser,
    },
    services::{graph_service::GraphService, progress_service::ProgressService, AppState},
};

fn graph(state: &AppState) -> GraphService {
    GraphService::new(state.mongo_client.clone(), state.mongo.clone(), state.notifier())
}

/// POST /api/tasks
pub async fn create_task(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    AppJson(req): AppJson<CreateTaskRequest>,
) -> ApiResult<impl IntoResponse> {
    let task = graph(&state).create_task(&user, req).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

/// GET /api/tasks/{id}
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<TaskResponse>> {
    let task_id = parse_object_id(&id, "task id")?;
    Ok(Json(graph(&state).get_task(&user, task_id).await?))
}

/// PATCH /api/tasks/{id}
pub async fn update_task(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
    AppJson(req): AppJson<UpdateTaskRequest>,
) -> ApiResult<Json<TaskResponse>> {
    let task_id = parse_object_id(&id, "task id")?;
    Ok(Json(graph(&state).update_task(&user, task_id, req).await?))
}

/// DELETE /api/tasks/{id}
pub async fn delete_task(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let task_id = parse_object_id(&id, "task id")?;
    graph(&state).delete_task(&user, task_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/tasks/{id}/content
pub async fn get_task_content(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<ContentPayload>> {
    let task_id = parse_object_id(&id, "task id")?;
    Ok(Json(graph(&state).task_content(&user, task_id).await?))
}

/// PATCH /api/tasks/{id}/content
pub async fn set_task_content(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
    AppJson(content): AppJson<ContentPayload>,
) -> ApiResult<Json<ContentPayload>> {
    let task_id = parse_object_id(&id, "task id")?;
    Ok(Json(graph(&state).set_task_content(&user, task_id, content).await?))
}

/// PUT /api/tasks/{id}/progress
pub async fn set_task_progress(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
    AppJson(req): AppJson<ProgressRequest>,
) -> ApiResult<Json<ProgressResponse>> {
    let task_id = parse_object_id(&id, "task id")?;
    ProgressService::new(state.mongo_client.clone(), state.mongo.clone(), state.notifier())
        .set_task_progress(&user, task_id, req.done)
        .await?;
    Ok(Json(ProgressResponse { success: true }))
}
