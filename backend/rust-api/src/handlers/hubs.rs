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
        graph::{ContentPayload, CreateHubRequest, HubResponse, UpdateHubRequest},
        parse_object_id,
        progress::{ProgressRequest, ProgressResponse},
        user::CurrentUser,
    },
    services::{graph_service::GraphService, progress_service::ProgressService, AppState},
};

fn graph(state: &AppState) -> GraphService {
    GraphService::new(state.mongo_client.clone(), state.mongo.clone(), state.notifier())
}

/// POST /api/hubs
pub async fn create_hub(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    AppJson(req): AppJson<CreateHubRequest>,
) -> ApiResult<impl IntoResponse> {
    let hub = graph(&state).create_hub(&user, req).await?;
    Ok((StatusCode::CREATED, Json(hub)))
}

/// GET /api/hubs/{id}
pub async fn get_hub(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<HubResponse>> {
    let hub_id = parse_object_id(&id, "hub id")?;
    Ok(Json(graph(&state).get_hub(&user, hub_id).await?))
}

/// PATCH /api/hubs/{id}
pub async fn update_hub(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
    AppJson(req): AppJson<UpdateHubRequest>,
) -> ApiResult<Json<HubResponse>> {
    let hub_id = parse_object_id(&id, "hub id")?;
    Ok(Json(graph(&state).update_hub(&user, hub_id, req).await?))
}

/// DELETE /api/hubs/{id}
pub async fn delete_hub(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let hub_id = parse_object_id(&id, "hub id")?;
    graph(&state).delete_hub(&user, hub_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/hubs/{id}/content
pub async fn get_hub_content(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<ContentPayload>> {
    let hub_id = parse_object_id(&id, "hub id")?;
    Ok(Json(graph(&state).hub_content(&user, hub_id).await?))
}

/// PATCH /api/hubs/{id}/content
pub async fn set_hub_content(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
    AppJson(content): AppJson<ContentPayload>,
) -> ApiResult<Json<ContentPayload>> {
    let hub_id = parse_object_id(&id, "hub id")?;
    Ok(Json(graph(&state).set_hub_content(&user, hub_id, content).await?))
}

/// PUT /api/hubs/{id}/progress
pub async fn set_hub_progress(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
    AppJson(req): AppJson<ProgressRequest>,
) -> ApiResult<Json<ProgressResponse>> {
    let hub_id = parse_object_id(&id, "hub id")?;
    ProgressService::new(state.mongo_client.clone(), state.mongo.clone(), state.notifier())
        .set_hub_progress(&user, hub_id, req.done)
        .await?;
    Ok(Json(ProgressResponse { success: true }))
}
