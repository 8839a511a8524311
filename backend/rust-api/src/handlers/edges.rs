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
        graph::{CreateEdgeRequest, EdgeResponse, UpdateEdgeRequest},
        parse_object_id,
        user::CurrentUser,
    },
    services::{graph_service::GraphService, AppState},
};

fn graph(state: &AppState) -> GraphService {
    GraphService::new(state.mongo_client.clone(), state.mongo.clone(), state.notifier())
}

/// POST /api/edges
/// Re-posting an existing (from, to) pair updates that edge.
pub async fn create_edge(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    AppJson(req): AppJson<CreateEdgeRequest>,
) -> ApiResult<impl IntoResponse> {
    let edge = graph(&state).create_edge(&user, req).await?;
    Ok((StatusCode::CREATED, Json(edge)))
}

/// PATCH /api/edges/{id}
pub async fn update_edge(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
    AppJson(req): AppJson<UpdateEdgeRequest>,
) -> ApiResult<Json<EdgeResponse>> {
    let edge_id = parse_object_id(&id, "edge id")?;
    Ok(Json(graph(&state).update_edge(&user, edge_id, req).await?))
}

/// DELETE /api/edges/{id}
pub async fn delete_edge(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let edge_id = parse_object_id(&id, "edge id")?;
    graph(&state).delete_edge(&user, edge_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
