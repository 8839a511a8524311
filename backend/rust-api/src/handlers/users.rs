use axum::{
    extract::{Path, Query, State},
    Json,
};
use std::sync::Arc;

use crate::{
    error::ApiResult,
    extractors::AppJson,
    models::{
        parse_object_id,
        user::{CurrentUser, ListUsersQuery, UpdateUserRoleRequest, UserProfile},
    },
    services::{user_service::UserService, AppState},
};

/// GET /api/users?role=
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Query(query): Query<ListUsersQuery>,
) -> ApiResult<Json<Vec<UserProfile>>> {
    let users = UserService::new(state.mongo.clone())
        .list_users(&user, query.role)
        .await?;
    Ok(Json(users))
}

/// PATCH /api/users/{id}/role
pub async fn update_role(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
    AppJson(req): AppJson<UpdateUserRoleRequest>,
) -> ApiResult<Json<UserProfile>> {
    let user_id = parse_object_id(&id, "user id")?;
    let profile = UserService::new(state.mongo.clone())
        .update_role(&user, user_id, req.role)
        .await?;
    Ok(Json(profile))
}
