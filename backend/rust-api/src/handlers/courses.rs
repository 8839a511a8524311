use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use validator::Validate;

use crate::{
    error::ApiResult,
    extractors::AppJson,
    models::{
        course::{
            AssignTeacherRequest, CourseMemberResponse, CourseResponse, CreateCourseRequest,
            EnrollStudentRequest, UpdateCourseRequest,
        },
        graph::CourseGraphResponse,
        parse_object_id,
        progress::CourseProgressResponse,
        user::CurrentUser,
    },
    services::{
        course_service::CourseService, graph_service::GraphService,
        progress_service::ProgressService, AppState,
    },
};

fn course_service(state: &AppState) -> CourseService {
    CourseService::new(state.mongo_client.clone(), state.mongo.clone(), state.notifier())
}

/// GET /api/courses
pub async fn list_courses(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> ApiResult<Json<Vec<CourseResponse>>> {
    Ok(Json(course_service(&state).list(&user).await?))
}

/// POST /api/courses
pub async fn create_course(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    AppJson(req): AppJson<CreateCourseRequest>,
) -> ApiResult<impl IntoResponse> {
    req.validate()?;
    let course = course_service(&state).create(&user, req).await?;
    Ok((StatusCode::CREATED, Json(course)))
}

/// GET /api/courses/{id}
pub async fn get_course(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<CourseResponse>> {
    let course_id = parse_object_id(&id, "course id")?;
    Ok(Json(course_service(&state).get(&user, course_id).await?))
}

/// PATCH /api/courses/{id}
pub async fn update_course(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
    AppJson(req): AppJson<UpdateCourseRequest>,
) -> ApiResult<Json<CourseResponse>> {
    req.validate()?;
    let course_id = parse_object_id(&id, "course id")?;
    Ok(Json(course_service(&state).update(&user, course_id, req).await?))
}

/// DELETE /api/courses/{id}
pub async fn delete_course(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let course_id = parse_object_id(&id, "course id")?;
    course_service(&state).delete(&user, course_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/courses/{id}/graph
pub async fn course_graph(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<CourseGraphResponse>> {
    let course_id = parse_object_id(&id, "course id")?;
    let graph = GraphService::new(state.mongo_client.clone(), state.mongo.clone(), state.notifier())
        .course_graph(&user, course_id)
        .await?;
    Ok(Json(graph))
}

/// GET /api/courses/{id}/progress
pub async fn course_progress(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<CourseProgressResponse>> {
    let course_id = parse_object_id(&id, "course id")?;
    let progress =
        ProgressService::new(state.mongo_client.clone(), state.mongo.clone(), state.notifier())
            .course_progress(&user, course_id)
            .await?;
    Ok(Json(progress))
}

/// GET /api/courses/{id}/teachers
pub async fn list_teachers(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<CourseMemberResponse>>> {
    let course_id = parse_object_id(&id, "course id")?;
    Ok(Json(course_service(&state).list_teachers(&user, course_id).await?))
}

/// POST /api/courses/{id}/teachers
pub async fn assign_teacher(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
    AppJson(req): AppJson<AssignTeacherRequest>,
) -> ApiResult<impl IntoResponse> {
    let course_id = parse_object_id(&id, "course id")?;
    let teacher_id = parse_object_id(&req.user_id, "user_id")?;
    let member = course_service(&state)
        .assign_teacher(&user, course_id, teacher_id, req)
        .await?;
    Ok((StatusCode::CREATED, Json(member)))
}

/// DELETE /api/courses/{id}/teachers/{user_id}
pub async fn remove_teacher(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path((id, user_id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let course_id = parse_object_id(&id, "course id")?;
    let teacher_id = parse_object_id(&user_id, "user id")?;
    course_service(&state)
        .remove_teacher(&user, course_id, teacher_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/courses/{id}/enrollments
pub async fn list_enrollments(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<CourseMemberResponse>>> {
    let course_id = parse_object_id(&id, "course id")?;
    Ok(Json(course_service(&state).list_enrollments(&user, course_id).await?))
}

/// POST /api/courses/{id}/enrollments
pub async fn enroll_student(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
    AppJson(req): AppJson<EnrollStudentRequest>,
) -> ApiResult<impl IntoResponse> {
    let course_id = parse_object_id(&id, "course id")?;
    let student_id = parse_object_id(&req.user_id, "user_id")?;
    let member = course_service(&state)
        .enroll(&user, course_id, student_id)
        .await?;
    Ok((StatusCode::CREATED, Json(member)))
}

/// DELETE /api/courses/{id}/enrollments/{user_id}
pub async fn unenroll_student(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path((id, user_id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let course_id = parse_object_id(&id, "course id")?;
    let student_id = parse_object_id(&user_id, "user id")?;
    course_service(&state)
        .unenroll(&user, course_id, student_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
