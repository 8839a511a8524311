use axum::http::StatusCode;
use coursegraph_api::models::user::UserRole;
use serde_json::json;

mod common;

use common::create_test_app;

#[tokio::test]
#[ignore = "requires MongoDB replica set and Redis (.env.test)"]
async fn test_students_cannot_create_courses() {
    let app = create_test_app().await;
    let student = app.register_student("Student").await;

    let (status, _) = app
        .post("/api/courses", &student.token, json!({ "title": "Nope" }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
#[ignore = "requires MongoDB replica set and Redis (.env.test)"]
async fn test_first_hub_becomes_start_and_start_moves_exclusively() {
    let app = create_test_app().await;
    let teacher = app.register_with_role("Teacher", UserRole::Teacher).await;
    let course_id = app.create_course(&teacher, "Graphs").await;

    let first = app.create_hub(&teacher, &course_id, "Intro", true).await;
    let second = app.create_hub(&teacher, &course_id, "Next", true).await;
    assert_eq!(first["is_start"], true);
    assert_eq!(second["is_start"], false);

    let second_id = second["id"].as_str().unwrap();
    let (status, _) = app
        .patch(
            &format!("/api/hubs/{}", second_id),
            &teacher.token,
            json!({ "is_start": true }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, graph) = app
        .get(&format!("/api/courses/{}/graph", course_id), &teacher.token)
        .await;
    assert_eq!(status, StatusCode::OK);
    let starts: Vec<&str> = graph["hubs"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|hub| hub["is_start"] == true)
        .map(|hub| hub["id"].as_str().unwrap())
        .collect();
    assert_eq!(starts, vec![second_id]);
}

#[tokio::test]
#[ignore = "requires MongoDB replica set and Redis (.env.test)"]
async fn test_self_loop_edge_is_rejected_even_for_admin() {
    let app = create_test_app().await;
    let admin = app.register_with_role("Admin", UserRole::Admin).await;
    let course_id = app.create_course(&admin, "Loops").await;
    let hub = app.create_hub(&admin, &course_id, "Only", true).await;
    let hub_id = hub["id"].as_str().unwrap();

    let (status, _) = app
        .post(
            "/api/edges",
            &admin.token,
            json!({ "course_id": course_id, "from_hub_id": hub_id, "to_hub_id": hub_id }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
#[ignore = "requires MongoDB replica set and Redis (.env.test)"]
async fn test_recreating_an_edge_updates_it() {
    let app = create_test_app().await;
    let teacher = app.register_with_role("Teacher", UserRole::Teacher).await;
    let course_id = app.create_course(&teacher, "Edges").await;
    let a = app.create_hub(&teacher, &course_id, "A", true).await;
    let b = app.create_hub(&teacher, &course_id, "B", true).await;
    let body = json!({
        "course_id": course_id,
        "from_hub_id": a["id"],
        "to_hub_id": b["id"],
    });

    let (_, first) = app.post("/api/edges", &teacher.token, body.clone()).await;
    let (status, second) = app.post("/api/edges", &teacher.token, body).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["id"], second["id"]);
    let (_, graph) = app
        .get(&format!("/api/courses/{}/graph", course_id), &teacher.token)
        .await;
    assert_eq!(graph["edges"].as_array().unwrap().len(), 1);
}

#[tokio::test]
#[ignore = "requires MongoDB replica set and Redis (.env.test)"]
async fn test_locked_course_is_hidden_from_enrolled_student() {
    let app = create_test_app().await;
    let teacher = app.register_with_role("Teacher", UserRole::Teacher).await;
    let student = app.register_student("Student").await;
    let course_id = app.create_course(&teacher, "Lockable").await;
    app.enroll(&teacher, &course_id, &student).await;

    let uri = format!("/api/courses/{}", course_id);
    let (status, _) = app.get(&uri, &student.token).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .patch(&uri, &teacher.token, json!({ "is_locked": true }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.get(&uri, &student.token).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = app.get(&uri, &teacher.token).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
#[ignore = "requires MongoDB replica set and Redis (.env.test)"]
async fn test_co_teacher_can_view_but_not_edit() {
    let app = create_test_app().await;
    let owner = app.register_with_role("Owner", UserRole::Teacher).await;
    let helper = app.register_with_role("Helper", UserRole::Teacher).await;
    let course_id = app.create_course(&owner, "Shared").await;

    let (status, _) = app
        .post(
            &format!("/api/courses/{}/teachers", course_id),
            &owner.token,
            json!({ "user_id": helper.id, "is_owner": false }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let uri = format!("/api/courses/{}", course_id);
    let (status, _) = app.get(&uri, &helper.token).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app
        .patch(&uri, &helper.token, json!({ "title": "Hijacked" }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
#[ignore = "requires MongoDB replica set and Redis (.env.test)"]
async fn test_enrolling_a_teacher_is_rejected() {
    let app = create_test_app().await;
    let owner = app.register_with_role("Owner", UserRole::Teacher).await;
    let other = app.register_with_role("Other", UserRole::Teacher).await;
    let course_id = app.create_course(&owner, "Students only").await;

    let (status, _) = app
        .post(
            &format!("/api/courses/{}/enrollments", course_id),
            &owner.token,
            json!({ "user_id": other.id }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
#[ignore = "requires MongoDB replica set and Redis (.env.test)"]
async fn test_deleting_a_course_removes_its_graph() {
    let app = create_test_app().await;
    let teacher = app.register_with_role("Teacher", UserRole::Teacher).await;
    let course_id = app.create_course(&teacher, "Ephemeral").await;
    let hub = app.create_hub(&teacher, &course_id, "Gone", true).await;

    let (status, _) = app
        .delete(&format!("/api/courses/{}", course_id), &teacher.token)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app
        .get(&format!("/api/hubs/{}", hub["id"].as_str().unwrap()), &teacher.token)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
#[ignore = "requires MongoDB replica set and Redis (.env.test)"]
async fn test_concurrent_first_hubs_yield_one_start_hub() {
    let app = create_test_app().await;
    let teacher = app.register_with_role("Teacher", UserRole::Teacher).await;
    let course_id = app.create_course(&teacher, "Race").await;

    let hub = |title: &'static str| {
        app.post(
            "/api/hubs",
            &teacher.token,
            json!({ "course_id": course_id, "title": title, "x": 0.0, "y": 0.0 }),
        )
    };
    let ((first, _), (second, _), (third, _)) = tokio::join!(hub("A"), hub("B"), hub("C"));
    assert_eq!(first, StatusCode::CREATED);
    assert_eq!(second, StatusCode::CREATED);
    assert_eq!(third, StatusCode::CREATED);

    let (_, graph) = app
        .get(&format!("/api/courses/{}/graph", course_id), &teacher.token)
        .await;
    let hubs = graph["hubs"].as_array().unwrap();
    assert_eq!(hubs.len(), 3);
    assert_eq!(hubs.iter().filter(|hub| hub["is_start"] == true).count(), 1);
}

#[tokio::test]
#[ignore = "requires MongoDB replica set and Redis (.env.test)"]
async fn test_unenrolling_publishes_student_name() {
    use coursegraph_api::models::activity::ActivityKind;
    use mongodb::bson::{doc, oid::ObjectId, Document};

    let app = create_test_app().await;
    let teacher = app.register_with_role("Teacher", UserRole::Teacher).await;
    let kept = app.register_student("Kept Student").await;
    let gone = app.register_student("Gone Student").await;
    let course_id = app.create_course(&teacher, "Roster").await;
    app.enroll(&teacher, &course_id, &kept).await;
    app.enroll(&teacher, &course_id, &gone).await;

    let mut events = app.state.activity.subscribe();
    let (status, _) = app
        .delete(
            &format!("/api/courses/{}/enrollments/{}", course_id, kept.id),
            &teacher.token,
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let event = events.recv().await.unwrap();
    assert_eq!(event.kind, ActivityKind::EnrollmentRemoved);
    assert_eq!(event.user_name, "Kept Student");

    // A missing account still unenrolls; the event falls back to an empty name
    app.db()
        .collection::<Document>("users")
        .delete_one(doc! { "_id": ObjectId::parse_str(&gone.id).unwrap() })
        .await
        .unwrap();
    let (status, _) = app
        .delete(
            &format!("/api/courses/{}/enrollments/{}", course_id, gone.id),
            &teacher.token,
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let event = events.recv().await.unwrap();
    assert_eq!(event.user_name, "");
}
