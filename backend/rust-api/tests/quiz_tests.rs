use axum::http::StatusCode;
use coursegraph_api::models::user::UserRole;
use serde_json::{json, Value};

mod common;

use common::{create_test_app, TestApp, TestUser};

/// Creates a quiz on `hub_id` with `count` single-answer questions.
async fn create_quiz(app: &TestApp, teacher: &TestUser, course_id: &str, hub_id: &str, count: usize) -> String {
    let (status, quiz) = app
        .post(
            "/api/quizzes",
            &teacher.token,
            json!({
                "course_id": course_id,
                "hub_id": hub_id,
                "title": format!("Checkpoint {}", uuid::Uuid::new_v4().simple()),
                "questions_per_attempt": 3,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "create quiz failed: {}", quiz);
    let quiz_id = quiz["id"].as_str().unwrap().to_string();

    for n in 0..count {
        let (status, body) = app
            .post(
                &format!("/api/questions/{}/questions", quiz_id),
                &teacher.token,
                json!({
                    "text": format!("Question {}", n),
                    "answers": [
                        { "text": "right", "is_correct": true },
                        { "text": "wrong", "is_correct": false },
                    ],
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create question failed: {}", body);
    }
    quiz_id
}

/// Picks the correct answers for every shown question using the authoring view.
async fn correct_answers(app: &TestApp, teacher: &TestUser, quiz_id: &str, attempt: &Value) -> Value {
    let (_, bank) = app
        .get(&format!("/api/questions/{}/questions", quiz_id), &teacher.token)
        .await;
    let shown = attempt["questions"].as_array().unwrap();
    let entries: Vec<Value> = shown
        .iter()
        .map(|question| {
            let authored = bank
                .as_array()
                .unwrap()
                .iter()
                .find(|q| q["id"] == question["id"])
                .unwrap();
            let correct: Vec<&Value> = authored["answers"]
                .as_array()
                .unwrap()
                .iter()
                .filter(|a| a["is_correct"] == true)
                .map(|a| &a["id"])
                .collect();
            json!({ "question_id": question["id"], "answer_ids": correct })
        })
        .collect();
    json!(entries)
}

#[tokio::test]
#[ignore = "requires MongoDB replica set and Redis (.env.test)"]
async fn test_passing_a_quiz_completes_hub_and_unlocks_successor() {
    let app = create_test_app().await;
    let teacher = app.register_with_role("Teacher", UserRole::Teacher).await;
    let student = app.register_student("Student").await;
    let course_id = app.create_course(&teacher, "Quizzed").await;
    let gate = app.create_hub(&teacher, &course_id, "Gate", true).await;
    let next = app.create_hub(&teacher, &course_id, "Next", true).await;
    let gate_id = gate["id"].as_str().unwrap();
    app.post(
        "/api/edges",
        &teacher.token,
        json!({ "course_id": course_id, "from_hub_id": gate_id, "to_hub_id": next["id"] }),
    )
    .await;
    let quiz_id = create_quiz(&app, &teacher, &course_id, gate_id, 3).await;
    app.enroll(&teacher, &course_id, &student).await;

    let (status, attempt) = app
        .post(
            &format!("/api/student-quiz/hubs/{}/quiz/start", gate_id),
            &student.token,
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "start failed: {}", attempt);
    assert_eq!(attempt["questions"].as_array().unwrap().len(), 3);
    assert!(attempt["questions"][0]["answers"][0].get("is_correct").is_none());

    let answers = correct_answers(&app, &teacher, &quiz_id, &attempt).await;
    let submit_uri = format!("/api/student-quiz/quizzes/{}/submit", quiz_id);
    let submission = json!({
        "attempt_id": attempt["attempt_id"],
        "hub_id": gate_id,
        "answers": answers,
    });
    let (status, result) = app.post(&submit_uri, &student.token, submission.clone()).await;
    assert_eq!(status, StatusCode::OK, "submit failed: {}", result);
    assert_eq!(result["passed"], true);
    assert_eq!(result["score"], 3);
    assert_eq!(result["unlocked_hub_ids"], json!([next["id"]]));

    let (status, _) = app.post(&submit_uri, &student.token, submission).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, progress) = app
        .get(&format!("/api/courses/{}/progress", course_id), &student.token)
        .await;
    let gate_state = progress["hubs"]
        .as_array()
        .unwrap()
        .iter()
        .find(|entry| entry["hub_id"] == gate["id"])
        .unwrap();
    assert_eq!(gate_state["state"], "completed");
}

#[tokio::test]
#[ignore = "requires MongoDB replica set and Redis (.env.test)"]
async fn test_wrong_answer_fails_the_attempt() {
    let app = create_test_app().await;
    let teacher = app.register_with_role("Teacher", UserRole::Teacher).await;
    let student = app.register_student("Student").await;
    let course_id = app.create_course(&teacher, "Strict").await;
    let hub = app.create_hub(&teacher, &course_id, "Gate", true).await;
    let hub_id = hub["id"].as_str().unwrap();
    let quiz_id = create_quiz(&app, &teacher, &course_id, hub_id, 3).await;
    app.enroll(&teacher, &course_id, &student).await;

    let (_, attempt) = app
        .post(&format!("/api/student-quiz/hubs/{}/quiz/start", hub_id), &student.token, json!({}))
        .await;
    let mut answers = correct_answers(&app, &teacher, &quiz_id, &attempt).await;
    answers[0]["answer_ids"] = json!([]);

    let (status, result) = app
        .post(
            &format!("/api/student-quiz/quizzes/{}/submit", quiz_id),
            &student.token,
            json!({ "attempt_id": attempt["attempt_id"], "answers": answers }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["passed"], false);
    assert_eq!(result["score"], 2);
    assert!(result["certificate_id"].is_null());

    let (_, attempts) = app
        .get(&format!("/api/student-quiz/quizzes/{}/attempts", quiz_id), &student.token)
        .await;
    assert_eq!(attempts.as_array().unwrap().len(), 1);
    assert_eq!(attempts[0]["passed"], false);
}

#[tokio::test]
#[ignore = "requires MongoDB replica set and Redis (.env.test)"]
async fn test_small_question_bank_blocks_start() {
    let app = create_test_app().await;
    let teacher = app.register_with_role("Teacher", UserRole::Teacher).await;
    let student = app.register_student("Student").await;
    let course_id = app.create_course(&teacher, "Thin bank").await;
    let hub = app.create_hub(&teacher, &course_id, "Gate", true).await;
    let hub_id = hub["id"].as_str().unwrap();
    create_quiz(&app, &teacher, &course_id, hub_id, 2).await;
    app.enroll(&teacher, &course_id, &student).await;

    let (status, body) = app
        .post(&format!("/api/student-quiz/hubs/{}/quiz/start", hub_id), &student.token, json!({}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"]["required_questions"], 3);
    assert_eq!(body["detail"]["available_questions"], 2);
}

#[tokio::test]
#[ignore = "requires MongoDB replica set and Redis (.env.test)"]
async fn test_required_tasks_gate_the_quiz() {
    let app = create_test_app().await;
    let teacher = app.register_with_role("Teacher", UserRole::Teacher).await;
    let student = app.register_student("Student").await;
    let course_id = app.create_course(&teacher, "Gated").await;
    let hub = app.create_hub(&teacher, &course_id, "Gate", true).await;
    let hub_id = hub["id"].as_str().unwrap();
    let task = app.create_task(&teacher, hub_id, "Prerequisite").await;
    create_quiz(&app, &teacher, &course_id, hub_id, 3).await;
    app.enroll(&teacher, &course_id, &student).await;

    let start_uri = format!("/api/student-quiz/hubs/{}/quiz/start", hub_id);
    let (status, body) = app.post(&start_uri, &student.token, json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"]["required_tasks"], 1);
    assert_eq!(body["detail"]["completed_required_tasks"], 0);

    app.put(&format!("/api/tasks/{}/progress", task), &student.token, json!({ "done": true }))
        .await;
    let (status, _) = app.post(&start_uri, &student.token, json!({})).await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
#[ignore = "requires MongoDB replica set and Redis (.env.test)"]
async fn test_duplicate_quiz_title_is_conflict() {
    let app = create_test_app().await;
    let teacher = app.register_with_role("Teacher", UserRole::Teacher).await;
    let course_id = app.create_course(&teacher, "Titles").await;
    let body = json!({
        "course_id": course_id,
        "title": "Final",
        "questions_per_attempt": 5,
    });

    let (status, _) = app.post("/api/quizzes", &teacher.token, body.clone()).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = app.post("/api/quizzes", &teacher.token, body).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
#[ignore = "requires MongoDB replica set and Redis (.env.test)"]
async fn test_students_cannot_read_the_question_bank() {
    let app = create_test_app().await;
    let teacher = app.register_with_role("Teacher", UserRole::Teacher).await;
    let student = app.register_student("Student").await;
    let course_id = app.create_course(&teacher, "Secret").await;
    let hub = app.create_hub(&teacher, &course_id, "Gate", true).await;
    let quiz_id = create_quiz(&app, &teacher, &course_id, hub["id"].as_str().unwrap(), 3).await;
    app.enroll(&teacher, &course_id, &student).await;

    let (status, _) = app
        .get(&format!("/api/questions/{}/questions", quiz_id), &student.token)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
#[ignore = "requires MongoDB replica set and Redis (.env.test)"]
async fn test_passing_never_downgrades_a_completed_successor() {
    let app = create_test_app().await;
    let teacher = app.register_with_role("Teacher", UserRole::Teacher).await;
    let student = app.register_student("Student").await;
    let course_id = app.create_course(&teacher, "Ahead").await;
    let gate = app.create_hub(&teacher, &course_id, "Gate", true).await;
    let next = app.create_hub(&teacher, &course_id, "Next", true).await;
    let gate_id = gate["id"].as_str().unwrap();
    let next_id = next["id"].as_str().unwrap();
    app.post(
        "/api/edges",
        &teacher.token,
        json!({ "course_id": course_id, "from_hub_id": gate_id, "to_hub_id": next_id }),
    )
    .await;
    let quiz_id = create_quiz(&app, &teacher, &course_id, gate_id, 3).await;
    app.enroll(&teacher, &course_id, &student).await;

    let (status, _) = app
        .put(&format!("/api/hubs/{}/progress", next_id), &student.token, json!({ "done": true }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, attempt) = app
        .post(&format!("/api/student-quiz/hubs/{}/quiz/start", gate_id), &student.token, json!({}))
        .await;
    let answers = correct_answers(&app, &teacher, &quiz_id, &attempt).await;
    let (status, result) = app
        .post(
            &format!("/api/student-quiz/quizzes/{}/submit", quiz_id),
            &student.token,
            json!({ "attempt_id": attempt["attempt_id"], "answers": answers }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["passed"], true);
    assert_eq!(result["unlocked_hub_ids"], json!([]));

    let (_, progress) = app
        .get(&format!("/api/courses/{}/progress", course_id), &student.token)
        .await;
    let next_state = progress["hubs"]
        .as_array()
        .unwrap()
        .iter()
        .find(|entry| entry["hub_id"] == next_id)
        .unwrap();
    assert_eq!(next_state["state"], "completed");
    assert!(next_state["completed_at"].is_string());
}

#[tokio::test]
#[ignore = "requires MongoDB replica set and Redis (.env.test)"]
async fn test_questions_added_after_start_are_not_graded() {
    let app = create_test_app().await;
    let teacher = app.register_with_role("Teacher", UserRole::Teacher).await;
    let student = app.register_student("Student").await;
    let course_id = app.create_course(&teacher, "Frozen").await;
    let hub = app.create_hub(&teacher, &course_id, "Gate", true).await;
    let hub_id = hub["id"].as_str().unwrap();
    let quiz_id = create_quiz(&app, &teacher, &course_id, hub_id, 3).await;
    app.enroll(&teacher, &course_id, &student).await;

    let (_, attempt) = app
        .post(&format!("/api/student-quiz/hubs/{}/quiz/start", hub_id), &student.token, json!({}))
        .await;
    let answers = correct_answers(&app, &teacher, &quiz_id, &attempt).await;

    let (status, _) = app
        .post(
            &format!("/api/questions/{}/questions", quiz_id),
            &teacher.token,
            json!({
                "text": "Late question",
                "answers": [{ "text": "only", "is_correct": true }],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, result) = app
        .post(
            &format!("/api/student-quiz/quizzes/{}/submit", quiz_id),
            &student.token,
            json!({ "attempt_id": attempt["attempt_id"], "answers": answers }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["total"], 3);
    assert_eq!(result["score"], 3);
    assert_eq!(result["passed"], true);
}
