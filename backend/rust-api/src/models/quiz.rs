use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use super::{bson_datetime_as_chrono, bson_datetime_as_chrono_option};

pub const ALLOWED_QUESTIONS_PER_ATTEMPT: [u32; 2] = [3, 5];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quiz {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub course_id: ObjectId,
    /// A quiz is attached to at most one hub.
    #[serde(default)]
    pub hub_id: Option<ObjectId>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub questions_per_attempt: u32,
    #[serde(with = "bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "bson_datetime_as_chrono")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizQuestion {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub quiz_id: ObjectId,
    pub text: String,
    #[serde(default)]
    pub order_index: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizAnswer {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub question_id: ObjectId,
    pub text: String,
    #[serde(default)]
    pub is_correct: bool,
    #[serde(default)]
    pub order_index: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmittedAnswer {
    pub question_id: ObjectId,
    pub answer_ids: Vec<ObjectId>,
}

/// One student's run through a quiz. `questions_shown` is frozen at start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizAttempt {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub quiz_id: ObjectId,
    pub user_id: ObjectId,
    pub hub_id: ObjectId,
    pub questions_shown: Vec<ObjectId>,
    #[serde(with = "bson_datetime_as_chrono")]
    pub started_at: DateTime<Utc>,
    #[serde(default, with = "bson_datetime_as_chrono_option")]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub answers: Option<Vec<SubmittedAnswer>>,
    #[serde(default)]
    pub passed: Option<bool>,
    #[serde(default)]
    pub score: Option<u32>,
}

fn validate_questions_per_attempt(value: u32) -> Result<(), ValidationError> {
    if ALLOWED_QUESTIONS_PER_ATTEMPT.contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::new("questions_per_attempt")
            .with_message("questions_per_attempt must be 3 or 5".into()))
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuizzesQuery {
    pub course_id: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateQuizRequest {
    pub course_id: String,
    pub hub_id: Option<String>,
    #[validate(length(min = 1, max = 200, message = "Title must be 1-200 characters"))]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[validate(custom(function = "validate_questions_per_attempt"))]
    pub questions_per_attempt: u32,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateQuizRequest {
    #[validate(length(min = 1, max = 200, message = "Title must be 1-200 characters"))]
    pub title: Option<String>,
    pub description: Option<String>,
    #[validate(custom(function = "validate_questions_per_attempt"))]
    pub questions_per_attempt: Option<u32>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateAnswerRequest {
    #[validate(length(min = 1, max = 1000, message = "Answer text is required"))]
    pub text: String,
    #[serde(default)]
    pub is_correct: bool,
    pub order_index: Option<i32>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateQuestionRequest {
    #[validate(length(min = 1, max = 2000, message = "Question text is required"))]
    pub text: String,
    pub order_index: Option<i32>,
    #[serde(default)]
    #[validate(nested)]
    pub answers: Vec<CreateAnswerRequest>,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateQuestionRequest {
    #[validate(length(min = 1, max = 2000, message = "Question text is required"))]
    pub text: Option<String>,
    pub order_index: Option<i32>,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateAnswerRequest {
    #[validate(length(min = 1, max = 1000, message = "Answer text is required"))]
    pub text: Option<String>,
    pub is_correct: Option<bool>,
    pub order_index: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct QuizResponse {
    pub id: String,
    pub course_id: String,
    pub hub_id: Option<String>,
    pub title: String,
    pub description: String,
    pub questions_per_attempt: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Quiz> for QuizResponse {
    fn from(quiz: Quiz) -> Self {
        QuizResponse {
            id: quiz.id.map(|id| id.to_hex()).unwrap_or_default(),
            course_id: quiz.course_id.to_hex(),
            hub_id: quiz.hub_id.map(|id| id.to_hex()),
            title: quiz.title,
            description: quiz.description,
            questions_per_attempt: quiz.questions_per_attempt,
            created_at: quiz.created_at,
            updated_at: quiz.updated_at,
        }
    }
}

/// Authoring view: includes correctness flags.
#[derive(Debug, Serialize)]
pub struct AnswerResponse {
    pub id: String,
    pub question_id: String,
    pub text: String,
    pub is_correct: bool,
    pub order_index: i32,
}

impl From<QuizAnswer> for AnswerResponse {
    fn from(answer: QuizAnswer) -> Self {
        AnswerResponse {
            id: answer.id.map(|id| id.to_hex()).unwrap_or_default(),
            question_id: answer.question_id.to_hex(),
            text: answer.text,
            is_correct: answer.is_correct,
            order_index: answer.order_index,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct QuestionResponse {
    pub id: String,
    pub quiz_id: String,
    pub text: String,
    pub order_index: i32,
    pub answers: Vec<AnswerResponse>,
}

/// Student view of one offered answer; correctness is never sent.
#[derive(Debug, Serialize)]
pub struct AttemptAnswerOption {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct AttemptQuestion {
    pub id: String,
    pub text: String,
    pub answers: Vec<AttemptAnswerOption>,
}

#[derive(Debug, Serialize)]
pub struct StartAttemptResponse {
    pub attempt_id: String,
    pub quiz_id: String,
    pub hub_id: String,
    pub title: String,
    pub description: String,
    pub questions: Vec<AttemptQuestion>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitAnswerEntry {
    pub question_id: String,
    #[serde(default)]
    pub answer_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitAttemptRequest {
    pub attempt_id: String,
    pub hub_id: Option<String>,
    #[serde(default)]
    pub answers: Vec<SubmitAnswerEntry>,
}

#[derive(Debug, Serialize)]
pub struct SubmitAttemptResponse {
    pub passed: bool,
    pub score: u32,
    pub total: u32,
    pub unlocked_hub_ids: Vec<String>,
    pub certificate_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AttemptSummary {
    pub id: String,
    pub hub_id: String,
    pub started_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub passed: Option<bool>,
    pub score: Option<u32>,
    pub total: u32,
}

impl From<QuizAttempt> for AttemptSummary {
    fn from(attempt: QuizAttempt) -> Self {
        AttemptSummary {
            id: attempt.id.map(|id| id.to_hex()).unwrap_or_default(),
            hub_id: attempt.hub_id.to_hex(),
            started_at: attempt.started_at,
            submitted_at: attempt.submitted_at,
            passed: attempt.passed,
            score: attempt.score,
            total: attempt.questions_shown.len() as u32,
        }
    }
}
