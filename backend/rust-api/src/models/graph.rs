use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use mongodb::bson::oid::ObjectId;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::{Validate, ValidationError};

use super::{bson_datetime_as_chrono, deserialize_some};

pub const DEFAULT_HUB_COLOR: &str = "#4f46e5";
pub const DEFAULT_HUB_RADIUS: f64 = 40.0;

lazy_static! {
    static ref HEX_COLOR: Regex = Regex::new(r"^#[0-9a-fA-F]{6}$").unwrap();
}

/// Node of a course's progression graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hub {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub course_id: ObjectId,
    pub title: String,
    pub x: f64,
    pub y: f64,
    pub color: String,
    pub radius: f64,
    #[serde(default)]
    pub is_start: bool,
    #[serde(default)]
    pub content: ContentPayload,
    #[serde(default)]
    pub quiz_id: Option<ObjectId>,
    #[serde(default)]
    pub is_required: bool,
    #[serde(with = "bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "bson_datetime_as_chrono")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    #[default]
    Content,
    Quiz,
    Assignment,
    Reflection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub hub_id: ObjectId,
    pub title: String,
    #[serde(default)]
    pub kind: TaskKind,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub content: ContentPayload,
    #[serde(default)]
    pub is_required: bool,
    #[serde(with = "bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "bson_datetime_as_chrono")]
    pub updated_at: DateTime<Utc>,
}

/// Condition under which an edge unlocks its target hub.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EdgeRule {
    #[default]
    AllTasksComplete,
}

/// Directed unlock dependency: completing `from_hub_id` unlocks `to_hub_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubEdge {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub course_id: ObjectId,
    pub from_hub_id: ObjectId,
    pub to_hub_id: ObjectId,
    #[serde(default)]
    pub rule: EdgeRule,
    #[serde(default)]
    pub rule_value: Value,
    #[serde(with = "bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "bson_datetime_as_chrono")]
    pub updated_at: DateTime<Utc>,
}

/// Rich content attached to a hub or task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct ContentPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(default)]
    #[validate(custom(function = "validate_urls"))]
    pub youtube_urls: Vec<String>,
    #[serde(default)]
    #[validate(custom(function = "validate_urls"))]
    pub image_urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub quiz: Option<InlineQuiz>,
    /// Keys this server does not interpret; stored and returned as sent.
    #[serde(default, flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Self-check quiz embedded in content; not graded by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_inline_quiz"))]
pub struct InlineQuiz {
    #[serde(default)]
    pub questions: Vec<InlineQuestion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineQuestion {
    pub text: String,
    pub options: Vec<String>,
    #[serde(default)]
    pub correct: Vec<u32>,
}

fn validate_urls(urls: &[String]) -> Result<(), ValidationError> {
    if urls
        .iter()
        .all(|url| url.starts_with("https://") || url.starts_with("http://"))
    {
        Ok(())
    } else {
        Err(ValidationError::new("url").with_message("URLs must be http(s)".into()))
    }
}

fn validate_inline_quiz(quiz: &InlineQuiz) -> Result<(), ValidationError> {
    for question in &quiz.questions {
        if question.text.trim().is_empty() || question.options.is_empty() {
            return Err(ValidationError::new("inline_quiz")
                .with_message("Inline quiz questions need text and options".into()));
        }
        if question
            .correct
            .iter()
            .any(|index| *index as usize >= question.options.len())
        {
            return Err(ValidationError::new("inline_quiz")
                .with_message("Correct option index out of range".into()));
        }
    }
    Ok(())
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateHubRequest {
    pub course_id: String,
    #[validate(length(min = 1, max = 200, message = "Title must be 1-200 characters"))]
    pub title: String,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[validate(regex(path = *HEX_COLOR, message = "Color must be #rrggbb"))]
    pub color: Option<String>,
    #[validate(range(exclusive_min = 0.0, message = "Radius must be positive"))]
    pub radius: Option<f64>,
    #[serde(default = "default_true")]
    pub is_required: bool,
    #[validate(nested)]
    pub content: Option<ContentPayload>,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateHubRequest {
    #[validate(length(min = 1, max = 200, message = "Title must be 1-200 characters"))]
    pub title: Option<String>,
    pub x: Option<f64>,
    pub y: Option<f64>,
    #[validate(regex(path = *HEX_COLOR, message = "Color must be #rrggbb"))]
    pub color: Option<String>,
    #[validate(range(exclusive_min = 0.0, message = "Radius must be positive"))]
    pub radius: Option<f64>,
    pub is_required: Option<bool>,
    pub is_start: Option<bool>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub quiz_id: Option<Option<String>>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateTaskRequest {
    pub hub_id: String,
    #[validate(length(min = 1, max = 200, message = "Title must be 1-200 characters"))]
    pub title: String,
    #[serde(default)]
    pub kind: TaskKind,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default = "default_true")]
    pub is_required: bool,
    #[validate(nested)]
    pub content: Option<ContentPayload>,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateTaskRequest {
    #[validate(length(min = 1, max = 200, message = "Title must be 1-200 characters"))]
    pub title: Option<String>,
    pub kind: Option<TaskKind>,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub is_required: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct CreateEdgeRequest {
    pub course_id: String,
    pub from_hub_id: String,
    pub to_hub_id: String,
    #[serde(default)]
    pub rule: EdgeRule,
    #[serde(default)]
    pub rule_value: Value,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateEdgeRequest {
    pub rule: Option<EdgeRule>,
    pub rule_value: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct HubResponse {
    pub id: String,
    pub course_id: String,
    pub title: String,
    pub x: f64,
    pub y: f64,
    pub color: String,
    pub radius: f64,
    pub is_start: bool,
    pub is_required: bool,
    pub quiz_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Hub> for HubResponse {
    fn from(hub: Hub) -> Self {
        HubResponse {
            id: hub.id.map(|id| id.to_hex()).unwrap_or_default(),
            course_id: hub.course_id.to_hex(),
            title: hub.title,
            x: hub.x,
            y: hub.y,
            color: hub.color,
            radius: hub.radius,
            is_start: hub.is_start,
            is_required: hub.is_required,
            quiz_id: hub.quiz_id.map(|id| id.to_hex()),
            created_at: hub.created_at,
            updated_at: hub.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TaskResponse {
    pub id: String,
    pub hub_id: String,
    pub title: String,
    pub kind: TaskKind,
    pub x: f64,
    pub y: f64,
    pub is_required: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Task> for TaskResponse {
    fn from(task: Task) -> Self {
        TaskResponse {
            id: task.id.map(|id| id.to_hex()).unwrap_or_default(),
            hub_id: task.hub_id.to_hex(),
            title: task.title,
            kind: task.kind,
            x: task.x,
            y: task.y,
            is_required: task.is_required,
            created_at: task.created_at,
            updated_at: task.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EdgeResponse {
    pub id: String,
    pub course_id: String,
    pub from_hub_id: String,
    pub to_hub_id: String,
    pub rule: EdgeRule,
    pub rule_value: Value,
}

impl From<HubEdge> for EdgeResponse {
    fn from(edge: HubEdge) -> Self {
        EdgeResponse {
            id: edge.id.map(|id| id.to_hex()).unwrap_or_default(),
            course_id: edge.course_id.to_hex(),
            from_hub_id: edge.from_hub_id.to_hex(),
            to_hub_id: edge.to_hub_id.to_hex(),
            rule: edge.rule,
            rule_value: edge.rule_value,
        }
    }
}

/// GET /api/courses/{id}/graph
#[derive(Debug, Serialize)]
pub struct CourseGraphResponse {
    pub hubs: Vec<HubResponse>,
    pub tasks: Vec<TaskResponse>,
    pub edges: Vec<EdgeResponse>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_content_payload_keeps_wire_shape() {
        let raw = json!({
            "html": "<p>Intro</p>",
            "youtube_urls": ["https://youtu.be/abc"],
            "image_urls": [],
            "quiz": {
                "questions": [
                    { "text": "2 + 2?", "options": ["3", "4"], "correct": [1] }
                ]
            }
        });

        let payload: ContentPayload = serde_json::from_value(raw.clone()).unwrap();
        assert!(payload.validate().is_ok());
        assert_eq!(serde_json::to_value(&payload).unwrap(), raw);
    }

    #[test]
    fn test_content_payload_round_trips_unknown_keys() {
        let raw = json!({
            "html": "<p>x</p>",
            "youtube_urls": [],
            "image_urls": [],
            "pdf_urls": ["https://a/b.pdf"],
            "layout": "wide"
        });

        let payload: ContentPayload = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(payload.extra.get("layout"), Some(&json!("wide")));
        assert!(payload.validate().is_ok());
        assert_eq!(serde_json::to_value(&payload).unwrap(), raw);

        let stored = mongodb::bson::to_document(&payload).unwrap();
        let restored: ContentPayload = mongodb::bson::from_document(stored).unwrap();
        assert_eq!(restored, payload);
    }

    #[test]
    fn test_content_payload_defaults_missing_fields() {
        let payload: ContentPayload = serde_json::from_value(json!({})).unwrap();
        assert_eq!(payload, ContentPayload::default());
        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            json!({ "youtube_urls": [], "image_urls": [] })
        );
    }

    #[test]
    fn test_content_payload_rejects_bad_urls_and_indices() {
        let bad_url = ContentPayload {
            image_urls: vec!["javascript:alert(1)".to_string()],
            ..Default::default()
        };
        assert!(bad_url.validate().is_err());

        let bad_index = ContentPayload {
            quiz: Some(InlineQuiz {
                questions: vec![InlineQuestion {
                    text: "Pick one".to_string(),
                    options: vec!["a".to_string()],
                    correct: vec![3],
                }],
            }),
            ..Default::default()
        };
        assert!(bad_index.validate().is_err());
    }

    #[test]
    fn test_hub_color_must_be_hex() {
        let request = UpdateHubRequest {
            color: Some("blue".to_string()),
            ..Default::default()
        };
        assert!(request.validate().is_err());

        let request = UpdateHubRequest {
            color: Some("#A0b1C2".to_string()),
            radius: Some(12.5),
            ..Default::default()
        };
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_edge_rule_defaults_to_all_tasks_complete() {
        let request: CreateEdgeRequest = serde_json::from_value(json!({
            "course_id": "c",
            "from_hub_id": "a",
            "to_hub_id": "b"
        }))
        .unwrap();
        assert_eq!(request.rule, EdgeRule::AllTasksComplete);
        assert!(request.rule_value.is_null());
        assert_eq!(
            serde_json::to_value(EdgeRule::AllTasksComplete).unwrap(),
            json!("all_tasks_complete")
        );
    }
}
