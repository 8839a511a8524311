use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

use super::{bson_datetime_as_chrono, bson_datetime_as_chrono_option};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    NotStarted,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::NotStarted => "not_started",
            TaskStatus::Completed => "completed",
        }
    }
}

/// One row per (user, task) in "task_progress".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskProgress {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub user_id: ObjectId,
    pub task_id: ObjectId,
    pub status: TaskStatus,
    #[serde(default, with = "bson_datetime_as_chrono_option")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(with = "bson_datetime_as_chrono")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HubState {
    Locked,
    Unlocked,
    Completed,
}

impl HubState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HubState::Locked => "locked",
            HubState::Unlocked => "unlocked",
            HubState::Completed => "completed",
        }
    }
}

/// One row per (user, hub) in "hub_user_states".
/// `completed_at` is set exactly when `state` is `Completed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubUserState {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub user_id: ObjectId,
    pub hub_id: ObjectId,
    pub state: HubState,
    #[serde(default, with = "bson_datetime_as_chrono_option")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(with = "bson_datetime_as_chrono")]
    pub updated_at: DateTime<Utc>,
}

/// Body of PUT /api/hubs/{id}/progress and PUT /api/tasks/{id}/progress
#[derive(Debug, Deserialize)]
pub struct ProgressRequest {
    pub done: bool,
}

#[derive(Debug, Serialize)]
pub struct ProgressResponse {
    pub success: bool,
}

#[derive(Debug, Serialize)]
pub struct TaskProgressEntry {
    pub task_id: String,
    pub status: TaskStatus,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct HubStateEntry {
    pub hub_id: String,
    pub state: HubState,
    pub completed_at: Option<DateTime<Utc>>,
}

/// GET /api/courses/{id}/progress
#[derive(Debug, Serialize)]
pub struct CourseProgressResponse {
    pub course_id: String,
    pub tasks: Vec<TaskProgressEntry>,
    pub hubs: Vec<HubStateEntry>,
    pub completed: bool,
}
