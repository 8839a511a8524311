use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const ACTIVITY_EVENT_NAME: &str = "activity:new";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    TaskCompleted,
    HubCompleted,
    HubCreated,
    EnrollmentCreated,
    EnrollmentRemoved,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::TaskCompleted => "task_completed",
            ActivityKind::HubCompleted => "hub_completed",
            ActivityKind::HubCreated => "hub_created",
            ActivityKind::EnrollmentCreated => "enrollment_created",
            ActivityKind::EnrollmentRemoved => "enrollment_removed",
        }
    }
}

/// Payload of the `activity:new` event consumed by dashboards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    pub user_name: String,
    pub item_title: String,
    pub course_title: String,
    pub timestamp: DateTime<Utc>,
}

impl ActivityEvent {
    pub fn new(
        kind: ActivityKind,
        user_name: impl Into<String>,
        item_title: impl Into<String>,
        course_title: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            user_name: user_name.into(),
            item_title: item_title.into(),
            course_title: course_title.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn to_sse_data(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_shape() {
        let event = ActivityEvent::new(
            ActivityKind::HubCompleted,
            "Ada",
            "Loops",
            "Intro to Rust",
        );
        let value: serde_json::Value = serde_json::from_str(&event.to_sse_data()).unwrap();

        assert_eq!(value["type"], "hub_completed");
        assert_eq!(value["userName"], "Ada");
        assert_eq!(value["itemTitle"], "Loops");
        assert_eq!(value["courseTitle"], "Intro to Rust");
        assert!(value["timestamp"].is_string());
    }
}
