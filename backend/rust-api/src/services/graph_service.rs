use anyhow::Context;
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, to_bson, DateTime, Document};
use mongodb::{Client, ClientSession, Database};
use std::sync::Arc;
use validator::Validate;

use super::access_policy::CourseAccessPolicy;
use super::activity_notifier::ActivityNotifier;
use super::{cascade, db};
use crate::error::{is_duplicate_key, ApiError, ApiResult};
use crate::models::activity::{ActivityEvent, ActivityKind};
use crate::models::course::Course;
use crate::models::graph::{
    ContentPayload, CourseGraphResponse, CreateEdgeRequest, CreateHubRequest, CreateTaskRequest,
    EdgeResponse, Hub, HubEdge, HubResponse, Task, TaskResponse, UpdateEdgeRequest,
    UpdateHubRequest, UpdateTaskRequest, DEFAULT_HUB_COLOR, DEFAULT_HUB_RADIUS,
};
use crate::models::parse_object_id;
use crate::models::quiz::Quiz;
use crate::models::user::CurrentUser;

/// The first hub of a course becomes its start hub.
pub fn is_first_hub(existing_hubs: u64) -> bool {
    existing_hubs == 0
}

pub fn check_not_self_loop(from_hub_id: ObjectId, to_hub_id: ObjectId) -> ApiResult<()> {
    if from_hub_id == to_hub_id {
        return Err(ApiError::validation("An edge cannot connect a hub to itself"));
    }
    Ok(())
}

pub fn check_edge_endpoints(course_id: ObjectId, from: &Hub, to: &Hub) -> ApiResult<()> {
    if from.course_id != course_id || to.course_id != course_id {
        return Err(ApiError::validation(
            "Both hubs must belong to the edge's course",
        ));
    }
    Ok(())
}

fn bson_value<T: serde::Serialize>(value: &T, what: &str) -> ApiResult<mongodb::bson::Bson> {
    Ok(to_bson(value).with_context(|| format!("Failed to encode {}", what))?)
}

/// Points `hub_id` at `quiz_id` and back, clearing any previous pairing on
/// either side so a quiz is attached to at most one hub.
pub async fn link_quiz_to_hub(
    mongo: &Database,
    session: &mut ClientSession,
    quiz_id: ObjectId,
    hub_id: ObjectId,
) -> mongodb::error::Result<()> {
    let quizzes = mongo.collection::<Document>(db::QUIZZES);
    let hubs = mongo.collection::<Document>(db::HUBS);
    let now = DateTime::now();

    quizzes
        .update_many(
            doc! { "hub_id": hub_id, "_id": { "$ne": quiz_id } },
            doc! { "$set": { "hub_id": null, "updated_at": now } },
        )
        .session(&mut *session)
        .await?;
    hubs.update_many(
        doc! { "quiz_id": quiz_id, "_id": { "$ne": hub_id } },
        doc! { "$set": { "quiz_id": null, "updated_at": now } },
    )
    .session(&mut *session)
    .await?;
    quizzes
        .update_one(
            doc! { "_id": quiz_id },
            doc! { "$set": { "hub_id": hub_id, "updated_at": now } },
        )
        .session(&mut *session)
        .await?;
    hubs.update_one(
        doc! { "_id": hub_id },
        doc! { "$set": { "quiz_id": quiz_id, "updated_at": now } },
    )
    .session(&mut *session)
    .await?;
    Ok(())
}

async fn unlink_quiz_from_hub(
    mongo: &Database,
    session: &mut ClientSession,
    hub_id: ObjectId,
) -> mongodb::error::Result<()> {
    let now = DateTime::now();
    mongo
        .collection::<Document>(db::QUIZZES)
        .update_many(
            doc! { "hub_id": hub_id },
            doc! { "$set": { "hub_id": null, "updated_at": now } },
        )
        .session(&mut *session)
        .await?;
    mongo
        .collection::<Document>(db::HUBS)
        .update_one(
            doc! { "_id": hub_id },
            doc! { "$set": { "quiz_id": null, "updated_at": now } },
        )
        .session(&mut *session)
        .await?;
    Ok(())
}

pub struct GraphService {
    client: Client,
    mongo: Database,
    policy: CourseAccessPolicy,
    notifier: Arc<dyn ActivityNotifier>,
}

impl GraphService {
    pub fn new(client: Client, mongo: Database, notifier: Arc<dyn ActivityNotifier>) -> Self {
        let policy = CourseAccessPolicy::new(mongo.clone());
        Self {
            client,
            mongo,
            policy,
            notifier,
        }
    }

    pub async fn find_hub(&self, hub_id: ObjectId) -> ApiResult<Hub> {
        self.mongo
            .collection::<Hub>(db::HUBS)
            .find_one(doc! { "_id": hub_id })
            .await?
            .ok_or_else(|| ApiError::not_found("Hub not found"))
    }

    /// A task together with the hub that scopes it to a course.
    pub async fn find_task(&self, task_id: ObjectId) -> ApiResult<(Task, Hub)> {
        let task = self
            .mongo
            .collection::<Task>(db::TASKS)
            .find_one(doc! { "_id": task_id })
            .await?
            .ok_or_else(|| ApiError::not_found("Task not found"))?;
        let hub = self.find_hub(task.hub_id).await?;
        Ok((task, hub))
    }

    /// Hubs, tasks and edges of a course, each in id order.
    pub async fn course_graph(
        &self,
        user: &CurrentUser,
        course_id: ObjectId,
    ) -> ApiResult<CourseGraphResponse> {
        self.policy.require_view(user, course_id).await?;

        let hubs: Vec<Hub> = self
            .mongo
            .collection::<Hub>(db::HUBS)
            .find(doc! { "course_id": course_id })
            .sort(doc! { "_id": 1 })
            .await?
            .try_collect()
            .await?;
        let hub_ids: Vec<ObjectId> = hubs.iter().filter_map(|hub| hub.id).collect();

        let tasks: Vec<Task> = self
            .mongo
            .collection::<Task>(db::TASKS)
            .find(doc! { "hub_id": { "$in": hub_ids } })
            .sort(doc! { "_id": 1 })
            .await?
            .try_collect()
            .await?;
        let edges: Vec<HubEdge> = self
            .mongo
            .collection::<HubEdge>(db::HUB_EDGES)
            .find(doc! { "course_id": course_id })
            .sort(doc! { "_id": 1 })
            .await?
            .try_collect()
            .await?;

        Ok(CourseGraphResponse {
            hubs: hubs.into_iter().map(HubResponse::from).collect(),
            tasks: tasks.into_iter().map(TaskResponse::from).collect(),
            edges: edges.into_iter().map(EdgeResponse::from).collect(),
        })
    }

    pub async fn get_hub(&self, user: &CurrentUser, hub_id: ObjectId) -> ApiResult<HubResponse> {
        let hub = self.find_hub(hub_id).await?;
        self.policy.require_view(user, hub.course_id).await?;
        Ok(hub.into())
    }

    pub async fn create_hub(
        &self,
        user: &CurrentUser,
        req: CreateHubRequest,
    ) -> ApiResult<HubResponse> {
        req.validate()?;
        let course_id = parse_object_id(&req.course_id, "course_id")?;
        let course = self.policy.require_edit(user, course_id).await?;

        let now = Utc::now();
        let mut hub = Hub {
            id: None,
            course_id,
            title: req.title.trim().to_string(),
            x: req.x,
            y: req.y,
            color: req.color.unwrap_or_else(|| DEFAULT_HUB_COLOR.to_string()),
            radius: req.radius.unwrap_or(DEFAULT_HUB_RADIUS),
            is_start: false,
            content: req.content.unwrap_or_default(),
            quiz_id: None,
            is_required: req.is_required,
            created_at: now,
            updated_at: now,
        };

        let hubs = self.mongo.collection::<Hub>(db::HUBS);
        let existing = hubs.count_documents(doc! { "course_id": course_id }).await?;
        hub.is_start = is_first_hub(existing);
        let inserted = match hubs.insert_one(&hub).await {
            Ok(inserted) => inserted,
            // A concurrent create already took the start slot (unique partial index)
            Err(e) if hub.is_start && is_duplicate_key(&e) => {
                tracing::debug!(course_id = %course_id, "Start hub already exists, inserting as regular hub");
                hub.is_start = false;
                hubs.insert_one(&hub).await?
            }
            Err(e) => return Err(e.into()),
        };

        hub.id = inserted.inserted_id.as_object_id();
        tracing::info!(
            hub_id = ?hub.id,
            course_id = %course_id,
            is_start = hub.is_start,
            "Hub created"
        );
        self.notifier.notify(ActivityEvent::new(
            ActivityKind::HubCreated,
            &user.name,
            &hub.title,
            &course.title,
        ));

        Ok(hub.into())
    }

    pub async fn update_hub(
        &self,
        user: &CurrentUser,
        hub_id: ObjectId,
        req: UpdateHubRequest,
    ) -> ApiResult<HubResponse> {
        req.validate()?;
        let hub = self.find_hub(hub_id).await?;
        self.policy.require_edit(user, hub.course_id).await?;

        let mut set = doc! { "updated_at": DateTime::now() };
        if let Some(title) = &req.title {
            set.insert("title", title.trim());
        }
        if let Some(x) = req.x {
            set.insert("x", x);
        }
        if let Some(y) = req.y {
            set.insert("y", y);
        }
        if let Some(color) = &req.color {
            set.insert("color", color.as_str());
        }
        if let Some(radius) = req.radius {
            set.insert("radius", radius);
        }
        if let Some(is_required) = req.is_required {
            set.insert("is_required", is_required);
        }
        if let Some(is_start) = req.is_start {
            set.insert("is_start", is_start);
        }

        let hubs = self.mongo.collection::<Hub>(db::HUBS);
        let mut session = db::begin(&self.client).await?;

        if req.is_start == Some(true) {
            // At most one start hub per course
            hubs.update_many(
                doc! { "course_id": hub.course_id, "_id": { "$ne": hub_id } },
                doc! { "$set": { "is_start": false } },
            )
            .session(&mut session)
            .await?;
        }
        hubs.update_one(doc! { "_id": hub_id }, doc! { "$set": set })
            .session(&mut session)
            .await?;

        match &req.quiz_id {
            Some(Some(raw)) => {
                let quiz_id = parse_object_id(raw, "quiz_id")?;
                let quiz = self
                    .mongo
                    .collection::<Quiz>(db::QUIZZES)
                    .find_one(doc! { "_id": quiz_id })
                    .session(&mut session)
                    .await?
                    .ok_or_else(|| ApiError::not_found("Quiz not found"))?;
                if quiz.course_id != hub.course_id {
                    return Err(ApiError::validation(
                        "Quiz must belong to the same course as the hub",
                    ));
                }
                link_quiz_to_hub(&self.mongo, &mut session, quiz_id, hub_id).await?;
            }
            Some(None) => unlink_quiz_from_hub(&self.mongo, &mut session, hub_id).await?,
            None => {}
        }

        let updated = hubs
            .find_one(doc! { "_id": hub_id })
            .session(&mut session)
            .await?
            .ok_or_else(|| ApiError::not_found("Hub not found"))?;
        session.commit_transaction().await?;

        if req.is_start == Some(true) {
            tracing::info!(hub_id = %hub_id, course_id = %hub.course_id, "Start hub changed");
        }
        Ok(updated.into())
    }

    /// Start status is not handed to another hub when the start hub goes away.
    pub async fn delete_hub(&self, user: &CurrentUser, hub_id: ObjectId) -> ApiResult<()> {
        let hub = self.find_hub(hub_id).await?;
        self.policy.require_edit(user, hub.course_id).await?;

        let mut session = db::begin(&self.client).await?;
        cascade::delete_hubs(&self.mongo, &mut session, &[hub_id]).await?;
        session.commit_transaction().await?;

        if hub.is_start {
            tracing::warn!(
                hub_id = %hub_id,
                course_id = %hub.course_id,
                "Start hub deleted; course has no start hub until one is set"
            );
        } else {
            tracing::info!(hub_id = %hub_id, "Hub deleted");
        }
        Ok(())
    }

    pub async fn hub_content(
        &self,
        user: &CurrentUser,
        hub_id: ObjectId,
    ) -> ApiResult<ContentPayload> {
        let hub = self.find_hub(hub_id).await?;
        self.policy.require_view(user, hub.course_id).await?;
        Ok(hub.content)
    }

    /// Replaces the whole payload.
    pub async fn set_hub_content(
        &self,
        user: &CurrentUser,
        hub_id: ObjectId,
        content: ContentPayload,
    ) -> ApiResult<ContentPayload> {
        content.validate()?;
        let hub = self.find_hub(hub_id).await?;
        self.policy.require_edit(user, hub.course_id).await?;

        self.mongo
            .collection::<Hub>(db::HUBS)
            .update_one(
                doc! { "_id": hub_id },
                doc! { "$set": {
                    "content": bson_value(&content, "hub content")?,
                    "updated_at": DateTime::now(),
                } },
            )
            .await?;
        Ok(content)
    }

    pub async fn get_task(&self, user: &CurrentUser, task_id: ObjectId) -> ApiResult<TaskResponse> {
        let (task, hub) = self.find_task(task_id).await?;
        self.policy.require_view(user, hub.course_id).await?;
        Ok(task.into())
    }

    pub async fn create_task(
        &self,
        user: &CurrentUser,
        req: CreateTaskRequest,
    ) -> ApiResult<TaskResponse> {
        req.validate()?;
        let hub_id = parse_object_id(&req.hub_id, "hub_id")?;
        let hub = self.find_hub(hub_id).await?;
        self.policy.require_edit(user, hub.course_id).await?;

        let now = Utc::now();
        let mut task = Task {
            id: None,
            hub_id,
            title: req.title.trim().to_string(),
            kind: req.kind,
            x: req.x,
            y: req.y,
            content: req.content.unwrap_or_default(),
            is_required: req.is_required,
            created_at: now,
            updated_at: now,
        };
        let inserted = self
            .mongo
            .collection::<Task>(db::TASKS)
            .insert_one(&task)
            .await?;
        task.id = inserted.inserted_id.as_object_id();

        tracing::info!(task_id = ?task.id, hub_id = %hub_id, "Task created");
        Ok(task.into())
    }

    pub async fn update_task(
        &self,
        user: &CurrentUser,
        task_id: ObjectId,
        req: UpdateTaskRequest,
    ) -> ApiResult<TaskResponse> {
        req.validate()?;
        let (_, hub) = self.find_task(task_id).await?;
        self.policy.require_edit(user, hub.course_id).await?;

        let mut set = doc! { "updated_at": DateTime::now() };
        if let Some(title) = &req.title {
            set.insert("title", title.trim());
        }
        if let Some(kind) = &req.kind {
            set.insert("kind", bson_value(kind, "task kind")?);
        }
        if let Some(x) = req.x {
            set.insert("x", x);
        }
        if let Some(y) = req.y {
            set.insert("y", y);
        }
        if let Some(is_required) = req.is_required {
            set.insert("is_required", is_required);
        }

        let tasks = self.mongo.collection::<Task>(db::TASKS);
        tasks
            .update_one(doc! { "_id": task_id }, doc! { "$set": set })
            .await?;
        tasks
            .find_one(doc! { "_id": task_id })
            .await?
            .map(TaskResponse::from)
            .ok_or_else(|| ApiError::not_found("Task not found"))
    }

    pub async fn delete_task(&self, user: &CurrentUser, task_id: ObjectId) -> ApiResult<()> {
        let (_, hub) = self.find_task(task_id).await?;
        self.policy.require_edit(user, hub.course_id).await?;

        let mut session = db::begin(&self.client).await?;
        cascade::delete_tasks(&self.mongo, &mut session, &[task_id]).await?;
        session.commit_transaction().await?;

        tracing::info!(task_id = %task_id, "Task deleted");
        Ok(())
    }

    pub async fn task_content(
        &self,
        user: &CurrentUser,
        task_id: ObjectId,
    ) -> ApiResult<ContentPayload> {
        let (task, hub) = self.find_task(task_id).await?;
        self.policy.require_view(user, hub.course_id).await?;
        Ok(task.content)
    }

    pub async fn set_task_content(
        &self,
        user: &CurrentUser,
        task_id: ObjectId,
        content: ContentPayload,
    ) -> ApiResult<ContentPayload> {
        content.validate()?;
        let (_, hub) = self.find_task(task_id).await?;
        self.policy.require_edit(user, hub.course_id).await?;

        self.mongo
            .collection::<Task>(db::TASKS)
            .update_one(
                doc! { "_id": task_id },
                doc! { "$set": {
                    "content": bson_value(&content, "task content")?,
                    "updated_at": DateTime::now(),
                } },
            )
            .await?;
        Ok(content)
    }

    /// Creating an edge that already exists between the same ordered pair
    /// updates its rule instead of adding a second edge.
    pub async fn create_edge(
        &self,
        user: &CurrentUser,
        req: CreateEdgeRequest,
    ) -> ApiResult<EdgeResponse> {
        let course_id = parse_object_id(&req.course_id, "course_id")?;
        let from_hub_id = parse_object_id(&req.from_hub_id, "from_hub_id")?;
        let to_hub_id = parse_object_id(&req.to_hub_id, "to_hub_id")?;
        check_not_self_loop(from_hub_id, to_hub_id)?;
        self.policy.require_edit(user, course_id).await?;

        let hubs = self.mongo.collection::<Hub>(db::HUBS);
        let edges = self.mongo.collection::<HubEdge>(db::HUB_EDGES);
        let mut session = db::begin(&self.client).await?;

        let from = hubs
            .find_one(doc! { "_id": from_hub_id })
            .session(&mut session)
            .await?
            .ok_or_else(|| ApiError::not_found("Source hub not found"))?;
        let to = hubs
            .find_one(doc! { "_id": to_hub_id })
            .session(&mut session)
            .await?
            .ok_or_else(|| ApiError::not_found("Target hub not found"))?;
        check_edge_endpoints(course_id, &from, &to)?;

        let now = DateTime::now();
        edges
            .update_one(
                doc! { "from_hub_id": from_hub_id, "to_hub_id": to_hub_id },
                doc! {
                    "$set": {
                        "course_id": course_id,
                        "rule": bson_value(&req.rule, "edge rule")?,
                        "rule_value": bson_value(&req.rule_value, "edge rule value")?,
                        "updated_at": now,
                    },
                    "$setOnInsert": { "created_at": now },
                },
            )
            .upsert(true)
            .session(&mut session)
            .await?;
        let edge = edges
            .find_one(doc! { "from_hub_id": from_hub_id, "to_hub_id": to_hub_id })
            .session(&mut session)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Edge vanished after upsert"))?;
        session.commit_transaction().await?;

        tracing::info!(
            edge_id = ?edge.id,
            from_hub_id = %from_hub_id,
            to_hub_id = %to_hub_id,
            "Edge saved"
        );
        Ok(edge.into())
    }

    async fn find_edge(&self, edge_id: ObjectId) -> ApiResult<HubEdge> {
        self.mongo
            .collection::<HubEdge>(db::HUB_EDGES)
            .find_one(doc! { "_id": edge_id })
            .await?
            .ok_or_else(|| ApiError::not_found("Edge not found"))
    }

    pub async fn update_edge(
        &self,
        user: &CurrentUser,
        edge_id: ObjectId,
        req: UpdateEdgeRequest,
    ) -> ApiResult<EdgeResponse> {
        let edge = self.find_edge(edge_id).await?;
        self.policy.require_edit(user, edge.course_id).await?;

        let mut set = doc! { "updated_at": DateTime::now() };
        if let Some(rule) = &req.rule {
            set.insert("rule", bson_value(rule, "edge rule")?);
        }
        if let Some(rule_value) = &req.rule_value {
            set.insert("rule_value", bson_value(rule_value, "edge rule value")?);
        }

        let edges = self.mongo.collection::<HubEdge>(db::HUB_EDGES);
        edges
            .update_one(doc! { "_id": edge_id }, doc! { "$set": set })
            .await?;
        edges
            .find_one(doc! { "_id": edge_id })
            .await?
            .map(EdgeResponse::from)
            .ok_or_else(|| ApiError::not_found("Edge not found"))
    }

    pub async fn delete_edge(&self, user: &CurrentUser, edge_id: ObjectId) -> ApiResult<()> {
        let edge = self.find_edge(edge_id).await?;
        self.policy.require_edit(user, edge.course_id).await?;
        self.mongo
            .collection::<HubEdge>(db::HUB_EDGES)
            .delete_one(doc! { "_id": edge_id })
            .await?;
        tracing::info!(edge_id = %edge_id, "Edge deleted");
        Ok(())
    }

    pub async fn course_of_hub(&self, hub: &Hub) -> ApiResult<Course> {
        self.policy
            .find_course(hub.course_id)
            .await?
            .ok_or_else(|| ApiError::not_found("Course not found"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hub_in(course_id: ObjectId) -> Hub {
        let now = Utc::now();
        Hub {
            id: Some(ObjectId::new()),
            course_id,
            title: "Hub".to_string(),
            x: 0.0,
            y: 0.0,
            color: DEFAULT_HUB_COLOR.to_string(),
            radius: DEFAULT_HUB_RADIUS,
            is_start: false,
            content: ContentPayload::default(),
            quiz_id: None,
            is_required: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_only_first_hub_becomes_start() {
        assert!(is_first_hub(0));
        assert!(!is_first_hub(1));
        assert!(!is_first_hub(42));
    }

    #[test]
    fn test_self_loop_is_rejected() {
        let hub = ObjectId::new();
        let err = check_not_self_loop(hub, hub).unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
        assert!(check_not_self_loop(hub, ObjectId::new()).is_ok());
    }

    #[test]
    fn test_edge_endpoints_must_share_the_course() {
        let course = ObjectId::new();
        let other = ObjectId::new();

        assert!(check_edge_endpoints(course, &hub_in(course), &hub_in(course)).is_ok());
        assert!(check_edge_endpoints(course, &hub_in(course), &hub_in(other)).is_err());
        assert!(check_edge_endpoints(course, &hub_in(other), &hub_in(course)).is_err());
        assert!(check_edge_endpoints(other, &hub_in(course), &hub_in(course)).is_err());
    }
}
