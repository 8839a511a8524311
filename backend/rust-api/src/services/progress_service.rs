use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::{Client, ClientSession, Database};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;

use super::access_policy::CourseAccessPolicy;
use super::activity_notifier::ActivityNotifier;
use super::certificate_service::CertificateService;
use super::db;
use crate::error::{ApiError, ApiResult};
use crate::metrics::HUB_COMPLETIONS_TOTAL;
use crate::models::activity::{ActivityEvent, ActivityKind};
use crate::models::graph::{Hub, Task};
use crate::models::progress::{
    CourseProgressResponse, HubState, HubStateEntry, HubUserState, TaskProgress,
    TaskProgressEntry, TaskStatus,
};
use crate::models::user::CurrentUser;

/// Tasks of a hub that the user has not completed, in the given order.
pub fn missing_tasks(task_ids: &[ObjectId], completed: &HashSet<ObjectId>) -> Vec<ObjectId> {
    task_ids
        .iter()
        .filter(|id| !completed.contains(id))
        .copied()
        .collect()
}

/// A course is complete once every required hub is completed.
/// A course without required hubs is complete.
pub fn course_completed(required_hubs: &[ObjectId], completed_hubs: &HashSet<ObjectId>) -> bool {
    required_hubs.iter().all(|id| completed_hubs.contains(id))
}

fn ids_of(rows: &[Document], field: &str) -> HashSet<ObjectId> {
    rows.iter()
        .filter_map(|row| row.get_object_id(field).ok())
        .collect()
}

/// Task ids among `task_ids` completed by the user, read inside `session`.
async fn completed_task_ids(
    mongo: &Database,
    session: &mut ClientSession,
    user_id: ObjectId,
    task_ids: &[ObjectId],
) -> mongodb::error::Result<HashSet<ObjectId>> {
    let mut cursor = mongo
        .collection::<Document>(db::TASK_PROGRESS)
        .find(doc! {
            "user_id": user_id,
            "task_id": { "$in": task_ids.to_vec() },
            "status": TaskStatus::Completed.as_str(),
        })
        .projection(doc! { "task_id": 1 })
        .session(&mut *session)
        .await?;
    let rows: Vec<Document> = cursor.stream(&mut *session).try_collect().await?;
    Ok(ids_of(&rows, "task_id"))
}

/// Task ids of a hub, optionally only the required ones, read inside `session`.
pub async fn hub_task_ids(
    mongo: &Database,
    session: &mut ClientSession,
    hub_id: ObjectId,
    required_only: bool,
) -> mongodb::error::Result<Vec<ObjectId>> {
    let mut filter = doc! { "hub_id": hub_id };
    if required_only {
        filter.insert("is_required", true);
    }
    let mut cursor = mongo
        .collection::<Document>(db::TASKS)
        .find(filter)
        .projection(doc! { "_id": 1 })
        .sort(doc! { "_id": 1 })
        .session(&mut *session)
        .await?;
    let rows: Vec<Document> = cursor.stream(&mut *session).try_collect().await?;
    Ok(rows
        .iter()
        .filter_map(|row| row.get_object_id("_id").ok())
        .collect())
}

/// Completed task ids for the user among a hub's tasks, plus the hub's task ids.
pub async fn hub_task_completion(
    mongo: &Database,
    session: &mut ClientSession,
    user_id: ObjectId,
    hub_id: ObjectId,
    required_only: bool,
) -> mongodb::error::Result<(Vec<ObjectId>, HashSet<ObjectId>)> {
    let task_ids = hub_task_ids(mongo, session, hub_id, required_only).await?;
    let completed = completed_task_ids(mongo, session, user_id, &task_ids).await?;
    Ok((task_ids, completed))
}

pub async fn mark_hub_completed(
    mongo: &Database,
    session: &mut ClientSession,
    user_id: ObjectId,
    hub_id: ObjectId,
) -> mongodb::error::Result<()> {
    let now = DateTime::now();
    mongo
        .collection::<HubUserState>(db::HUB_USER_STATES)
        .update_one(
            doc! { "user_id": user_id, "hub_id": hub_id },
            doc! { "$set": {
                "state": HubState::Completed.as_str(),
                "completed_at": now,
                "updated_at": now,
            } },
        )
        .upsert(true)
        .session(&mut *session)
        .await?;
    Ok(())
}

/// One-hop unlock: every direct successor of `hub_id` gets an `unlocked`
/// row for the user unless a row already exists. Successors further down
/// the graph are not touched. Returns the hubs that were newly unlocked.
pub async fn unlock_successors(
    mongo: &Database,
    session: &mut ClientSession,
    user_id: ObjectId,
    hub_id: ObjectId,
) -> mongodb::error::Result<Vec<ObjectId>> {
    let mut cursor = mongo
        .collection::<Document>(db::HUB_EDGES)
        .find(doc! { "from_hub_id": hub_id })
        .projection(doc! { "to_hub_id": 1 })
        .sort(doc! { "_id": 1 })
        .session(&mut *session)
        .await?;
    let edges: Vec<Document> = cursor.stream(&mut *session).try_collect().await?;

    let states = mongo.collection::<HubUserState>(db::HUB_USER_STATES);
    let now = DateTime::now();
    let mut unlocked = Vec::new();
    for to_hub_id in edges
        .iter()
        .filter_map(|edge| edge.get_object_id("to_hub_id").ok())
    {
        let result = states
            .update_one(
                doc! { "user_id": user_id, "hub_id": to_hub_id },
                doc! { "$setOnInsert": {
                    "state": HubState::Unlocked.as_str(),
                    "completed_at": null,
                    "updated_at": now,
                } },
            )
            .upsert(true)
            .session(&mut *session)
            .await?;
        if result.upserted_id.is_some() {
            unlocked.push(to_hub_id);
        }
    }
    Ok(unlocked)
}

/// Evaluates the course-completion predicate for a user from stored state.
pub async fn is_course_completed(
    mongo: &Database,
    user_id: ObjectId,
    course_id: ObjectId,
) -> mongodb::error::Result<bool> {
    let required: Vec<Document> = mongo
        .collection::<Document>(db::HUBS)
        .find(doc! { "course_id": course_id, "is_required": true })
        .projection(doc! { "_id": 1 })
        .await?
        .try_collect()
        .await?;
    let required: Vec<ObjectId> = ids_of(&required, "_id").into_iter().collect();
    if required.is_empty() {
        return Ok(true);
    }

    let completed: Vec<Document> = mongo
        .collection::<Document>(db::HUB_USER_STATES)
        .find(doc! {
            "user_id": user_id,
            "hub_id": { "$in": required.clone() },
            "state": HubState::Completed.as_str(),
        })
        .projection(doc! { "hub_id": 1 })
        .await?
        .try_collect()
        .await?;

    Ok(course_completed(&required, &ids_of(&completed, "hub_id")))
}

pub struct ProgressService {
    client: Client,
    mongo: Database,
    policy: CourseAccessPolicy,
    certificates: CertificateService,
    notifier: Arc<dyn ActivityNotifier>,
}

impl ProgressService {
    pub fn new(client: Client, mongo: Database, notifier: Arc<dyn ActivityNotifier>) -> Self {
        Self {
            policy: CourseAccessPolicy::new(mongo.clone()),
            certificates: CertificateService::new(mongo.clone()),
            client,
            mongo,
            notifier,
        }
    }

    async fn find_hub(&self, hub_id: ObjectId) -> ApiResult<Hub> {
        self.mongo
            .collection::<Hub>(db::HUBS)
            .find_one(doc! { "_id": hub_id })
            .await?
            .ok_or_else(|| ApiError::not_found("Hub not found"))
    }

    /// Unconditional toggle of one task for the caller.
    pub async fn set_task_progress(
        &self,
        user: &CurrentUser,
        task_id: ObjectId,
        done: bool,
    ) -> ApiResult<()> {
        let task = self
            .mongo
            .collection::<Task>(db::TASKS)
            .find_one(doc! { "_id": task_id })
            .await?
            .ok_or_else(|| ApiError::not_found("Task not found"))?;
        let hub = self.find_hub(task.hub_id).await?;
        let course = self.policy.require_view(user, hub.course_id).await?;

        let now = DateTime::now();
        let (status, completed_at) = if done {
            (TaskStatus::Completed, Some(now))
        } else {
            (TaskStatus::NotStarted, None)
        };
        self.mongo
            .collection::<TaskProgress>(db::TASK_PROGRESS)
            .update_one(
                doc! { "user_id": user.id, "task_id": task_id },
                doc! { "$set": {
                    "status": status.as_str(),
                    "completed_at": completed_at,
                    "updated_at": now,
                } },
            )
            .upsert(true)
            .await?;

        tracing::info!(
            user_id = %user.id,
            task_id = %task_id,
            status = status.as_str(),
            "Task progress updated"
        );
        if done {
            self.notifier.notify(ActivityEvent::new(
                ActivityKind::TaskCompleted,
                &user.name,
                &task.title,
                &course.title,
            ));
        }
        Ok(())
    }

    /// Completing a hub requires every task under it to be completed by the
    /// caller. Undoing a completion has no precondition.
    pub async fn set_hub_progress(
        &self,
        user: &CurrentUser,
        hub_id: ObjectId,
        done: bool,
    ) -> ApiResult<()> {
        let hub = self.find_hub(hub_id).await?;
        let course = self.policy.require_view(user, hub.course_id).await?;

        let mut session = db::begin(&self.client).await?;
        if done {
            let (task_ids, completed) =
                hub_task_completion(&self.mongo, &mut session, user.id, hub_id, false).await?;
            let missing = missing_tasks(&task_ids, &completed);
            if !missing.is_empty() {
                tracing::warn!(
                    user_id = %user.id,
                    hub_id = %hub_id,
                    missing = missing.len(),
                    "Hub completion rejected: tasks incomplete"
                );
                return Err(ApiError::precondition(
                    "Not all tasks in this hub are completed",
                    json!({
                        "total_tasks": task_ids.len(),
                        "completed_tasks": task_ids.len() - missing.len(),
                        "missing_task_ids": missing.iter().map(|id| id.to_hex()).collect::<Vec<_>>(),
                    }),
                ));
            }
            mark_hub_completed(&self.mongo, &mut session, user.id, hub_id).await?;
        } else {
            self.mongo
                .collection::<HubUserState>(db::HUB_USER_STATES)
                .update_one(
                    doc! { "user_id": user.id, "hub_id": hub_id },
                    doc! { "$set": {
                        "state": HubState::Unlocked.as_str(),
                        "completed_at": null,
                        "updated_at": DateTime::now(),
                    } },
                )
                .upsert(true)
                .session(&mut session)
                .await?;
        }
        session.commit_transaction().await?;

        if !done {
            tracing::info!(user_id = %user.id, hub_id = %hub_id, "Hub completion undone");
            return Ok(());
        }

        HUB_COMPLETIONS_TOTAL.with_label_values(&["manual"]).inc();
        tracing::info!(user_id = %user.id, hub_id = %hub_id, "Hub completed");

        if let Err(e) = self.certificates.issue_if_earned(user.id, hub.course_id).await {
            tracing::error!(
                user_id = %user.id,
                course_id = %hub.course_id,
                error = %e,
                "Certificate check after hub completion failed"
            );
        }
        self.notifier.notify(ActivityEvent::new(
            ActivityKind::HubCompleted,
            &user.name,
            &hub.title,
            &course.title,
        ));
        Ok(())
    }

    /// The caller's own task and hub state for a course.
    pub async fn course_progress(
        &self,
        user: &CurrentUser,
        course_id: ObjectId,
    ) -> ApiResult<CourseProgressResponse> {
        self.policy.require_view(user, course_id).await?;

        let hub_rows: Vec<Document> = self
            .mongo
            .collection::<Document>(db::HUBS)
            .find(doc! { "course_id": course_id })
            .projection(doc! { "_id": 1 })
            .await?
            .try_collect()
            .await?;
        let hub_ids: Vec<ObjectId> = ids_of(&hub_rows, "_id").into_iter().collect();

        let task_rows: Vec<Document> = self
            .mongo
            .collection::<Document>(db::TASKS)
            .find(doc! { "hub_id": { "$in": hub_ids.clone() } })
            .projection(doc! { "_id": 1 })
            .await?
            .try_collect()
            .await?;
        let task_ids: Vec<ObjectId> = ids_of(&task_rows, "_id").into_iter().collect();

        let tasks: Vec<TaskProgress> = self
            .mongo
            .collection::<TaskProgress>(db::TASK_PROGRESS)
            .find(doc! { "user_id": user.id, "task_id": { "$in": task_ids } })
            .sort(doc! { "task_id": 1 })
            .await?
            .try_collect()
            .await?;
        let hubs: Vec<HubUserState> = self
            .mongo
            .collection::<HubUserState>(db::HUB_USER_STATES)
            .find(doc! { "user_id": user.id, "hub_id": { "$in": hub_ids } })
            .sort(doc! { "hub_id": 1 })
            .await?
            .try_collect()
            .await?;

        let completed = is_course_completed(&self.mongo, user.id, course_id).await?;

        Ok(CourseProgressResponse {
            course_id: course_id.to_hex(),
            tasks: tasks
                .into_iter()
                .map(|row| TaskProgressEntry {
                    task_id: row.task_id.to_hex(),
                    status: row.status,
                    completed_at: row.completed_at,
                })
                .collect(),
            hubs: hubs
                .into_iter()
                .map(|row| HubStateEntry {
                    hub_id: row.hub_id.to_hex(),
                    state: row.state,
                    completed_at: row.completed_at,
                })
                .collect(),
            completed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hub_with_one_incomplete_task_reports_it() {
        let t1 = ObjectId::new();
        let t2 = ObjectId::new();
        let completed: HashSet<ObjectId> = [t1].into_iter().collect();

        assert_eq!(missing_tasks(&[t1, t2], &completed), vec![t2]);
    }

    #[test]
    fn test_hub_with_all_tasks_done_or_no_tasks_has_nothing_missing() {
        let t1 = ObjectId::new();
        let completed: HashSet<ObjectId> = [t1].into_iter().collect();

        assert!(missing_tasks(&[t1], &completed).is_empty());
        assert!(missing_tasks(&[], &HashSet::new()).is_empty());
    }

    #[test]
    fn test_course_completion_needs_every_required_hub() {
        let h1 = ObjectId::new();
        let h2 = ObjectId::new();

        let only_h1: HashSet<ObjectId> = [h1].into_iter().collect();
        assert!(!course_completed(&[h1, h2], &only_h1));

        let both: HashSet<ObjectId> = [h1, h2].into_iter().collect();
        assert!(course_completed(&[h1, h2], &both));
    }

    #[test]
    fn test_course_without_required_hubs_is_complete() {
        assert!(course_completed(&[], &HashSet::new()));
    }
}
