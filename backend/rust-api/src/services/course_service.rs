use chrono::Utc;
use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::{Client, Database};
use std::collections::HashMap;
use std::sync::Arc;

use super::access_policy::CourseAccessPolicy;
use super::activity_notifier::ActivityNotifier;
use super::user_service::UserService;
use super::{cascade, db};
use crate::error::{is_duplicate_key, ApiError, ApiResult};
use crate::models::activity::{ActivityEvent, ActivityKind};
use crate::models::course::{
    AssignTeacherRequest, Course, CourseEnrollment, CourseMemberResponse, CourseResponse,
    CourseTeacher, CreateCourseRequest, UpdateCourseRequest,
};
use crate::models::user::{CurrentUser, User, UserRole};

pub struct CourseService {
    client: Client,
    mongo: Database,
    policy: CourseAccessPolicy,
    notifier: Arc<dyn ActivityNotifier>,
}

impl CourseService {
    pub fn new(client: Client, mongo: Database, notifier: Arc<dyn ActivityNotifier>) -> Self {
        let policy = CourseAccessPolicy::new(mongo.clone());
        Self {
            client,
            mongo,
            policy,
            notifier,
        }
    }

    async fn linked_course_ids(
        &self,
        collection: &str,
        user_id: ObjectId,
    ) -> ApiResult<Vec<ObjectId>> {
        let rows: Vec<Document> = self
            .mongo
            .collection::<Document>(collection)
            .find(doc! { "user_id": user_id })
            .projection(doc! { "course_id": 1 })
            .await?
            .try_collect()
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get_object_id("course_id").ok())
            .collect())
    }

    /// Courses the caller can view, in creation order.
    pub async fn list(&self, user: &CurrentUser) -> ApiResult<Vec<CourseResponse>> {
        let filter = match user.role {
            Some(UserRole::Admin) => Document::new(),
            Some(UserRole::Teacher) => {
                let assigned = self.linked_course_ids(db::COURSE_TEACHERS, user.id).await?;
                doc! { "$or": [
                    { "created_by": user.id },
                    { "_id": { "$in": assigned } },
                ] }
            }
            Some(UserRole::Student) => {
                let enrolled = self.linked_course_ids(db::COURSE_ENROLLMENTS, user.id).await?;
                doc! { "_id": { "$in": enrolled }, "is_locked": false }
            }
            None => return Ok(Vec::new()),
        };

        let courses: Vec<Course> = self
            .mongo
            .collection::<Course>(db::COURSES)
            .find(filter)
            .sort(doc! { "_id": 1 })
            .await?
            .try_collect()
            .await?;
        Ok(courses.into_iter().map(CourseResponse::from).collect())
    }

    /// The creator becomes the owning teacher of the new course.
    pub async fn create(
        &self,
        user: &CurrentUser,
        req: CreateCourseRequest,
    ) -> ApiResult<CourseResponse> {
        if !user.is_staff() {
            return Err(ApiError::forbidden("Only teachers and admins can create courses"));
        }

        let now = Utc::now();
        let mut course = Course {
            id: None,
            title: req.title.trim().to_string(),
            description: req.description,
            icon: req.icon,
            created_by: user.id,
            is_locked: req.is_locked,
            created_at: now,
            updated_at: now,
        };

        let mut session = db::begin(&self.client).await?;
        let inserted = self
            .mongo
            .collection::<Course>(db::COURSES)
            .insert_one(&course)
            .session(&mut session)
            .await?;
        let course_id = inserted
            .inserted_id
            .as_object_id()
            .ok_or_else(|| anyhow::anyhow!("Failed to get inserted course ID"))?;
        self.mongo
            .collection::<CourseTeacher>(db::COURSE_TEACHERS)
            .insert_one(CourseTeacher {
                id: None,
                user_id: user.id,
                course_id,
                is_owner: true,
                created_at: now,
            })
            .session(&mut session)
            .await?;
        session.commit_transaction().await?;

        tracing::info!(course_id = %course_id, user_id = %user.id, "Course created");

        course.id = Some(course_id);
        Ok(course.into())
    }

    pub async fn get(&self, user: &CurrentUser, course_id: ObjectId) -> ApiResult<CourseResponse> {
        Ok(self.policy.require_view(user, course_id).await?.into())
    }

    pub async fn update(
        &self,
        user: &CurrentUser,
        course_id: ObjectId,
        req: UpdateCourseRequest,
    ) -> ApiResult<CourseResponse> {
        self.policy.require_edit(user, course_id).await?;

        let mut set = doc! { "updated_at": DateTime::now() };
        if let Some(title) = req.title {
            set.insert("title", title.trim());
        }
        if let Some(description) = req.description {
            set.insert("description", description);
        }
        if let Some(icon) = req.icon {
            set.insert("icon", icon);
        }
        if let Some(is_locked) = req.is_locked {
            set.insert("is_locked", is_locked);
        }

        let courses = self.mongo.collection::<Course>(db::COURSES);
        courses
            .update_one(doc! { "_id": course_id }, doc! { "$set": set })
            .await?;

        courses
            .find_one(doc! { "_id": course_id })
            .await?
            .map(CourseResponse::from)
            .ok_or_else(|| ApiError::not_found("Course not found"))
    }

    pub async fn delete(&self, user: &CurrentUser, course_id: ObjectId) -> ApiResult<()> {
        self.policy.require_edit(user, course_id).await?;

        let mut session = db::begin(&self.client).await?;
        cascade::delete_course(&self.mongo, &mut session, course_id).await?;
        session.commit_transaction().await?;

        tracing::info!(course_id = %course_id, user_id = %user.id, "Course deleted");
        Ok(())
    }

    async fn users_by_id(&self, ids: Vec<ObjectId>) -> ApiResult<HashMap<ObjectId, User>> {
        let users: Vec<User> = self
            .mongo
            .collection::<User>(db::USERS)
            .find(doc! { "_id": { "$in": ids } })
            .await?
            .try_collect()
            .await?;
        Ok(users
            .into_iter()
            .filter_map(|user| user.id.map(|id| (id, user)))
            .collect())
    }

    pub async fn list_teachers(
        &self,
        user: &CurrentUser,
        course_id: ObjectId,
    ) -> ApiResult<Vec<CourseMemberResponse>> {
        self.policy.require_edit(user, course_id).await?;

        let links: Vec<CourseTeacher> = self
            .mongo
            .collection::<CourseTeacher>(db::COURSE_TEACHERS)
            .find(doc! { "course_id": course_id })
            .sort(doc! { "_id": 1 })
            .await?
            .try_collect()
            .await?;
        let users = self
            .users_by_id(links.iter().map(|link| link.user_id).collect())
            .await?;

        Ok(links
            .into_iter()
            .filter_map(|link| {
                users.get(&link.user_id).map(|user| CourseMemberResponse {
                    user_id: link.user_id.to_hex(),
                    name: user.name.clone(),
                    email: user.email.clone(),
                    is_owner: Some(link.is_owner),
                    since: link.created_at,
                })
            })
            .collect())
    }

    /// Re-assigning an existing teacher only updates the ownership flag.
    pub async fn assign_teacher(
        &self,
        user: &CurrentUser,
        course_id: ObjectId,
        teacher_id: ObjectId,
        req: AssignTeacherRequest,
    ) -> ApiResult<CourseMemberResponse> {
        self.policy.require_edit(user, course_id).await?;
        let teacher = UserService::new(self.mongo.clone())
            .get_with_role(teacher_id, UserRole::Teacher)
            .await?;

        let links = self.mongo.collection::<CourseTeacher>(db::COURSE_TEACHERS);
        links
            .update_one(
                doc! { "user_id": teacher_id, "course_id": course_id },
                doc! {
                    "$set": { "is_owner": req.is_owner },
                    "$setOnInsert": { "created_at": DateTime::now() },
                },
            )
            .upsert(true)
            .await?;
        let link = links
            .find_one(doc! { "user_id": teacher_id, "course_id": course_id })
            .await?
            .ok_or_else(|| anyhow::anyhow!("Teacher link vanished after upsert"))?;

        tracing::info!(
            course_id = %course_id,
            teacher_id = %teacher_id,
            is_owner = req.is_owner,
            "Teacher assigned"
        );

        Ok(CourseMemberResponse {
            user_id: teacher_id.to_hex(),
            name: teacher.name,
            email: teacher.email,
            is_owner: Some(link.is_owner),
            since: link.created_at,
        })
    }

    pub async fn remove_teacher(
        &self,
        user: &CurrentUser,
        course_id: ObjectId,
        teacher_id: ObjectId,
    ) -> ApiResult<()> {
        self.policy.require_edit(user, course_id).await?;
        let result = self
            .mongo
            .collection::<CourseTeacher>(db::COURSE_TEACHERS)
            .delete_one(doc! { "user_id": teacher_id, "course_id": course_id })
            .await?;
        if result.deleted_count == 0 {
            return Err(ApiError::not_found("Teacher is not assigned to this course"));
        }
        tracing::info!(course_id = %course_id, teacher_id = %teacher_id, "Teacher removed");
        Ok(())
    }

    pub async fn list_enrollments(
        &self,
        user: &CurrentUser,
        course_id: ObjectId,
    ) -> ApiResult<Vec<CourseMemberResponse>> {
        self.policy.require_edit(user, course_id).await?;

        let rows: Vec<CourseEnrollment> = self
            .mongo
            .collection::<CourseEnrollment>(db::COURSE_ENROLLMENTS)
            .find(doc! { "course_id": course_id })
            .sort(doc! { "_id": 1 })
            .await?
            .try_collect()
            .await?;
        let users = self
            .users_by_id(rows.iter().map(|row| row.user_id).collect())
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                users.get(&row.user_id).map(|user| CourseMemberResponse {
                    user_id: row.user_id.to_hex(),
                    name: user.name.clone(),
                    email: user.email.clone(),
                    is_owner: None,
                    since: row.enrolled_at,
                })
            })
            .collect())
    }

    pub async fn enroll(
        &self,
        user: &CurrentUser,
        course_id: ObjectId,
        student_id: ObjectId,
    ) -> ApiResult<CourseMemberResponse> {
        let course = self.policy.require_edit(user, course_id).await?;
        let student = UserService::new(self.mongo.clone())
            .get_with_role(student_id, UserRole::Student)
            .await?;

        let enrolled_at = Utc::now();
        self.mongo
            .collection::<CourseEnrollment>(db::COURSE_ENROLLMENTS)
            .insert_one(CourseEnrollment {
                id: None,
                user_id: student_id,
                course_id,
                enrolled_at,
            })
            .await
            .map_err(|e| {
                if is_duplicate_key(&e) {
                    ApiError::conflict("Student is already enrolled")
                } else {
                    ApiError::from(e)
                }
            })?;

        tracing::info!(course_id = %course_id, student_id = %student_id, "Student enrolled");
        self.notifier.notify(ActivityEvent::new(
            ActivityKind::EnrollmentCreated,
            &student.name,
            &course.title,
            &course.title,
        ));

        Ok(CourseMemberResponse {
            user_id: student_id.to_hex(),
            name: student.name,
            email: student.email,
            is_owner: None,
            since: enrolled_at,
        })
    }

    /// Progress rows and certificates are kept; re-enrolling restores them.
    pub async fn unenroll(
        &self,
        user: &CurrentUser,
        course_id: ObjectId,
        student_id: ObjectId,
    ) -> ApiResult<()> {
        let course = self.policy.require_edit(user, course_id).await?;
        let result = self
            .mongo
            .collection::<CourseEnrollment>(db::COURSE_ENROLLMENTS)
            .delete_one(doc! { "user_id": student_id, "course_id": course_id })
            .await?;
        if result.deleted_count == 0 {
            return Err(ApiError::not_found("Student is not enrolled in this course"));
        }

        let student_name = match UserService::new(self.mongo.clone()).get(student_id).await {
            Ok(student) => student.name,
            Err(e) => {
                tracing::warn!(student_id = %student_id, error = %e, "Student lookup for activity event failed");
                String::new()
            }
        };

        tracing::info!(course_id = %course_id, student_id = %student_id, "Student unenrolled");
        self.notifier.notify(ActivityEvent::new(
            ActivityKind::EnrollmentRemoved,
            student_name,
            &course.title,
            &course.title,
        ));
        Ok(())
    }
}
