use mongodb::{bson::doc, bson::oid::ObjectId, Database};

use super::db;
use crate::error::{ApiError, ApiResult};
use crate::models::course::{Course, CourseEnrollment, CourseTeacher};
use crate::models::user::{CurrentUser, UserRole};

/// Everything the view/edit decision depends on, gathered for one (user, course).
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessFacts {
    pub role: Option<UserRole>,
    pub is_creator: bool,
    /// `Some(is_owner)` when a CourseTeacher row links the user to the course.
    pub teacher_link: Option<bool>,
    pub enrolled: bool,
    pub course_locked: bool,
}

pub fn can_view(facts: &AccessFacts) -> bool {
    match facts.role {
        Some(UserRole::Admin) => true,
        Some(UserRole::Teacher) => facts.is_creator || facts.teacher_link.is_some(),
        Some(UserRole::Student) => facts.enrolled && !facts.course_locked,
        None => false,
    }
}

pub fn can_edit(facts: &AccessFacts) -> bool {
    match facts.role {
        Some(UserRole::Admin) => true,
        Some(UserRole::Teacher) => facts.is_creator || facts.teacher_link == Some(true),
        Some(UserRole::Student) | None => false,
    }
}

/// Single entry point for course-scoped authorization.
#[derive(Clone)]
pub struct CourseAccessPolicy {
    mongo: Database,
}

impl CourseAccessPolicy {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    pub async fn find_course(&self, course_id: ObjectId) -> ApiResult<Option<Course>> {
        Ok(self
            .mongo
            .collection::<Course>(db::COURSES)
            .find_one(doc! { "_id": course_id })
            .await?)
    }

    async fn facts(&self, user: &CurrentUser, course: &Course) -> ApiResult<AccessFacts> {
        let course_id = course.id.ok_or_else(|| anyhow::anyhow!("course without _id"))?;
        let link = doc! { "user_id": user.id, "course_id": course_id };

        let teacher_link = match user.role {
            Some(UserRole::Teacher) => self
                .mongo
                .collection::<CourseTeacher>(db::COURSE_TEACHERS)
                .find_one(link.clone())
                .await?
                .map(|row| row.is_owner),
            _ => None,
        };
        let enrolled = match user.role {
            Some(UserRole::Student) => {
                self.mongo
                    .collection::<CourseEnrollment>(db::COURSE_ENROLLMENTS)
                    .count_documents(link)
                    .await?
                    > 0
            }
            _ => false,
        };

        Ok(AccessFacts {
            role: user.role,
            is_creator: course.created_by == user.id,
            teacher_link,
            enrolled,
            course_locked: course.is_locked,
        })
    }

    /// False for a missing course or any lookup failure.
    pub async fn can_view(&self, user: &CurrentUser, course_id: ObjectId) -> bool {
        self.decide(user, course_id, can_view).await
    }

    pub async fn can_edit(&self, user: &CurrentUser, course_id: ObjectId) -> bool {
        self.decide(user, course_id, can_edit).await
    }

    async fn decide(
        &self,
        user: &CurrentUser,
        course_id: ObjectId,
        rule: fn(&AccessFacts) -> bool,
    ) -> bool {
        let course = match self.find_course(course_id).await {
            Ok(Some(course)) => course,
            Ok(None) => return false,
            Err(e) => {
                tracing::warn!(course_id = %course_id, error = %e, "Course lookup failed");
                return false;
            }
        };
        match self.facts(user, &course).await {
            Ok(facts) => rule(&facts),
            Err(e) => {
                tracing::warn!(course_id = %course_id, error = %e, "Access facts lookup failed");
                false
            }
        }
    }

    /// Loads the course (404 when absent) and requires view rights (403).
    pub async fn require_view(&self, user: &CurrentUser, course_id: ObjectId) -> ApiResult<Course> {
        self.require(user, course_id, can_view, "You do not have access to this course")
            .await
    }

    /// Loads the course (404 when absent) and requires edit rights (403).
    pub async fn require_edit(&self, user: &CurrentUser, course_id: ObjectId) -> ApiResult<Course> {
        self.require(user, course_id, can_edit, "You cannot modify this course")
            .await
    }

    async fn require(
        &self,
        user: &CurrentUser,
        course_id: ObjectId,
        rule: fn(&AccessFacts) -> bool,
        denial: &str,
    ) -> ApiResult<Course> {
        let course = self
            .find_course(course_id)
            .await?
            .ok_or_else(|| ApiError::not_found("Course not found"))?;
        let facts = self.facts(user, &course).await?;
        if !rule(&facts) {
            tracing::warn!(
                user_id = %user.id,
                course_id = %course_id,
                role = ?user.role,
                "Course access denied"
            );
            return Err(ApiError::forbidden(denial));
        }
        Ok(course)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts(role: Option<UserRole>) -> AccessFacts {
        AccessFacts {
            role,
            ..AccessFacts::default()
        }
    }

    #[test]
    fn test_admin_can_always_view_and_edit() {
        let admin = AccessFacts {
            course_locked: true,
            ..facts(Some(UserRole::Admin))
        };
        assert!(can_view(&admin));
        assert!(can_edit(&admin));
    }

    #[test]
    fn test_teacher_view_and_edit_rules() {
        let stranger = facts(Some(UserRole::Teacher));
        assert!(!can_view(&stranger));
        assert!(!can_edit(&stranger));

        let creator = AccessFacts {
            is_creator: true,
            ..stranger
        };
        assert!(can_view(&creator));
        assert!(can_edit(&creator));

        let co_teacher = AccessFacts {
            teacher_link: Some(false),
            ..stranger
        };
        assert!(can_view(&co_teacher));
        assert!(!can_edit(&co_teacher));

        let owner = AccessFacts {
            teacher_link: Some(true),
            course_locked: true,
            ..stranger
        };
        assert!(can_view(&owner));
        assert!(can_edit(&owner));
    }

    #[test]
    fn test_student_needs_enrollment_and_unlocked_course() {
        let student = facts(Some(UserRole::Student));
        assert!(!can_view(&student));

        let enrolled = AccessFacts {
            enrolled: true,
            ..student
        };
        assert!(can_view(&enrolled));
        assert!(!can_edit(&enrolled));

        let locked = AccessFacts {
            course_locked: true,
            ..enrolled
        };
        assert!(!can_view(&locked));

        let creator = AccessFacts {
            is_creator: true,
            enrolled: true,
            ..student
        };
        assert!(!can_edit(&creator));
    }

    #[test]
    fn test_unknown_role_has_no_permissions() {
        let nobody = AccessFacts {
            is_creator: true,
            teacher_link: Some(true),
            enrolled: true,
            ..facts(None)
        };
        assert!(!can_view(&nobody));
        assert!(!can_edit(&nobody));
    }
}
