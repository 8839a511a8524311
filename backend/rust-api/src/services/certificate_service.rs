use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, DateTime};
use mongodb::Database;
use std::collections::HashMap;

use super::access_policy::CourseAccessPolicy;
use super::db;
use super::progress_service::is_course_completed;
use crate::error::{is_duplicate_key, ApiError, ApiResult};
use crate::metrics::CERTIFICATES_ISSUED_TOTAL;
use crate::models::certificate::{Certificate, CertificateResponse, ClaimCertificateResponse};
use crate::models::course::Course;
use crate::models::user::{CurrentUser, UserRole};

#[derive(Debug, PartialEq, Eq)]
enum ListingScope {
    Everything,
    ViewableCourses,
    Denied,
}

fn listing_scope(caller: &CurrentUser, user_id: ObjectId) -> ListingScope {
    match caller.role {
        Some(UserRole::Admin) => ListingScope::Everything,
        Some(UserRole::Teacher) => ListingScope::ViewableCourses,
        _ if caller.id == user_id => ListingScope::Everything,
        _ => ListingScope::Denied,
    }
}

#[derive(Clone)]
pub struct CertificateService {
    mongo: Database,
    policy: CourseAccessPolicy,
}

impl CertificateService {
    pub fn new(mongo: Database) -> Self {
        Self {
            policy: CourseAccessPolicy::new(mongo.clone()),
            mongo,
        }
    }

    async fn find(&self, user_id: ObjectId, course_id: ObjectId) -> ApiResult<Option<Certificate>> {
        Ok(self
            .mongo
            .collection::<Certificate>(db::CERTIFICATES)
            .find_one(doc! { "user_id": user_id, "course_id": course_id })
            .await?)
    }

    /// Returns the certificate once the course is completed, creating it on
    /// first call. An existing certificate is returned unchanged.
    pub async fn issue_if_earned(
        &self,
        user_id: ObjectId,
        course_id: ObjectId,
    ) -> ApiResult<Option<Certificate>> {
        if !is_course_completed(&self.mongo, user_id, course_id).await? {
            return Ok(None);
        }

        let result = self
            .mongo
            .collection::<Certificate>(db::CERTIFICATES)
            .update_one(
                doc! { "user_id": user_id, "course_id": course_id },
                doc! { "$setOnInsert": { "issued_at": DateTime::now() } },
            )
            .upsert(true)
            .await;

        match result {
            Ok(outcome) if outcome.upserted_id.is_some() => {
                CERTIFICATES_ISSUED_TOTAL.inc();
                tracing::info!(user_id = %user_id, course_id = %course_id, "Certificate issued");
            }
            Ok(_) => {}
            // Two concurrent upserts on the unique pair: the loser reads the winner's row.
            Err(e) if is_duplicate_key(&e) => {}
            Err(e) => return Err(e.into()),
        }

        self.find(user_id, course_id).await
    }

    /// All certificates of a user with course title and icon, newest first.
    pub async fn list_for_user(&self, user_id: ObjectId) -> ApiResult<Vec<CertificateResponse>> {
        let certificates: Vec<Certificate> = self
            .mongo
            .collection::<Certificate>(db::CERTIFICATES)
            .find(doc! { "user_id": user_id })
            .sort(doc! { "issued_at": -1, "_id": -1 })
            .await?
            .try_collect()
            .await?;
        self.join_courses(certificates).await
    }

    /// Listing on behalf of `user_id`: admins see everything, teachers only
    /// certificates for courses they can view, students only their own.
    pub async fn list_for_requester(
        &self,
        caller: &CurrentUser,
        user_id: ObjectId,
    ) -> ApiResult<Vec<CertificateResponse>> {
        match listing_scope(caller, user_id) {
            ListingScope::Everything => self.list_for_user(user_id).await,
            ListingScope::ViewableCourses => {
                let all = self.list_for_user(user_id).await?;
                let mut visible = Vec::with_capacity(all.len());
                for certificate in all {
                    let Ok(course_id) = ObjectId::parse_str(&certificate.course_id) else {
                        continue;
                    };
                    if self.policy.can_view(caller, course_id).await {
                        visible.push(certificate);
                    }
                }
                Ok(visible)
            }
            ListingScope::Denied => Err(ApiError::forbidden(
                "You can only view your own certificates",
            )),
        }
    }

    /// Explicit issuance for the caller.
    pub async fn claim(
        &self,
        caller: &CurrentUser,
        course_id: ObjectId,
    ) -> ApiResult<ClaimCertificateResponse> {
        let course = self.policy.require_view(caller, course_id).await?;
        let certificate = self.issue_if_earned(caller.id, course_id).await?;
        Ok(ClaimCertificateResponse {
            certificate: certificate
                .map(|cert| CertificateResponse::new(cert, Some(course.title), course.icon)),
        })
    }

    async fn join_courses(
        &self,
        certificates: Vec<Certificate>,
    ) -> ApiResult<Vec<CertificateResponse>> {
        let course_ids: Vec<ObjectId> = certificates.iter().map(|c| c.course_id).collect();
        let courses: Vec<Course> = self
            .mongo
            .collection::<Course>(db::COURSES)
            .find(doc! { "_id": { "$in": course_ids } })
            .await?
            .try_collect()
            .await?;
        let by_id: HashMap<ObjectId, Course> = courses
            .into_iter()
            .filter_map(|course| course.id.map(|id| (id, course)))
            .collect();

        Ok(certificates
            .into_iter()
            .map(|cert| {
                let course = by_id.get(&cert.course_id);
                CertificateResponse::new(
                    cert,
                    course.map(|c| c.title.clone()),
                    course.and_then(|c| c.icon.clone()),
                )
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: Option<UserRole>) -> CurrentUser {
        CurrentUser {
            id: ObjectId::new(),
            email: "u@example.com".to_string(),
            name: "U".to_string(),
            role,
        }
    }

    #[test]
    fn test_listing_scope_by_role() {
        let other = ObjectId::new();

        assert_eq!(listing_scope(&user(Some(UserRole::Admin)), other), ListingScope::Everything);
        assert_eq!(
            listing_scope(&user(Some(UserRole::Teacher)), other),
            ListingScope::ViewableCourses
        );
        assert_eq!(listing_scope(&user(Some(UserRole::Student)), other), ListingScope::Denied);
        assert_eq!(listing_scope(&user(None), other), ListingScope::Denied);
    }

    #[test]
    fn test_student_may_list_own_certificates() {
        let student = user(Some(UserRole::Student));
        assert_eq!(listing_scope(&student, student.id), ListingScope::Everything);
    }
}
