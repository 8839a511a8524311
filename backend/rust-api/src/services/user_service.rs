use chrono::Utc;
use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::Database;

use super::db;
use super::role_resolver::RoleResolver;
use crate::error::{ApiError, ApiResult};
use crate::models::user::{CurrentUser, User, UserProfile, UserRole};

pub struct UserService {
    mongo: Database,
}

impl UserService {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    /// Staff-only directory used by teacher and enrolment pickers.
    pub async fn list_users(
        &self,
        caller: &CurrentUser,
        role: Option<UserRole>,
    ) -> ApiResult<Vec<UserProfile>> {
        if !caller.is_staff() {
            return Err(ApiError::forbidden("Only teachers and admins can list users"));
        }

        let filter = match role {
            Some(role) => doc! { "role_id": role.id() },
            None => Document::new(),
        };
        let users: Vec<User> = self
            .mongo
            .collection::<User>(db::USERS)
            .find(filter)
            .sort(doc! { "name": 1, "_id": 1 })
            .await?
            .try_collect()
            .await?;

        let table = RoleResolver::new(self.mongo.clone()).role_table().await;
        Ok(users
            .into_iter()
            .map(|user| {
                let role = table.get(&user.role_id).copied();
                UserProfile::from_user(user, role)
            })
            .collect())
    }

    pub async fn update_role(
        &self,
        caller: &CurrentUser,
        user_id: ObjectId,
        role: UserRole,
    ) -> ApiResult<UserProfile> {
        if !caller.is_admin() {
            return Err(ApiError::forbidden("Only admins can change roles"));
        }

        let users = self.mongo.collection::<User>(db::USERS);
        let result = users
            .update_one(
                doc! { "_id": user_id },
                doc! { "$set": { "role_id": role.id(), "updated_at": DateTime::now() } },
            )
            .await?;
        if result.matched_count == 0 {
            return Err(ApiError::not_found("User not found"));
        }

        tracing::info!(
            admin_id = %caller.id,
            user_id = %user_id,
            role = role.as_str(),
            "User role changed"
        );

        let mut user = self.get(user_id).await?;
        user.updated_at = Utc::now();
        Ok(UserProfile::from_user(user, Some(role)))
    }

    pub async fn get(&self, user_id: ObjectId) -> ApiResult<User> {
        self.mongo
            .collection::<User>(db::USERS)
            .find_one(doc! { "_id": user_id })
            .await?
            .ok_or_else(|| ApiError::not_found("User not found"))
    }

    /// Loads a user and requires the given role, for membership assignment.
    pub async fn get_with_role(&self, user_id: ObjectId, role: UserRole) -> ApiResult<User> {
        let user = self.get(user_id).await?;
        if user.role_id != role.id() {
            return Err(ApiError::validation(format!(
                "User must have the {} role",
                role.as_str()
            )));
        }
        Ok(user)
    }
}
