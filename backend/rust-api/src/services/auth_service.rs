use anyhow::Context;
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{Duration, Utc};
use mongodb::bson::{doc, oid::ObjectId, DateTime};
use mongodb::Database;
use redis::aio::ConnectionManager;

use super::db;
use super::role_resolver::RoleResolver;
use crate::error::{is_duplicate_key, ApiError, ApiResult};
use crate::middlewares::auth::{JwtClaims, JwtService};
use crate::models::user::{AuthResponse, LoginRequest, RegisterRequest, User, UserProfile, UserRole};

const MAX_FAILED_LOGINS: u32 = 5;
const FAILED_LOGIN_WINDOW_SECONDS: u64 = 900;

pub struct AuthService {
    mongo: Database,
    redis: ConnectionManager,
    jwt_service: JwtService,
    token_ttl_seconds: i64,
}

impl AuthService {
    pub fn new(
        mongo: Database,
        redis: ConnectionManager,
        jwt_service: JwtService,
        token_ttl_seconds: i64,
    ) -> Self {
        Self {
            mongo,
            redis,
            jwt_service,
            token_ttl_seconds,
        }
    }

    pub fn hash_password(&self, password: &str) -> anyhow::Result<String> {
        hash(password, DEFAULT_COST).context("Failed to hash password")
    }

    pub fn verify_password(&self, password: &str, hash: &str) -> anyhow::Result<bool> {
        verify(password, hash).context("Failed to verify password")
    }

    /// New accounts always start as students.
    pub async fn register(&self, req: RegisterRequest) -> ApiResult<AuthResponse> {
        let users = self.mongo.collection::<User>(db::USERS);
        let email = req.email.trim().to_lowercase();

        if users.find_one(doc! { "email": &email }).await?.is_some() {
            return Err(ApiError::conflict("User with this email already exists"));
        }

        let now = Utc::now();
        let mut user = User {
            id: None,
            email,
            password_hash: self.hash_password(&req.password)?,
            name: req.name.trim().to_string(),
            role_id: UserRole::Student.id(),
            created_at: now,
            updated_at: now,
            last_login_at: None,
        };

        let inserted = users.insert_one(&user).await.map_err(|e| {
            if is_duplicate_key(&e) {
                ApiError::conflict("User with this email already exists")
            } else {
                ApiError::from(e)
            }
        })?;
        let user_id = inserted
            .inserted_id
            .as_object_id()
            .ok_or_else(|| anyhow::anyhow!("Failed to get inserted user ID"))?;
        user.id = Some(user_id);

        tracing::info!(user_id = %user_id, "User registered");

        let token = self.generate_token(&user, user_id)?;
        Ok(AuthResponse {
            token,
            user: UserProfile::from_user(user, Some(UserRole::Student)),
        })
    }

    pub async fn login(&self, req: LoginRequest, roles: &RoleResolver) -> ApiResult<AuthResponse> {
        let users = self.mongo.collection::<User>(db::USERS);
        let email = req.email.trim().to_lowercase();

        let invalid = || ApiError::unauthorized("Invalid email or password");

        let mut user = users
            .find_one(doc! { "email": &email })
            .await?
            .ok_or_else(invalid)?;

        if !self.verify_password(&req.password, &user.password_hash)? {
            tracing::warn!(email = %email, "Failed login attempt: invalid password");
            return Err(invalid());
        }

        let user_id = user
            .id
            .ok_or_else(|| anyhow::anyhow!("User ID not found"))?;

        users
            .update_one(
                doc! { "_id": user_id },
                doc! { "$set": { "last_login_at": DateTime::now() } },
            )
            .await?;
        user.last_login_at = Some(Utc::now());

        tracing::info!(user_id = %user_id, "Successful login");

        let token = self.generate_token(&user, user_id)?;
        let role = roles.role_name(Some(user.role_id)).await;
        Ok(AuthResponse {
            token,
            user: UserProfile::from_user(user, role),
        })
    }

    pub async fn get_user(&self, user_id: ObjectId) -> ApiResult<User> {
        self.mongo
            .collection::<User>(db::USERS)
            .find_one(doc! { "_id": user_id })
            .await?
            .ok_or_else(|| ApiError::not_found("User not found"))
    }

    fn generate_token(&self, user: &User, user_id: ObjectId) -> ApiResult<String> {
        let claims = build_claims(user, user_id, Utc::now().timestamp(), self.token_ttl_seconds);
        Ok(self
            .jwt_service
            .generate_token(&claims)
            .map_err(|e| anyhow::anyhow!("Failed to sign token: {}", e))?)
    }

    /// True once the email has accumulated too many failed logins.
    pub async fn check_failed_attempts(&self, email: &str) -> anyhow::Result<bool> {
        let mut conn = self.redis.clone();
        let count: Option<u32> = redis::cmd("GET")
            .arg(failed_login_key(email))
            .query_async(&mut conn)
            .await
            .context("Failed to query failed login attempts")?;

        Ok(count.unwrap_or(0) >= MAX_FAILED_LOGINS)
    }

    /// The counter window starts at the first failure.
    pub async fn increment_failed_attempts(&self, email: &str) -> anyhow::Result<u32> {
        let key = failed_login_key(email);
        let mut conn = self.redis.clone();

        let count: u32 = redis::cmd("INCR")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .context("Failed to increment failed login attempts")?;

        if count == 1 {
            redis::cmd("EXPIRE")
                .arg(&key)
                .arg(FAILED_LOGIN_WINDOW_SECONDS)
                .query_async::<()>(&mut conn)
                .await
                .context("Failed to set TTL for failed login attempts")?;
        }

        Ok(count)
    }

    pub async fn clear_failed_attempts(&self, email: &str) -> anyhow::Result<()> {
        let mut conn = self.redis.clone();
        redis::cmd("DEL")
            .arg(failed_login_key(email))
            .query_async::<()>(&mut conn)
            .await
            .context("Failed to clear failed login attempts")?;
        Ok(())
    }
}

fn failed_login_key(email: &str) -> String {
    format!("failed_login:{}", email.trim().to_lowercase())
}

fn build_claims(user: &User, user_id: ObjectId, now: i64, ttl_seconds: i64) -> JwtClaims {
    let exp = now + Duration::seconds(ttl_seconds).num_seconds();
    JwtClaims {
        sub: user_id.to_hex(),
        email: user.email.clone(),
        name: user.name.clone(),
        role_id: Some(user.role_id),
        iat: now as usize,
        exp: exp as usize,
    }
}
