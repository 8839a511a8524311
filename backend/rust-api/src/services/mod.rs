use crate::config::Config;
use mongodb::{Client as MongoClient, Database};
use redis::aio::ConnectionManager;
use std::sync::Arc;

use self::access_policy::CourseAccessPolicy;
use self::activity_notifier::{ActivityNotifier, BroadcastNotifier};
use self::role_resolver::RoleResolver;

pub struct AppState {
    pub config: Config,
    /// Kept for opening transaction sessions.
    pub mongo_client: MongoClient,
    pub mongo: Database,
    pub redis: ConnectionManager,
    pub activity: Arc<BroadcastNotifier>,
}

impl AppState {
    pub async fn new(
        config: Config,
        mongo_client: MongoClient,
        redis_client: redis::Client,
    ) -> anyhow::Result<Self> {
        let mongo = mongo_client.database(&config.mongo_database);

        db::ensure_indexes(&mongo).await?;
        db::seed_roles(&mongo).await?;
        admin_seed::bootstrap(&config, &mongo).await?;

        let redis = connect_redis(redis_client).await?;

        let activity = Arc::new(BroadcastNotifier::new(config.activity_channel_capacity));

        Ok(Self {
            config,
            mongo_client,
            mongo,
            redis,
            activity,
        })
    }

    pub fn policy(&self) -> CourseAccessPolicy {
        CourseAccessPolicy::new(self.mongo.clone())
    }

    pub fn roles(&self) -> RoleResolver {
        RoleResolver::new(self.mongo.clone())
    }

    pub fn notifier(&self) -> Arc<dyn ActivityNotifier> {
        self.activity.clone()
    }
}

/// Opens the managed Redis connection and proves it answers before serving.
async fn connect_redis(client: redis::Client) -> anyhow::Result<ConnectionManager> {
    use anyhow::Context;
    use std::time::Duration;

    let manager = tokio::time::timeout(Duration::from_secs(30), ConnectionManager::new(client))
        .await
        .context("Timed out connecting to Redis")??;

    let mut conn = manager.clone();
    let pong: String = tokio::time::timeout(
        Duration::from_secs(5),
        redis::cmd("PING").query_async(&mut conn),
    )
    .await
    .context("Timed out waiting for Redis PING")??;

    tracing::info!(reply = %pong, "Redis connection ready");
    Ok(manager)
}

pub mod access_policy;
pub mod activity_notifier;
pub mod admin_seed;
pub mod auth_service;
pub mod cascade;
pub mod certificate_service;
pub mod course_service;
pub mod db;
pub mod graph_service;
pub mod progress_service;
pub mod quiz_engine;
pub mod quiz_service;
pub mod role_resolver;
pub mod user_service;
