use anyhow::{Context, Result};
use bcrypt::{hash, DEFAULT_COST};
use mongodb::{
    bson::{doc, DateTime, Document},
    Database,
};

use super::db;
use crate::config::{BootstrapAdmin, Config};
use crate::models::user::UserRole;

fn admin_document(admin: &BootstrapAdmin) -> Result<Document> {
    let password_hash =
        hash(&admin.password, DEFAULT_COST).context("Failed to hash bootstrap admin password")?;
    let now = DateTime::now();
    Ok(doc! {
        "email": admin.email.to_lowercase(),
        "password_hash": password_hash,
        "name": &admin.name,
        "role_id": UserRole::Admin.id(),
        "created_at": now,
        "updated_at": now,
    })
}

/// Inserts the configured admin account once; an existing account with the
/// same email is never modified.
pub async fn bootstrap(config: &Config, mongo: &Database) -> Result<()> {
    let Some(admin) = &config.bootstrap_admin else {
        tracing::debug!("No bootstrap admin configured, skipping");
        return Ok(());
    };

    let email = admin.email.to_lowercase();
    let result = mongo
        .collection::<Document>(db::USERS)
        .update_one(
            doc! { "email": &email },
            doc! { "$setOnInsert": admin_document(admin)? },
        )
        .upsert(true)
        .await
        .context("Failed to insert bootstrap admin")?;

    if result.upserted_id.is_some() {
        tracing::info!(email = %email, "Bootstrap admin created");
    } else {
        tracing::info!(email = %email, "Bootstrap admin already exists, seed skipped");
    }

    Ok(())
}
