use futures::TryStreamExt;
use mongodb::{bson::doc, Database};
use std::collections::HashMap;

use super::db;
use crate::models::user::{Role, UserRole};

/// Maps a stored role id to its role name through the seeded "roles" rows.
#[derive(Clone)]
pub struct RoleResolver {
    mongo: Database,
}

impl RoleResolver {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    /// Unknown ids, missing ids and lookup failures all yield `None`.
    pub async fn role_name(&self, role_id: Option<i32>) -> Option<UserRole> {
        let role_id = role_id?;
        match self
            .mongo
            .collection::<Role>(db::ROLES)
            .find_one(doc! { "_id": role_id })
            .await
        {
            Ok(row) => role_from_row(row),
            Err(e) => {
                tracing::warn!(role_id, error = %e, "Role lookup failed");
                None
            }
        }
    }

    /// Whole id-to-role table, for resolving many users at once.
    /// Rows with unknown names are skipped; a failed read yields an empty table.
    pub async fn role_table(&self) -> HashMap<i32, UserRole> {
        let rows: Result<Vec<Role>, _> = match self
            .mongo
            .collection::<Role>(db::ROLES)
            .find(doc! {})
            .await
        {
            Ok(cursor) => cursor.try_collect().await,
            Err(e) => Err(e),
        };
        match rows {
            Ok(rows) => rows
                .into_iter()
                .filter_map(|row| {
                    let id = row.id;
                    role_from_row(Some(row)).map(|role| (id, role))
                })
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "Role table lookup failed");
                HashMap::new()
            }
        }
    }
}

fn role_from_row(row: Option<Role>) -> Option<UserRole> {
    row.and_then(|role| UserRole::from_name(&role.name))
}
