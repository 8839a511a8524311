use anyhow::{Context, Result};
use mongodb::{
    bson::{doc, Document},
    options::IndexOptions,
    Client, ClientSession, Database, IndexModel,
};

use crate::models::user::{Role, UserRole};

pub const USERS: &str = "users";
pub const ROLES: &str = "roles";
pub const COURSES: &str = "courses";
pub const COURSE_TEACHERS: &str = "course_teachers";
pub const COURSE_ENROLLMENTS: &str = "course_enrollments";
pub const HUBS: &str = "hubs";
pub const TASKS: &str = "tasks";
pub const HUB_EDGES: &str = "hub_edges";
pub const TASK_PROGRESS: &str = "task_progress";
pub const HUB_USER_STATES: &str = "hub_user_states";
pub const QUIZZES: &str = "quizzes";
pub const QUIZ_QUESTIONS: &str = "quiz_questions";
pub const QUIZ_ANSWERS: &str = "quiz_answers";
pub const QUIZ_ATTEMPTS: &str = "quiz_attempts";
pub const CERTIFICATES: &str = "certificates";

struct IndexSpec {
    collection: &'static str,
    keys: Document,
    unique: bool,
    /// Only documents matching this filter are indexed.
    partial: Option<Document>,
}

fn unique(collection: &'static str, keys: Document) -> IndexSpec {
    IndexSpec { collection, keys, unique: true, partial: None }
}

fn lookup(collection: &'static str, keys: Document) -> IndexSpec {
    IndexSpec { collection, keys, unique: false, partial: None }
}

fn index_specs() -> Vec<IndexSpec> {
    vec![
        unique(USERS, doc! { "email": 1 }),
        unique(COURSE_TEACHERS, doc! { "user_id": 1, "course_id": 1 }),
        unique(COURSE_ENROLLMENTS, doc! { "user_id": 1, "course_id": 1 }),
        unique(HUB_EDGES, doc! { "from_hub_id": 1, "to_hub_id": 1 }),
        unique(TASK_PROGRESS, doc! { "user_id": 1, "task_id": 1 }),
        unique(HUB_USER_STATES, doc! { "user_id": 1, "hub_id": 1 }),
        unique(QUIZZES, doc! { "course_id": 1, "title": 1 }),
        unique(CERTIFICATES, doc! { "user_id": 1, "course_id": 1 }),
        // At most one start hub per course
        IndexSpec {
            partial: Some(doc! { "is_start": true }),
            ..unique(HUBS, doc! { "course_id": 1, "is_start": 1 })
        },
        lookup(HUBS, doc! { "course_id": 1 }),
        lookup(TASKS, doc! { "hub_id": 1 }),
        lookup(HUB_EDGES, doc! { "course_id": 1 }),
        lookup(QUIZ_QUESTIONS, doc! { "quiz_id": 1 }),
        lookup(QUIZ_ANSWERS, doc! { "question_id": 1 }),
        lookup(QUIZ_ATTEMPTS, doc! { "user_id": 1, "quiz_id": 1 }),
    ]
}

pub async fn ensure_indexes(mongo: &Database) -> Result<()> {
    for spec in index_specs() {
        let options = IndexOptions::builder()
            .unique(spec.unique)
            .partial_filter_expression(spec.partial)
            .build();
        let model = IndexModel::builder().keys(spec.keys).options(options).build();
        mongo
            .collection::<Document>(spec.collection)
            .create_index(model)
            .await
            .with_context(|| format!("Failed to create index on {}", spec.collection))?;
    }
    tracing::info!("MongoDB indexes ensured");
    Ok(())
}

/// Seeds the fixed role rows; existing rows are left untouched.
pub async fn seed_roles(mongo: &Database) -> Result<()> {
    let roles = mongo.collection::<Role>(ROLES);
    for role in UserRole::ALL {
        roles
            .update_one(
                doc! { "_id": role.id() },
                doc! { "$setOnInsert": { "name": role.as_str() } },
            )
            .upsert(true)
            .await
            .with_context(|| format!("Failed to seed role {}", role.as_str()))?;
    }
    Ok(())
}

/// Opens a session with a running multi-document transaction.
/// Dropping the session without committing aborts the transaction.
pub async fn begin(client: &Client) -> mongodb::error::Result<ClientSession> {
    let mut session = client.start_session().await?;
    session.start_transaction().await?;
    Ok(session)
}
