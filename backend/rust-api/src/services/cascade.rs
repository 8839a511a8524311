//! Explicit cascading deletes. Every function runs inside the caller's
//! transaction so a parent and its dependents disappear together.

use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::{ClientSession, Database};

use super::db;

async fn ids_in_session(
    mongo: &Database,
    session: &mut ClientSession,
    collection: &str,
    filter: Document,
) -> mongodb::error::Result<Vec<ObjectId>> {
    let mut cursor = mongo
        .collection::<Document>(collection)
        .find(filter)
        .projection(doc! { "_id": 1 })
        .session(&mut *session)
        .await?;
    let rows: Vec<Document> = cursor.stream(&mut *session).try_collect().await?;
    Ok(rows
        .iter()
        .filter_map(|row| row.get_object_id("_id").ok())
        .collect())
}

async fn delete_where(
    mongo: &Database,
    session: &mut ClientSession,
    collection: &str,
    filter: Document,
) -> mongodb::error::Result<u64> {
    Ok(mongo
        .collection::<Document>(collection)
        .delete_many(filter)
        .session(&mut *session)
        .await?
        .deleted_count)
}

pub async fn delete_tasks(
    mongo: &Database,
    session: &mut ClientSession,
    task_ids: &[ObjectId],
) -> mongodb::error::Result<()> {
    if task_ids.is_empty() {
        return Ok(());
    }
    delete_where(mongo, session, db::TASK_PROGRESS, doc! { "task_id": { "$in": task_ids.to_vec() } })
        .await?;
    delete_where(mongo, session, db::TASKS, doc! { "_id": { "$in": task_ids.to_vec() } }).await?;
    Ok(())
}

/// Removes hubs with their tasks, touching edges and per-user states, and
/// detaches any quiz that pointed at them.
pub async fn delete_hubs(
    mongo: &Database,
    session: &mut ClientSession,
    hub_ids: &[ObjectId],
) -> mongodb::error::Result<()> {
    if hub_ids.is_empty() {
        return Ok(());
    }
    let task_ids =
        ids_in_session(mongo, session, db::TASKS, doc! { "hub_id": { "$in": hub_ids.to_vec() } }).await?;
    delete_tasks(mongo, session, &task_ids).await?;

    delete_where(
        mongo,
        session,
        db::HUB_EDGES,
        doc! { "$or": [
            { "from_hub_id": { "$in": hub_ids.to_vec() } },
            { "to_hub_id": { "$in": hub_ids.to_vec() } },
        ] },
    )
    .await?;
    delete_where(mongo, session, db::HUB_USER_STATES, doc! { "hub_id": { "$in": hub_ids.to_vec() } })
        .await?;

    mongo
        .collection::<Document>(db::QUIZZES)
        .update_many(
            doc! { "hub_id": { "$in": hub_ids.to_vec() } },
            doc! { "$set": { "hub_id": null, "updated_at": DateTime::now() } },
        )
        .session(&mut *session)
        .await?;

    delete_where(mongo, session, db::HUBS, doc! { "_id": { "$in": hub_ids.to_vec() } }).await?;
    Ok(())
}

pub async fn delete_questions(
    mongo: &Database,
    session: &mut ClientSession,
    question_ids: &[ObjectId],
) -> mongodb::error::Result<()> {
    if question_ids.is_empty() {
        return Ok(());
    }
    delete_where(
        mongo,
        session,
        db::QUIZ_ANSWERS,
        doc! { "question_id": { "$in": question_ids.to_vec() } },
    )
    .await?;
    delete_where(mongo, session, db::QUIZ_QUESTIONS, doc! { "_id": { "$in": question_ids.to_vec() } })
        .await?;
    Ok(())
}

/// Removes quizzes with their question bank and attempts, detaching hubs.
pub async fn delete_quizzes(
    mongo: &Database,
    session: &mut ClientSession,
    quiz_ids: &[ObjectId],
) -> mongodb::error::Result<()> {
    if quiz_ids.is_empty() {
        return Ok(());
    }
    let question_ids = ids_in_session(
        mongo,
        session,
        db::QUIZ_QUESTIONS,
        doc! { "quiz_id": { "$in": quiz_ids.to_vec() } },
    )
    .await?;
    delete_questions(mongo, session, &question_ids).await?;
    delete_where(mongo, session, db::QUIZ_ATTEMPTS, doc! { "quiz_id": { "$in": quiz_ids.to_vec() } })
        .await?;

    mongo
        .collection::<Document>(db::HUBS)
        .update_many(
            doc! { "quiz_id": { "$in": quiz_ids.to_vec() } },
            doc! { "$set": { "quiz_id": null, "updated_at": DateTime::now() } },
        )
        .session(&mut *session)
        .await?;

    delete_where(mongo, session, db::QUIZZES, doc! { "_id": { "$in": quiz_ids.to_vec() } }).await?;
    Ok(())
}

/// Removes a course and everything scoped to it.
pub async fn delete_course(
    mongo: &Database,
    session: &mut ClientSession,
    course_id: ObjectId,
) -> mongodb::error::Result<()> {
    let scope = doc! { "course_id": course_id };

    let hub_ids = ids_in_session(mongo, session, db::HUBS, scope.clone()).await?;
    delete_hubs(mongo, session, &hub_ids).await?;
    // Edges whose endpoints were already removed above
    delete_where(mongo, session, db::HUB_EDGES, scope.clone()).await?;

    let quiz_ids = ids_in_session(mongo, session, db::QUIZZES, scope.clone()).await?;
    delete_quizzes(mongo, session, &quiz_ids).await?;

    delete_where(mongo, session, db::COURSE_TEACHERS, scope.clone()).await?;
    delete_where(mongo, session, db::COURSE_ENROLLMENTS, scope.clone()).await?;
    delete_where(mongo, session, db::CERTIFICATES, scope).await?;
    delete_where(mongo, session, db::COURSES, doc! { "_id": course_id }).await?;
    Ok(())
}
