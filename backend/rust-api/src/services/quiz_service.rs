use chrono::Utc;
use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, DateTime};
use mongodb::{Client, Database};
use std::collections::HashMap;
use validator::Validate;

use super::access_policy::CourseAccessPolicy;
use super::graph_service::link_quiz_to_hub;
use super::{cascade, db};
use crate::error::{is_duplicate_key, ApiError, ApiResult};
use crate::models::graph::Hub;
use crate::models::parse_object_id;
use crate::models::quiz::{
    AnswerResponse, CreateAnswerRequest, CreateQuestionRequest, CreateQuizRequest, QuestionResponse,
    Quiz, QuizAnswer, QuizQuestion, QuizResponse, UpdateAnswerRequest, UpdateQuestionRequest,
    UpdateQuizRequest,
};
use crate::models::user::CurrentUser;

fn duplicate_title(err: mongodb::error::Error) -> ApiError {
    if is_duplicate_key(&err) {
        ApiError::conflict("A quiz with this title already exists in the course")
    } else {
        err.into()
    }
}

/// Groups answers under their questions, keeping each list in authoring order.
pub fn assemble_questions(
    questions: Vec<QuizQuestion>,
    answers: Vec<QuizAnswer>,
) -> Vec<QuestionResponse> {
    let mut by_question: HashMap<ObjectId, Vec<QuizAnswer>> = HashMap::new();
    for answer in answers {
        by_question.entry(answer.question_id).or_default().push(answer);
    }

    questions
        .into_iter()
        .map(|question| {
            let mut answers = question
                .id
                .and_then(|id| by_question.remove(&id))
                .unwrap_or_default();
            answers.sort_by_key(|a| (a.order_index, a.id));
            QuestionResponse {
                id: question.id.map(|id| id.to_hex()).unwrap_or_default(),
                quiz_id: question.quiz_id.to_hex(),
                text: question.text,
                order_index: question.order_index,
                answers: answers.into_iter().map(AnswerResponse::from).collect(),
            }
        })
        .collect()
}

/// Teacher-side quiz authoring: quizzes, their question bank and answers.
pub struct QuizService {
    client: Client,
    mongo: Database,
    policy: CourseAccessPolicy,
}

impl QuizService {
    pub fn new(client: Client, mongo: Database) -> Self {
        Self {
            policy: CourseAccessPolicy::new(mongo.clone()),
            client,
            mongo,
        }
    }

    pub async fn find_quiz(&self, quiz_id: ObjectId) -> ApiResult<Quiz> {
        self.mongo
            .collection::<Quiz>(db::QUIZZES)
            .find_one(doc! { "_id": quiz_id })
            .await?
            .ok_or_else(|| ApiError::not_found("Quiz not found"))
    }

    async fn find_question(&self, question_id: ObjectId) -> ApiResult<(QuizQuestion, Quiz)> {
        let question = self
            .mongo
            .collection::<QuizQuestion>(db::QUIZ_QUESTIONS)
            .find_one(doc! { "_id": question_id })
            .await?
            .ok_or_else(|| ApiError::not_found("Question not found"))?;
        let quiz = self.find_quiz(question.quiz_id).await?;
        Ok((question, quiz))
    }

    async fn find_answer(&self, answer_id: ObjectId) -> ApiResult<(QuizAnswer, Quiz)> {
        let answer = self
            .mongo
            .collection::<QuizAnswer>(db::QUIZ_ANSWERS)
            .find_one(doc! { "_id": answer_id })
            .await?
            .ok_or_else(|| ApiError::not_found("Answer not found"))?;
        let (_, quiz) = self.find_question(answer.question_id).await?;
        Ok((answer, quiz))
    }

    pub async fn list(&self, user: &CurrentUser, course_id: ObjectId) -> ApiResult<Vec<QuizResponse>> {
        self.policy.require_view(user, course_id).await?;
        let quizzes: Vec<Quiz> = self
            .mongo
            .collection::<Quiz>(db::QUIZZES)
            .find(doc! { "course_id": course_id })
            .sort(doc! { "_id": 1 })
            .await?
            .try_collect()
            .await?;
        Ok(quizzes.into_iter().map(QuizResponse::from).collect())
    }

    pub async fn create(&self, user: &CurrentUser, req: CreateQuizRequest) -> ApiResult<QuizResponse> {
        req.validate()?;
        let course_id = parse_object_id(&req.course_id, "course_id")?;
        self.policy.require_edit(user, course_id).await?;

        let hub_id = match req.hub_id.as_deref() {
            Some(raw) => {
                let hub_id = parse_object_id(raw, "hub_id")?;
                let hub = self
                    .mongo
                    .collection::<Hub>(db::HUBS)
                    .find_one(doc! { "_id": hub_id })
                    .await?
                    .ok_or_else(|| ApiError::not_found("Hub not found"))?;
                if hub.course_id != course_id {
                    return Err(ApiError::validation(
                        "Hub must belong to the same course as the quiz",
                    ));
                }
                Some(hub_id)
            }
            None => None,
        };

        let now = Utc::now();
        let mut quiz = Quiz {
            id: None,
            course_id,
            hub_id: None,
            title: req.title.trim().to_string(),
            description: req.description,
            questions_per_attempt: req.questions_per_attempt,
            created_at: now,
            updated_at: now,
        };

        let mut session = db::begin(&self.client).await?;
        let inserted = self
            .mongo
            .collection::<Quiz>(db::QUIZZES)
            .insert_one(&quiz)
            .session(&mut session)
            .await
            .map_err(duplicate_title)?;
        let quiz_id = inserted
            .inserted_id
            .as_object_id()
            .ok_or_else(|| anyhow::anyhow!("Failed to get inserted quiz ID"))?;
        if let Some(hub_id) = hub_id {
            link_quiz_to_hub(&self.mongo, &mut session, quiz_id, hub_id).await?;
        }
        session.commit_transaction().await?;

        tracing::info!(quiz_id = %quiz_id, course_id = %course_id, "Quiz created");

        quiz.id = Some(quiz_id);
        quiz.hub_id = hub_id;
        Ok(quiz.into())
    }

    pub async fn get(&self, user: &CurrentUser, quiz_id: ObjectId) -> ApiResult<QuizResponse> {
        let quiz = self.find_quiz(quiz_id).await?;
        self.policy.require_view(user, quiz.course_id).await?;
        Ok(quiz.into())
    }

    pub async fn update(
        &self,
        user: &CurrentUser,
        quiz_id: ObjectId,
        req: UpdateQuizRequest,
    ) -> ApiResult<QuizResponse> {
        req.validate()?;
        let quiz = self.find_quiz(quiz_id).await?;
        self.policy.require_edit(user, quiz.course_id).await?;

        let mut set = doc! { "updated_at": DateTime::now() };
        if let Some(title) = &req.title {
            set.insert("title", title.trim());
        }
        if let Some(description) = &req.description {
            set.insert("description", description.as_str());
        }
        if let Some(count) = req.questions_per_attempt {
            set.insert("questions_per_attempt", count);
        }

        self.mongo
            .collection::<Quiz>(db::QUIZZES)
            .update_one(doc! { "_id": quiz_id }, doc! { "$set": set })
            .await
            .map_err(duplicate_title)?;

        Ok(self.find_quiz(quiz_id).await?.into())
    }

    pub async fn delete(&self, user: &CurrentUser, quiz_id: ObjectId) -> ApiResult<()> {
        let quiz = self.find_quiz(quiz_id).await?;
        self.policy.require_edit(user, quiz.course_id).await?;

        let mut session = db::begin(&self.client).await?;
        cascade::delete_quizzes(&self.mongo, &mut session, &[quiz_id]).await?;
        session.commit_transaction().await?;

        tracing::info!(quiz_id = %quiz_id, "Quiz deleted");
        Ok(())
    }

    /// Question bank with correctness flags; never shown to students.
    pub async fn list_questions(
        &self,
        user: &CurrentUser,
        quiz_id: ObjectId,
    ) -> ApiResult<Vec<QuestionResponse>> {
        let quiz = self.find_quiz(quiz_id).await?;
        self.policy.require_view(user, quiz.course_id).await?;
        if !user.is_staff() {
            return Err(ApiError::forbidden("Only teachers can view the question bank"));
        }

        let questions: Vec<QuizQuestion> = self
            .mongo
            .collection::<QuizQuestion>(db::QUIZ_QUESTIONS)
            .find(doc! { "quiz_id": quiz_id })
            .sort(doc! { "order_index": 1, "_id": 1 })
            .await?
            .try_collect()
            .await?;
        let question_ids: Vec<ObjectId> = questions.iter().filter_map(|q| q.id).collect();
        let answers: Vec<QuizAnswer> = self
            .mongo
            .collection::<QuizAnswer>(db::QUIZ_ANSWERS)
            .find(doc! { "question_id": { "$in": question_ids } })
            .await?
            .try_collect()
            .await?;

        Ok(assemble_questions(questions, answers))
    }

    /// Adds a question together with its answers. Without an explicit
    /// `order_index` the question goes to the end of the bank.
    pub async fn create_question(
        &self,
        user: &CurrentUser,
        quiz_id: ObjectId,
        req: CreateQuestionRequest,
    ) -> ApiResult<QuestionResponse> {
        req.validate()?;
        let quiz = self.find_quiz(quiz_id).await?;
        self.policy.require_edit(user, quiz.course_id).await?;

        let questions = self.mongo.collection::<QuizQuestion>(db::QUIZ_QUESTIONS);
        let answers_coll = self.mongo.collection::<QuizAnswer>(db::QUIZ_ANSWERS);
        let mut session = db::begin(&self.client).await?;

        let order_index = match req.order_index {
            Some(index) => index,
            None => questions
                .count_documents(doc! { "quiz_id": quiz_id })
                .session(&mut session)
                .await? as i32,
        };
        let mut question = QuizQuestion {
            id: None,
            quiz_id,
            text: req.text.trim().to_string(),
            order_index,
        };
        let inserted = questions
            .insert_one(&question)
            .session(&mut session)
            .await?;
        let question_id = inserted
            .inserted_id
            .as_object_id()
            .ok_or_else(|| anyhow::anyhow!("Failed to get inserted question ID"))?;
        question.id = Some(question_id);

        let mut answers = Vec::with_capacity(req.answers.len());
        for (position, answer) in req.answers.into_iter().enumerate() {
            let mut row = QuizAnswer {
                id: None,
                question_id,
                text: answer.text.trim().to_string(),
                is_correct: answer.is_correct,
                order_index: answer.order_index.unwrap_or(position as i32),
            };
            let inserted = answers_coll.insert_one(&row).session(&mut session).await?;
            row.id = inserted.inserted_id.as_object_id();
            answers.push(row);
        }
        session.commit_transaction().await?;

        tracing::info!(quiz_id = %quiz_id, question_id = %question_id, "Question created");

        Ok(assemble_questions(vec![question], answers)
            .pop()
            .ok_or_else(|| anyhow::anyhow!("Question vanished after insert"))?)
    }

    pub async fn update_question(
        &self,
        user: &CurrentUser,
        question_id: ObjectId,
        req: UpdateQuestionRequest,
    ) -> ApiResult<QuestionResponse> {
        req.validate()?;
        let (_, quiz) = self.find_question(question_id).await?;
        self.policy.require_edit(user, quiz.course_id).await?;

        let mut set = doc! {};
        if let Some(text) = &req.text {
            set.insert("text", text.trim());
        }
        if let Some(order_index) = req.order_index {
            set.insert("order_index", order_index);
        }
        if !set.is_empty() {
            self.mongo
                .collection::<QuizQuestion>(db::QUIZ_QUESTIONS)
                .update_one(doc! { "_id": question_id }, doc! { "$set": set })
                .await?;
        }

        let (question, _) = self.find_question(question_id).await?;
        let answers: Vec<QuizAnswer> = self
            .mongo
            .collection::<QuizAnswer>(db::QUIZ_ANSWERS)
            .find(doc! { "question_id": question_id })
            .await?
            .try_collect()
            .await?;
        Ok(assemble_questions(vec![question], answers)
            .pop()
            .ok_or_else(|| anyhow::anyhow!("Question vanished after update"))?)
    }

    pub async fn delete_question(&self, user: &CurrentUser, question_id: ObjectId) -> ApiResult<()> {
        let (_, quiz) = self.find_question(question_id).await?;
        self.policy.require_edit(user, quiz.course_id).await?;

        let mut session = db::begin(&self.client).await?;
        cascade::delete_questions(&self.mongo, &mut session, &[question_id]).await?;
        session.commit_transaction().await?;
        Ok(())
    }

    pub async fn create_answer(
        &self,
        user: &CurrentUser,
        question_id: ObjectId,
        req: CreateAnswerRequest,
    ) -> ApiResult<AnswerResponse> {
        req.validate()?;
        let (_, quiz) = self.find_question(question_id).await?;
        self.policy.require_edit(user, quiz.course_id).await?;

        let answers = self.mongo.collection::<QuizAnswer>(db::QUIZ_ANSWERS);
        let order_index = match req.order_index {
            Some(index) => index,
            None => answers
                .count_documents(doc! { "question_id": question_id })
                .await? as i32,
        };
        let mut answer = QuizAnswer {
            id: None,
            question_id,
            text: req.text.trim().to_string(),
            is_correct: req.is_correct,
            order_index,
        };
        let inserted = answers.insert_one(&answer).await?;
        answer.id = inserted.inserted_id.as_object_id();
        Ok(answer.into())
    }

    pub async fn update_answer(
        &self,
        user: &CurrentUser,
        answer_id: ObjectId,
        req: UpdateAnswerRequest,
    ) -> ApiResult<AnswerResponse> {
        req.validate()?;
        let (_, quiz) = self.find_answer(answer_id).await?;
        self.policy.require_edit(user, quiz.course_id).await?;

        let mut set = doc! {};
        if let Some(text) = &req.text {
            set.insert("text", text.trim());
        }
        if let Some(is_correct) = req.is_correct {
            set.insert("is_correct", is_correct);
        }
        if let Some(order_index) = req.order_index {
            set.insert("order_index", order_index);
        }
        let answers = self.mongo.collection::<QuizAnswer>(db::QUIZ_ANSWERS);
        if !set.is_empty() {
            answers
                .update_one(doc! { "_id": answer_id }, doc! { "$set": set })
                .await?;
        }

        let (answer, _) = self.find_answer(answer_id).await?;
        Ok(answer.into())
    }

    pub async fn delete_answer(&self, user: &CurrentUser, answer_id: ObjectId) -> ApiResult<()> {
        let (_, quiz) = self.find_answer(answer_id).await?;
        self.policy.require_edit(user, quiz.course_id).await?;

        self.mongo
            .collection::<QuizAnswer>(db::QUIZ_ANSWERS)
            .delete_one(doc! { "_id": answer_id })
            .await?;
        Ok(())
    }
}
