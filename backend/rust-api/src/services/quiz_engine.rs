use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, to_bson};
use mongodb::{Client, Database};
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::json;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use super::activity_notifier::ActivityNotifier;
use super::certificate_service::CertificateService;
use super::db;
use super::progress_service::{hub_task_completion, mark_hub_completed, unlock_successors};
use crate::error::{ApiError, ApiResult};
use crate::metrics::{HUB_COMPLETIONS_TOTAL, QUIZ_ATTEMPTS_TOTAL};
use crate::models::activity::{ActivityEvent, ActivityKind};
use crate::models::course::{Course, CourseEnrollment};
use crate::models::graph::Hub;
use crate::models::parse_object_id;
use crate::models::quiz::{
    AttemptAnswerOption, AttemptQuestion, AttemptSummary, Quiz, QuizAnswer, QuizAttempt,
    QuizQuestion, StartAttemptResponse, SubmitAttemptRequest, SubmitAttemptResponse,
    SubmittedAnswer,
};
use crate::models::user::CurrentUser;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grade {
    pub score: u32,
    pub total: u32,
    pub passed: bool,
}

/// Picks `count` distinct question ids uniformly at random.
pub fn select_questions<R: Rng + ?Sized>(
    bank: &[ObjectId],
    count: usize,
    rng: &mut R,
) -> Vec<ObjectId> {
    let mut picked = bank.to_vec();
    picked.shuffle(rng);
    picked.truncate(count);
    picked
}

/// Each question is correct only when the submitted answer set equals the
/// correct set exactly. The attempt passes only if every question is correct.
pub fn grade(
    shown: &[ObjectId],
    correct: &HashMap<ObjectId, BTreeSet<ObjectId>>,
    submitted: &HashMap<ObjectId, BTreeSet<ObjectId>>,
) -> Grade {
    let empty = BTreeSet::new();
    let score = shown
        .iter()
        .filter(|question_id| {
            let expected = correct.get(question_id).unwrap_or(&empty);
            let given = submitted.get(question_id).unwrap_or(&empty);
            expected == given
        })
        .count() as u32;
    let total = shown.len() as u32;

    Grade {
        score,
        total,
        passed: score == total,
    }
}

/// A non-positive TTL disables expiry.
pub fn attempt_expired(started_at: DateTime<Utc>, now: DateTime<Utc>, ttl_seconds: i64) -> bool {
    ttl_seconds > 0 && now - started_at > Duration::seconds(ttl_seconds)
}

pub fn check_bank_size(available: usize, required: u32) -> ApiResult<()> {
    let required = required as usize;
    if available < required {
        return Err(ApiError::precondition(
            "Not enough questions in the quiz bank",
            json!({
                "required_questions": required,
                "available_questions": available,
                "shortfall": required - available,
            }),
        ));
    }
    Ok(())
}

pub struct QuizEngine {
    client: Client,
    mongo: Database,
    certificates: CertificateService,
    notifier: Arc<dyn ActivityNotifier>,
    attempt_ttl_seconds: i64,
}

impl QuizEngine {
    pub fn new(
        client: Client,
        mongo: Database,
        notifier: Arc<dyn ActivityNotifier>,
        attempt_ttl_seconds: i64,
    ) -> Self {
        Self {
            certificates: CertificateService::new(mongo.clone()),
            client,
            mongo,
            notifier,
            attempt_ttl_seconds,
        }
    }

    async fn find_hub(&self, hub_id: ObjectId) -> ApiResult<Hub> {
        self.mongo
            .collection::<Hub>(db::HUBS)
            .find_one(doc! { "_id": hub_id })
            .await?
            .ok_or_else(|| ApiError::not_found("Hub not found"))
    }

    async fn find_quiz(&self, quiz_id: ObjectId) -> ApiResult<Quiz> {
        self.mongo
            .collection::<Quiz>(db::QUIZZES)
            .find_one(doc! { "_id": quiz_id })
            .await?
            .ok_or_else(|| ApiError::not_found("Quiz not found"))
    }

    async fn find_course(&self, course_id: ObjectId) -> ApiResult<Course> {
        self.mongo
            .collection::<Course>(db::COURSES)
            .find_one(doc! { "_id": course_id })
            .await?
            .ok_or_else(|| ApiError::not_found("Course not found"))
    }

    async fn require_enrollment(&self, user: &CurrentUser, course: &Course) -> ApiResult<()> {
        let enrolled = self
            .mongo
            .collection::<CourseEnrollment>(db::COURSE_ENROLLMENTS)
            .count_documents(doc! { "user_id": user.id, "course_id": course.id })
            .await?
            > 0;
        if !enrolled {
            tracing::warn!(user_id = %user.id, course_id = ?course.id, "Quiz start without enrollment");
            return Err(ApiError::forbidden("You are not enrolled in this course"));
        }
        if course.is_locked {
            return Err(ApiError::forbidden("This course is locked"));
        }
        Ok(())
    }

    /// Opens an attempt on the quiz attached to `hub_id` with a random
    /// selection of questions, each with shuffled answers.
    pub async fn start_attempt(
        &self,
        user: &CurrentUser,
        hub_id: ObjectId,
    ) -> ApiResult<StartAttemptResponse> {
        let hub = self.find_hub(hub_id).await?;
        let quiz_id = hub
            .quiz_id
            .ok_or_else(|| ApiError::not_found("This hub has no quiz"))?;
        let quiz = self.find_quiz(quiz_id).await?;
        let course = self.find_course(hub.course_id).await?;
        self.require_enrollment(user, &course).await?;

        let mut session = db::begin(&self.client).await?;

        let (required, completed) =
            hub_task_completion(&self.mongo, &mut session, user.id, hub_id, true).await?;
        if completed.len() < required.len() {
            tracing::warn!(
                user_id = %user.id,
                hub_id = %hub_id,
                required = required.len(),
                completed = completed.len(),
                "Quiz start rejected: required tasks incomplete"
            );
            return Err(ApiError::precondition(
                "Complete all required tasks before taking the quiz",
                json!({
                    "required_tasks": required.len(),
                    "completed_required_tasks": completed.len(),
                }),
            ));
        }

        let mut cursor = self
            .mongo
            .collection::<QuizQuestion>(db::QUIZ_QUESTIONS)
            .find(doc! { "quiz_id": quiz_id })
            .sort(doc! { "_id": 1 })
            .session(&mut session)
            .await?;
        let bank: Vec<QuizQuestion> = cursor.stream(&mut session).try_collect().await?;
        check_bank_size(bank.len(), quiz.questions_per_attempt)?;

        let bank_ids: Vec<ObjectId> = bank.iter().filter_map(|q| q.id).collect();
        let selected = {
            let mut rng = rand::rng();
            select_questions(&bank_ids, quiz.questions_per_attempt as usize, &mut rng)
        };

        let mut cursor = self
            .mongo
            .collection::<QuizAnswer>(db::QUIZ_ANSWERS)
            .find(doc! { "question_id": { "$in": selected.clone() } })
            .session(&mut session)
            .await?;
        let answers: Vec<QuizAnswer> = cursor.stream(&mut session).try_collect().await?;
        let mut options: HashMap<ObjectId, Vec<AttemptAnswerOption>> = HashMap::new();
        for answer in answers {
            options
                .entry(answer.question_id)
                .or_default()
                .push(AttemptAnswerOption {
                    id: answer.id.map(|id| id.to_hex()).unwrap_or_default(),
                    text: answer.text,
                });
        }

        let by_id: HashMap<ObjectId, &QuizQuestion> = bank
            .iter()
            .filter_map(|q| q.id.map(|id| (id, q)))
            .collect();
        let questions: Vec<AttemptQuestion> = {
            let mut rng = rand::rng();
            selected
                .iter()
                .filter_map(|id| by_id.get(id).map(|q| (*id, *q)))
                .map(|(id, question)| {
                    let mut answers = options.remove(&id).unwrap_or_default();
                    answers.shuffle(&mut rng);
                    AttemptQuestion {
                        id: id.to_hex(),
                        text: question.text.clone(),
                        answers,
                    }
                })
                .collect()
        };

        let attempt = QuizAttempt {
            id: None,
            quiz_id,
            user_id: user.id,
            hub_id,
            questions_shown: selected,
            started_at: Utc::now(),
            submitted_at: None,
            answers: None,
            passed: None,
            score: None,
        };
        let inserted = self
            .mongo
            .collection::<QuizAttempt>(db::QUIZ_ATTEMPTS)
            .insert_one(&attempt)
            .session(&mut session)
            .await?;
        let attempt_id = inserted
            .inserted_id
            .as_object_id()
            .ok_or_else(|| anyhow::anyhow!("Failed to get inserted attempt ID"))?;
        session.commit_transaction().await?;

        QUIZ_ATTEMPTS_TOTAL.with_label_values(&["started"]).inc();
        tracing::info!(
            attempt_id = %attempt_id,
            quiz_id = %quiz_id,
            user_id = %user.id,
            questions = questions.len(),
            "Quiz attempt started"
        );

        Ok(StartAttemptResponse {
            attempt_id: attempt_id.to_hex(),
            quiz_id: quiz_id.to_hex(),
            hub_id: hub_id.to_hex(),
            title: quiz.title,
            description: quiz.description,
            questions,
        })
    }

    /// Grades an open attempt exactly once. A pass completes the attempt's hub
    /// and unlocks its direct successors in the same transaction.
    pub async fn submit_attempt(
        &self,
        user: &CurrentUser,
        quiz_id: ObjectId,
        req: SubmitAttemptRequest,
    ) -> ApiResult<SubmitAttemptResponse> {
        let attempt_id = parse_object_id(&req.attempt_id, "attempt_id")?;
        let attempts = self.mongo.collection::<QuizAttempt>(db::QUIZ_ATTEMPTS);
        let attempt = attempts
            .find_one(doc! { "_id": attempt_id, "user_id": user.id, "quiz_id": quiz_id })
            .await?
            .ok_or_else(|| ApiError::not_found("Attempt not found"))?;

        if attempt.submitted_at.is_some() {
            return Err(ApiError::conflict("Attempt already submitted"));
        }
        if let Some(raw) = req.hub_id.as_deref() {
            if parse_object_id(raw, "hub_id")? != attempt.hub_id {
                return Err(ApiError::validation("hub_id does not match the attempt"));
            }
        }
        if attempt_expired(attempt.started_at, Utc::now(), self.attempt_ttl_seconds) {
            tracing::warn!(attempt_id = %attempt_id, user_id = %user.id, "Expired attempt submitted");
            return Err(ApiError::conflict("Attempt has expired"));
        }

        let mut submitted: HashMap<ObjectId, BTreeSet<ObjectId>> = HashMap::new();
        for entry in &req.answers {
            let question_id = parse_object_id(&entry.question_id, "question_id")?;
            if !attempt.questions_shown.contains(&question_id) {
                continue;
            }
            let answer_ids = entry
                .answer_ids
                .iter()
                .map(|raw| parse_object_id(raw, "answer_id"))
                .collect::<ApiResult<BTreeSet<_>>>()?;
            submitted.entry(question_id).or_default().extend(answer_ids);
        }

        let correct_rows: Vec<QuizAnswer> = self
            .mongo
            .collection::<QuizAnswer>(db::QUIZ_ANSWERS)
            .find(doc! {
                "question_id": { "$in": attempt.questions_shown.clone() },
                "is_correct": true,
            })
            .await?
            .try_collect()
            .await?;
        let mut correct: HashMap<ObjectId, BTreeSet<ObjectId>> = HashMap::new();
        for answer in correct_rows {
            if let Some(id) = answer.id {
                correct.entry(answer.question_id).or_default().insert(id);
            }
        }

        let result = grade(&attempt.questions_shown, &correct, &submitted);
        let recorded: Vec<SubmittedAnswer> = attempt
            .questions_shown
            .iter()
            .map(|question_id| SubmittedAnswer {
                question_id: *question_id,
                answer_ids: submitted
                    .get(question_id)
                    .map(|ids| ids.iter().copied().collect())
                    .unwrap_or_default(),
            })
            .collect();
        let recorded = to_bson(&recorded).context("Failed to encode submitted answers")?;

        let mut session = db::begin(&self.client).await?;
        let written = attempts
            .update_one(
                doc! { "_id": attempt_id, "submitted_at": null },
                doc! { "$set": {
                    "submitted_at": mongodb::bson::DateTime::now(),
                    "answers": recorded,
                    "passed": result.passed,
                    "score": result.score as i64,
                } },
            )
            .session(&mut session)
            .await?;
        if written.matched_count == 0 {
            return Err(ApiError::conflict("Attempt already submitted"));
        }

        let unlocked = if result.passed {
            mark_hub_completed(&self.mongo, &mut session, user.id, attempt.hub_id).await?;
            unlock_successors(&self.mongo, &mut session, user.id, attempt.hub_id).await?
        } else {
            Vec::new()
        };
        session.commit_transaction().await?;

        let outcome = if result.passed { "passed" } else { "failed" };
        QUIZ_ATTEMPTS_TOTAL.with_label_values(&[outcome]).inc();
        tracing::info!(
            attempt_id = %attempt_id,
            user_id = %user.id,
            score = result.score,
            total = result.total,
            outcome,
            "Quiz attempt graded"
        );

        let certificate_id = if result.passed {
            self.after_quiz_pass(user, &attempt).await
        } else {
            None
        };

        Ok(SubmitAttemptResponse {
            passed: result.passed,
            score: result.score,
            total: result.total,
            unlocked_hub_ids: unlocked.iter().map(|id| id.to_hex()).collect(),
            certificate_id,
        })
    }

    /// Post-commit bookkeeping; failures here never undo the graded attempt.
    async fn after_quiz_pass(&self, user: &CurrentUser, attempt: &QuizAttempt) -> Option<String> {
        HUB_COMPLETIONS_TOTAL.with_label_values(&["quiz"]).inc();

        let hub = match self.find_hub(attempt.hub_id).await {
            Ok(hub) => hub,
            Err(e) => {
                tracing::error!(hub_id = %attempt.hub_id, error = %e, "Hub lookup after quiz pass failed");
                return None;
            }
        };

        let certificate_id = match self.certificates.issue_if_earned(user.id, hub.course_id).await {
            Ok(certificate) => certificate.and_then(|c| c.id).map(|id| id.to_hex()),
            Err(e) => {
                tracing::error!(
                    user_id = %user.id,
                    course_id = %hub.course_id,
                    error = %e,
                    "Certificate check after quiz pass failed"
                );
                None
            }
        };

        match self.find_course(hub.course_id).await {
            Ok(course) => self.notifier.notify(ActivityEvent::new(
                ActivityKind::HubCompleted,
                &user.name,
                &hub.title,
                &course.title,
            )),
            Err(e) => tracing::warn!(course_id = %hub.course_id, error = %e, "Skipping activity event"),
        }

        certificate_id
    }

    /// The caller's attempts on a quiz, newest first.
    pub async fn list_attempts(
        &self,
        user: &CurrentUser,
        quiz_id: ObjectId,
    ) -> ApiResult<Vec<AttemptSummary>> {
        self.find_quiz(quiz_id).await?;
        let attempts: Vec<QuizAttempt> = self
            .mongo
            .collection::<QuizAttempt>(db::QUIZ_ATTEMPTS)
            .find(doc! { "user_id": user.id, "quiz_id": quiz_id })
            .sort(doc! { "started_at": -1, "_id": -1 })
            .await?
            .try_collect()
            .await?;
        Ok(attempts.into_iter().map(AttemptSummary::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn ids(n: usize) -> Vec<ObjectId> {
        (0..n).map(|_| ObjectId::new()).collect()
    }

    fn set(ids: &[ObjectId]) -> BTreeSet<ObjectId> {
        ids.iter().copied().collect()
    }

    #[test]
    fn test_selection_is_distinct_and_drawn_from_bank() {
        let bank = ids(10);
        let mut rng = StdRng::seed_from_u64(7);

        let picked = select_questions(&bank, 5, &mut rng);

        assert_eq!(picked.len(), 5);
        assert_eq!(set(&picked).len(), 5);
        assert!(picked.iter().all(|id| bank.contains(id)));
    }

    #[test]
    fn test_bank_equal_to_requirement_is_enough() {
        assert!(check_bank_size(3, 3).is_ok());

        let bank = ids(3);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(set(&select_questions(&bank, 3, &mut rng)), set(&bank));
    }

    #[test]
    fn test_short_bank_reports_shortfall() {
        match check_bank_size(2, 5) {
            Err(ApiError::Precondition { detail, .. }) => {
                assert_eq!(detail["shortfall"], 3);
                assert_eq!(detail["available_questions"], 2);
            }
            other => panic!("expected precondition error, got {:?}", other),
        }
    }

    #[test]
    fn test_grading_is_order_independent_and_all_or_nothing() {
        let questions = ids(2);
        let (a, b, c) = (ObjectId::new(), ObjectId::new(), ObjectId::new());
        let correct = HashMap::from([
            (questions[0], set(&[a, b])),
            (questions[1], set(&[c])),
        ]);

        let all_right = HashMap::from([
            (questions[0], set(&[b, a])),
            (questions[1], set(&[c])),
        ]);
        assert_eq!(
            grade(&questions, &correct, &all_right),
            Grade { score: 2, total: 2, passed: true }
        );

        let partial_multi_select = HashMap::from([
            (questions[0], set(&[a])),
            (questions[1], set(&[c])),
        ]);
        assert_eq!(
            grade(&questions, &correct, &partial_multi_select),
            Grade { score: 1, total: 2, passed: false }
        );
    }

    #[test]
    fn test_unanswered_question_is_wrong() {
        let questions = ids(1);
        let correct = HashMap::from([(questions[0], set(&[ObjectId::new()]))]);

        let result = grade(&questions, &correct, &HashMap::new());
        assert!(!result.passed);
        assert_eq!(result.score, 0);
    }

    #[test]
    fn test_attempt_ttl() {
        let started = Utc::now();
        let later = started + Duration::seconds(120);

        assert!(!attempt_expired(started, later, 0));
        assert!(!attempt_expired(started, later, 300));
        assert!(attempt_expired(started, later, 60));
    }
}
