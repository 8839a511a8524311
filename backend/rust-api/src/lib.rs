use axum::{
    http::{header, Method},
    middleware,
    routing::{get, patch, post, put},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod services;

pub use config::Config;
pub use services::AppState;

pub fn create_router(app_state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_origin(tower_http::cors::Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route(
            "/metrics",
            get(handlers::metrics_handler).layer(middleware::from_fn_with_state(
                app_state.clone(),
                handlers::metrics_auth_middleware,
            )),
        )
        .merge(public_auth_routes(app_state.clone()))
        .nest(
            "/api",
            api_routes()
                .route_layer(middleware::from_fn_with_state(
                    app_state.clone(),
                    middlewares::rate_limit::api_rate_limit_middleware,
                ))
                .route_layer(middleware::from_fn_with_state(
                    app_state.clone(),
                    middlewares::auth::auth_middleware,
                )),
        )
        .with_state(app_state)
        // Outermost first: the trace id exists before anything logs
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(middlewares::trace::trace_context_middleware))
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn(middlewares::metrics::metrics_middleware))
                .layer(cors),
        )
}

/// Registration and login: no token, rate-limited per client IP.
fn public_auth_routes(app_state: Arc<AppState>) -> Router<Arc<AppState>> {
    let register = Router::new()
        .route("/api/auth/register", post(handlers::auth::register))
        .route_layer(middleware::from_fn_with_state(
            app_state.clone(),
            middlewares::rate_limit::register_rate_limit_middleware,
        ));
    let login = Router::new()
        .route("/api/auth/login", post(handlers::auth::login))
        .route_layer(middleware::from_fn_with_state(
            app_state,
            middlewares::rate_limit::login_rate_limit_middleware,
        ));
    register.merge(login)
}

/// Everything under /api that needs a bearer token.
fn api_routes() -> Router<Arc<AppState>> {
    use handlers::{
        activity, answers, auth, certificates, courses, edges, hubs, questions, quizzes,
        student_quiz, tasks, users,
    };

    Router::new()
        .route("/auth/me", get(auth::me))
        // Users
        .route("/users", get(users::list_users))
        .route("/users/{id}/role", patch(users::update_role))
        // Courses and membership
        .route("/courses", get(courses::list_courses).post(courses::create_course))
        .route(
            "/courses/{id}",
            get(courses::get_course)
                .patch(courses::update_course)
                .delete(courses::delete_course),
        )
        .route("/courses/{id}/graph", get(courses::course_graph))
        .route("/courses/{id}/progress", get(courses::course_progress))
        .route(
            "/courses/{id}/teachers",
            get(courses::list_teachers).post(courses::assign_teacher),
        )
        .route(
            "/courses/{id}/teachers/{user_id}",
            axum::routing::delete(courses::remove_teacher),
        )
        .route(
            "/courses/{id}/enrollments",
            get(courses::list_enrollments).post(courses::enroll_student),
        )
        .route(
            "/courses/{id}/enrollments/{user_id}",
            axum::routing::delete(courses::unenroll_student),
        )
        // Graph
        .route("/hubs", post(hubs::create_hub))
        .route(
            "/hubs/{id}",
            get(hubs::get_hub).patch(hubs::update_hub).delete(hubs::delete_hub),
        )
        .route(
            "/hubs/{id}/content",
            get(hubs::get_hub_content).patch(hubs::set_hub_content),
        )
        .route("/hubs/{id}/progress", put(hubs::set_hub_progress))
        .route("/tasks", post(tasks::create_task))
        .route(
            "/tasks/{id}",
            get(tasks::get_task)
                .patch(tasks::update_task)
                .delete(tasks::delete_task),
        )
        .route(
            "/tasks/{id}/content",
            get(tasks::get_task_content).patch(tasks::set_task_content),
        )
        .route("/tasks/{id}/progress", put(tasks::set_task_progress))
        .route("/edges", post(edges::create_edge))
        .route(
            "/edges/{id}",
            patch(edges::update_edge).delete(edges::delete_edge),
        )
        // Quiz authoring
        .route("/quizzes", get(quizzes::list_quizzes).post(quizzes::create_quiz))
        .route(
            "/quizzes/{id}",
            get(quizzes::get_quiz)
                .patch(quizzes::update_quiz)
                .delete(quizzes::delete_quiz),
        )
        .route(
            "/questions/{id}/questions",
            get(questions::list_questions).post(questions::create_question),
        )
        .route("/questions/{id}/answers", post(questions::create_answer))
        .route(
            "/questions/{id}",
            patch(questions::update_question).delete(questions::delete_question),
        )
        .route(
            "/answers/{id}",
            patch(answers::update_answer).delete(answers::delete_answer),
        )
        // Quiz attempts
        .route(
            "/student-quiz/hubs/{hub_id}/quiz/start",
            post(student_quiz::start_attempt),
        )
        .route(
            "/student-quiz/quizzes/{quiz_id}/submit",
            post(student_quiz::submit_attempt),
        )
        .route(
            "/student-quiz/quizzes/{quiz_id}/attempts",
            get(student_quiz::list_attempts),
        )
        // Certificates
        .route("/certificates/my", get(certificates::my_certificates))
        .route(
            "/certificates/users/{user_id}",
            get(certificates::user_certificates),
        )
        .route(
            "/certificates/courses/{course_id}/claim",
            post(certificates::claim_certificate),
        )
        // Activity
        .route("/activity/stream", get(activity::activity_stream))
}
