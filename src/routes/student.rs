use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{delete, get, post},
};

/// Student Router Module
///
/// Nested under `/student` and guarded with `Access::STUDENT`.
pub fn student_routes() -> Router<AppState> {
    Router::new()
        // GET /student
        // Enrolled and available courses.
        .route("/", get(handlers::student_dashboard))
        // POST /student/enrollments
        .route("/enrollments", post(handlers::enroll))
        // DELETE /student/enrollments/{course_id}?confirm=true
        .route("/enrollments/{course_id}", delete(handlers::unenroll))
}
