use crate::{AppState, handlers};
use axum::{Router, routing::get};

/// Teacher Router Module
///
/// Nested under `/teacher` and guarded with `Access::TEACHER`.
pub fn teacher_routes() -> Router<AppState> {
    Router::new()
        // GET /teacher
        // The teacher's own courses, newest first.
        .route("/", get(handlers::teacher_dashboard))
        // GET /teacher/courses/{id}/enrollments?search=...
        // Roster of one owned course.
        .route(
            "/courses/{id}/enrollments",
            get(handlers::course_roster),
        )
}
