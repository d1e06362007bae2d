use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post, put},
};

/// Admin Router Module
///
/// Nested under `/admin` and guarded with `Access::ADMIN`. Row level security on the
/// backend enforces the same rule again for every write.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // GET /admin?search=...
        // Students, teachers with course counts, all courses, and totals.
        .route("/", get(handlers::admin_dashboard))
        // POST /admin/courses
        .route("/courses", post(handlers::create_course))
        // PUT/DELETE /admin/courses/{id}
        // Deleting needs ?confirm=true and cascades to enrollments.
        .route(
            "/courses/{id}",
            put(handlers::update_course).delete(handlers::delete_course),
        )
        // POST /admin/users/{id}/promote
        // Changes the user's role to teacher.
        .route("/users/{id}/promote", post(handlers::promote_user))
}
