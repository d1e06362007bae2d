use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Public Router Module
///
/// Endpoints that render for anyone. Pages here read the session snapshot when they
/// care who is signed in, but never require it.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // Liveness check; answers before the session store has settled.
        .route("/health", get(|| async { "ok" }))
        // GET /
        // Landing summary: signed-in state, initials and the role's dashboard path.
        .route("/", get(handlers::home))
        // POST /login
        // Email + password sign-in, redirecting to the role's dashboard.
        .route("/login", post(handlers::login))
        // POST /signup
        // Account creation; the user verifies their email before signing in.
        .route("/signup", post(handlers::signup))
        // GET /courses?search=...
        // Course catalogue with teacher names.
        .route("/courses", get(handlers::list_catalogue))
        // GET /access-denied
        .route("/access-denied", get(handlers::access_denied))
}
