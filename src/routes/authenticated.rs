use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Authenticated Router Module
///
/// Pages for any signed-in user. Guarded with `Access::Authenticated`: anonymous
/// requests are redirected to `/login`, and no role is required.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // GET/PUT /profile
        // View and edit name, phone and batch. Saving re-resolves the session.
        .route(
            "/profile",
            get(handlers::get_profile).put(handlers::update_profile),
        )
        // POST /logout
        .route("/logout", post(handlers::logout))
}
