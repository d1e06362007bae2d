//! Route guard.
//!
//! [`evaluate`] is a pure classifier over an [`AuthSnapshot`]. [`route_guard`] is the
//! axum middleware that runs it on every request against the session store's latest
//! snapshot and turns the outcome into a response.

use axum::{
    Json,
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use serde::Serialize;
use serde_json::json;

use crate::{
    models::{AccessDenied, Role, RoleStatus},
    session::{AuthSnapshot, SessionStore},
};

pub const LOGIN_PATH: &str = "/login";

/// Access
///
/// What a page requires of the current user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Public,
    /// Any signed-in user, whatever their role.
    Authenticated,
    /// A resolved role in this set. An empty set behaves like `Public`.
    Roles(&'static [Role]),
}

impl Access {
    pub const ADMIN: Access = Access::Roles(&[Role::Admin]);
    pub const TEACHER: Access = Access::Roles(&[Role::Teacher]);
    pub const STUDENT: Access = Access::Roles(&[Role::Student]);
}

/// GuardOutcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardOutcome {
    /// The first resolution pass, or the role lookup a role page depends on, has not
    /// finished. Render neither content nor redirect.
    Loading,
    RedirectToLogin,
    Denied,
    Allowed,
}

/// evaluate
///
/// Checks run in order: loading, then identity, then role. A role lookup still in
/// flight answers `Loading` for role pages; a missing or failed role is `Denied`.
pub fn evaluate(snapshot: &AuthSnapshot, access: Access) -> GuardOutcome {
    if snapshot.loading {
        return GuardOutcome::Loading;
    }

    let required = match access {
        Access::Public => return GuardOutcome::Allowed,
        Access::Roles([]) => return GuardOutcome::Allowed,
        Access::Authenticated => None,
        Access::Roles(roles) => Some(roles),
    };

    if snapshot.identity.is_none() {
        return GuardOutcome::RedirectToLogin;
    }

    match required {
        None => GuardOutcome::Allowed,
        Some(roles) => match &snapshot.role {
            RoleStatus::Unresolved => GuardOutcome::Loading,
            RoleStatus::Resolved { role } if roles.contains(role) => GuardOutcome::Allowed,
            _ => GuardOutcome::Denied,
        },
    }
}

impl IntoResponse for GuardOutcome {
    fn into_response(self) -> Response {
        match self {
            GuardOutcome::Loading => (
                StatusCode::SERVICE_UNAVAILABLE,
                [(header::RETRY_AFTER, "1")],
                Json(json!({ "status": "loading" })),
            )
                .into_response(),
            GuardOutcome::RedirectToLogin => Redirect::to(LOGIN_PATH).into_response(),
            GuardOutcome::Denied => {
                (StatusCode::FORBIDDEN, Json(AccessDenied::default())).into_response()
            }
            // Never rendered: the middleware hands the request on instead.
            GuardOutcome::Allowed => StatusCode::NO_CONTENT.into_response(),
        }
    }
}

/// RouteGate
///
/// Middleware state: the store to read and the requirement of the wrapped routes.
#[derive(Clone)]
pub struct RouteGate {
    pub store: SessionStore,
    pub access: Access,
}

impl RouteGate {
    pub fn new(store: SessionStore, access: Access) -> Self {
        Self { store, access }
    }
}

/// route_guard
///
/// Evaluated per request, so a session change is picked up on the very next request.
pub async fn route_guard(State(gate): State<RouteGate>, request: Request, next: Next) -> Response {
    let snapshot = gate.store.snapshot();
    let outcome = evaluate(&snapshot, gate.access);

    match outcome {
        GuardOutcome::Allowed => next.run(request).await,
        other => {
            tracing::info!(
                path = %request.uri().path(),
                outcome = ?other,
                user_id = ?snapshot.user_id(),
                "route guard blocked request"
            );
            other.into_response()
        }
    }
}
