//! Error types.
//!
//! Three layers, mirroring where a failure can happen:
//! - [`BackendError`]: anything coming back from the hosted auth / table backend.
//! - [`ValidationError`]: form input rejected before any network call is made.
//! - [`AppError`]: what a page handler returns; renders as a [`Notice`] body.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::models::Notice;

/// BackendError
///
/// Failures of the external collaborator (GoTrue / PostgREST or the in-memory stand-in).
#[derive(Debug, Error)]
pub enum BackendError {
    /// Transport-level failure (DNS, connect, TLS, timeout).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The backend answered with a non-success status.
    #[error("{message}")]
    Api { status: u16, message: String },

    /// The backend answered, but the payload did not have the expected shape.
    #[error("unexpected response from backend: {0}")]
    Decode(String),

    /// A call needed a signed-in session and there was none.
    #[error("not signed in")]
    NotAuthenticated,

    /// Backend deliberately unavailable (used by the in-memory backend's failure toggles).
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

impl BackendError {
    /// Maps a GoTrue / PostgREST error status to the closest HTTP status for the page response.
    pub fn status_code(&self) -> StatusCode {
        match self {
            BackendError::Api { status, .. } if (400..500).contains(status) => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_REQUEST)
            }
            BackendError::NotAuthenticated => StatusCode::UNAUTHORIZED,
            _ => StatusCode::BAD_GATEWAY,
        }
    }
}

/// ValidationError
///
/// Form checks performed before a submission leaves the process. The `Display`
/// text is what the user sees.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Please fill in all fields.")]
    MissingCredentials,
    #[error("Please fill in all required fields.")]
    MissingRequiredFields,
    #[error("Full name must be at least 2 characters.")]
    FullNameTooShort,
    #[error("Password must be at least 6 characters.")]
    PasswordTooShort,
    #[error("Passwords do not match.")]
    PasswordMismatch,
    #[error("Full name is required.")]
    FullNameRequired,
    #[error("Title and code are required.")]
    CourseTitleAndCodeRequired,
}

/// AppError
///
/// The error type every page handler returns. Each variant decides the status code
/// and the notice shown to the user; the underlying cause is logged, not leaked.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A list/dashboard load failed. `what` names the data in the user-facing text.
    #[error("failed to load {what}: {source}")]
    Load {
        what: &'static str,
        #[source]
        source: BackendError,
    },

    /// A write or auth call failed; the backend's own message is shown.
    #[error("{title}: {source}")]
    Action {
        title: &'static str,
        #[source]
        source: BackendError,
    },

    /// A destructive action was requested without the explicit confirmation step.
    #[error("confirmation required: {0}")]
    ConfirmationRequired(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("not signed in")]
    Unauthorized,
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// Wraps a backend error from a write/auth action under a notice title.
    pub fn action(title: &'static str) -> impl FnOnce(BackendError) -> AppError {
        move |source| AppError::Action { title, source }
    }

    /// Wraps a backend error from a data load.
    pub fn load(what: &'static str) -> impl FnOnce(BackendError) -> AppError {
        move |source| AppError::Load { what, source }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Load { .. } => StatusCode::BAD_GATEWAY,
            AppError::Action { source, .. } => source.status_code(),
            AppError::ConfirmationRequired(_) => StatusCode::PRECONDITION_REQUIRED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
        }
    }

    /// The user-facing notice for this error.
    pub fn notice(&self) -> Notice {
        match self {
            AppError::Validation(e) => Notice::error("Validation Error", e.to_string()),
            AppError::Load { what, .. } => {
                Notice::error("Error", format!("Failed to load {what}."))
            }
            AppError::Action { title, source } => Notice::error(*title, source.to_string()),
            AppError::ConfirmationRequired(prompt) => {
                Notice::error("Confirmation Required", prompt.clone())
            }
            AppError::NotFound(what) => Notice::error("Not Found", what.clone()),
            AppError::Unauthorized => Notice::error("Unauthorized", "Please sign in."),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }
        (status, Json(self.notice())).into_response()
    }
}
