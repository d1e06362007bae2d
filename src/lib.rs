use axum::{
    Router,
    extract::FromRef,
    http::HeaderName,
    middleware,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

// Auth gate: session state, role resolution and the per-request guard.
pub mod auth;
pub mod guard;
pub mod resolver;
pub mod session;

// Hosted backend contracts and their implementations.
pub mod backend;

pub mod config;
pub mod error;
pub mod handlers;
pub mod models;

// Routers per access level (public, authenticated, admin, teacher, student).
pub mod routes;
use routes::{admin, authenticated, public, student, teacher};

// --- Public Re-exports ---

pub use backend::{AuthState, Backend, DataState, InMemoryBackend, SupabaseClient};
pub use config::AppConfig;
pub use guard::{Access, GuardOutcome, RouteGate};
pub use session::{AuthSnapshot, SessionStore};

/// ApiDoc
///
/// OpenAPI document for every page, served at `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::home, handlers::login, handlers::signup, handlers::list_catalogue,
        handlers::access_denied, handlers::get_profile, handlers::update_profile,
        handlers::logout, handlers::admin_dashboard, handlers::create_course,
        handlers::update_course, handlers::delete_course, handlers::promote_user,
        handlers::teacher_dashboard, handlers::course_roster, handlers::student_dashboard,
        handlers::enroll, handlers::unenroll
    ),
    components(
        schemas(
            models::Role, models::RoleStatus, models::Identity, models::Profile,
            models::ProfileForm, models::Course, models::CourseForm, models::Enrollment,
            models::EnrolledStudent, models::RoleMember, models::TeacherName,
            models::LoginRequest, models::SignupRequest, models::Notice, models::NoticeVariant,
            models::ActionResponse, models::AccessDenied, models::HomePage, models::ProfilePage,
            models::CatalogueEntry, models::TeacherSummary, models::AdminDashboard,
            models::TeacherDashboard, models::CourseRoster, models::StudentDashboard,
            models::EnrollRequest, session::AuthSnapshot,
        )
    ),
    tags(
        (name = "edu-hub", description = "Role-based student management portal")
    )
)]
struct ApiDoc;

/// AppState
///
/// Everything a handler may need, shared across requests. The session store is built
/// once per process from the same backend and handed in here; nothing is global.
#[derive(Clone)]
pub struct AppState {
    pub session: SessionStore,
    pub auth: AuthState,
    pub data: DataState,
    pub config: AppConfig,
}

impl AppState {
    /// Wires a store and state around one backend serving both halves.
    pub fn new<B>(backend: std::sync::Arc<B>, config: AppConfig) -> Self
    where
        B: Backend + 'static,
    {
        let auth: AuthState = backend.clone();
        let data: DataState = backend;
        Self {
            session: SessionStore::new(auth.clone(), data.clone()),
            auth,
            data,
            config,
        }
    }
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for SessionStore {
    fn from_ref(app_state: &AppState) -> SessionStore {
        app_state.session.clone()
    }
}

impl FromRef<AppState> for AuthState {
    fn from_ref(app_state: &AppState) -> AuthState {
        app_state.auth.clone()
    }
}

impl FromRef<AppState> for DataState {
    fn from_ref(app_state: &AppState) -> DataState {
        app_state.data.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// create_router
///
/// Assembles the routers, puts each access level behind its route guard and applies
/// the tracing, request-id and CORS layers.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let x_request_id = HeaderName::from_static("x-request-id");

    let session = state.session.clone();
    let gate = |access: Access| {
        middleware::from_fn_with_state(
            RouteGate::new(session.clone(), access),
            guard::route_guard,
        )
    };

    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(public::public_routes())
        .merge(authenticated::authenticated_routes().route_layer(gate(Access::Authenticated)))
        .nest("/admin", admin::admin_routes().route_layer(gate(Access::ADMIN)))
        .nest("/teacher", teacher::teacher_routes().route_layer(gate(Access::TEACHER)))
        .nest("/student", student::student_routes().route_layer(gate(Access::STUDENT)))
        .fallback(handlers::not_found)
        .with_state(state);

    base_router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(cors)
}

/// trace_span_logger
///
/// Span for one HTTP request, tagged with its `x-request-id` so every log line of
/// the request can be correlated.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
