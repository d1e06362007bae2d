//! Supabase implementation of the backend contracts.
//!
//! Authentication goes to GoTrue (`/auth/v1`), tables go to PostgREST (`/rest/v1`).
//! Every table request carries the project `apikey` plus the signed-in user's
//! access token as bearer (or the anon key when signed out), so row level security
//! sees the right principal.

use std::{
    path::PathBuf,
    sync::{Arc, Weak},
    time::Duration as StdDuration,
};

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use jsonwebtoken::errors::ErrorKind;
use parking_lot::Mutex;
use reqwest::{RequestBuilder, Response};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

use super::{AuthBackend, DataBackend, ListenerRegistry, SessionListener, Subscription};
use crate::{
    auth,
    config::AppConfig,
    error::BackendError,
    models::{
        AuthEvent, Course, CourseOrder, CoursePayload, EnrolledStudent, Enrollment, Identity,
        Profile, ProfileUpdate, Role, RoleMember, Session, SignUpAttributes, TeacherName,
    },
};

/// Refresh this long before the access token expires.
const REFRESH_MARGIN_SECS: i64 = 60;
/// Back-off between auto-refresh attempts when there is nothing to do or a refresh failed.
const REFRESH_IDLE: StdDuration = StdDuration::from_secs(30);

// --- GoTrue wire types ---

#[derive(Debug, Deserialize)]
struct GoTrueUser {
    id: Uuid,
    email: Option<String>,
}

impl From<GoTrueUser> for Identity {
    fn from(user: GoTrueUser) -> Self {
        Identity {
            id: user.id,
            email: user.email.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
    expires_at: Option<i64>,
    user: GoTrueUser,
}

impl From<TokenResponse> for Session {
    fn from(token: TokenResponse) -> Self {
        let expires_at = token
            .expires_at
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
            .unwrap_or_else(|| Utc::now() + Duration::seconds(token.expires_in));
        Session {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at,
            user: token.user.into(),
        }
    }
}

/// `/signup` answers with a full session when the project auto-confirms users,
/// and with the bare user otherwise.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SignUpResponse {
    Session(TokenResponse),
    User(GoTrueUser),
}

/// Error bodies differ between GoTrue versions and PostgREST; take whichever text is present.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    error_description: Option<String>,
    msg: Option<String>,
    message: Option<String>,
    error: Option<String>,
}

impl ErrorBody {
    fn into_message(self) -> Option<String> {
        self.error_description
            .or(self.msg)
            .or(self.message)
            .or(self.error)
    }
}

#[derive(Debug, Deserialize)]
struct RoleRow {
    role: Role,
}

#[derive(Serialize)]
struct SignUpBody<'a> {
    email: &'a str,
    password: &'a str,
    data: SignUpMetadata<'a>,
}

#[derive(Serialize)]
struct SignUpMetadata<'a> {
    full_name: &'a str,
}

#[derive(Serialize)]
struct EnrollmentBody {
    student_id: Uuid,
    course_id: Uuid,
}

/// SupabaseClient
pub struct SupabaseClient {
    http: reqwest::Client,
    url: String,
    anon_key: String,
    jwt_secret: String,
    session_file: Option<PathBuf>,
    session: Mutex<Option<Session>>,
    listeners: ListenerRegistry,
}

impl SupabaseClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: config.supabase_url.trim_end_matches('/').to_string(),
            anon_key: config.supabase_anon_key.clone(),
            jwt_secret: config.jwt_secret.clone(),
            session_file: config.session_file.clone(),
            session: Mutex::new(None),
            listeners: ListenerRegistry::default(),
        }
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.url, path)
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.url, table)
    }

    /// Attaches the project key and the caller's bearer token.
    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let bearer = self
            .session
            .lock()
            .as_ref()
            .map(|s| s.access_token.clone())
            .unwrap_or_else(|| self.anon_key.clone());
        request.header("apikey", &self.anon_key).bearer_auth(bearer)
    }

    /// Turns a non-success response into [`BackendError::Api`] with the backend's message.
    async fn checked(response: Response) -> Result<Response, BackendError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .ok()
            .and_then(ErrorBody::into_message)
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string()
            });
        Err(BackendError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, BackendError> {
        let response = Self::checked(self.authorize(request).send().await?).await?;
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| BackendError::Decode(e.to_string()))
    }

    async fn execute(&self, request: RequestBuilder) -> Result<(), BackendError> {
        Self::checked(self.authorize(request).send().await?).await?;
        Ok(())
    }

    /// Single-row read: PostgREST returns an array, an empty one means "no row".
    async fn fetch_one<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<Option<T>, BackendError> {
        let rows: Vec<T> = self.fetch(request.query(&[("limit", "1")])).await?;
        Ok(rows.into_iter().next())
    }

    fn returning(request: RequestBuilder) -> RequestBuilder {
        request.header("Prefer", "return=representation")
    }

    // --- session handling ---

    async fn install(&self, session: Session, event: AuthEvent) {
        *self.session.lock() = Some(session.clone());
        self.persist(Some(&session)).await;
        self.listeners.emit(event, Some(session));
    }

    async fn persist(&self, session: Option<&Session>) {
        let Some(path) = &self.session_file else {
            return;
        };
        let result = match session {
            Some(session) => match serde_json::to_vec(session) {
                Ok(bytes) => tokio::fs::write(path, bytes).await,
                Err(e) => {
                    tracing::warn!(error = %e, "could not serialize session");
                    return;
                }
            },
            None => match tokio::fs::remove_file(path).await {
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                other => other,
            },
        };
        if let Err(e) = result {
            tracing::warn!(path = %path.display(), error = %e, "could not update session file");
        }
    }

    async fn load_persisted(&self) -> Option<Session> {
        let path = self.session_file.as_ref()?;
        let bytes = tokio::fs::read(path).await.ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(session) => Some(session),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable session file");
                None
            }
        }
    }

    /// Exchanges the refresh token for a new session and notifies listeners.
    pub async fn refresh_session(&self, refresh_token: &str) -> Result<Session, BackendError> {
        let request = self
            .http
            .post(self.auth_url("token"))
            .query(&[("grant_type", "refresh_token")])
            .header("apikey", &self.anon_key)
            .json(&serde_json::json!({ "refresh_token": refresh_token }));
        let response = Self::checked(request.send().await?).await?;
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        let session = Session::from(token);
        self.install(session.clone(), AuthEvent::TokenRefreshed).await;
        Ok(session)
    }

    /// Validates a persisted session before handing it out. Expired tokens are
    /// refreshed; tokens that fail verification (or a rejected refresh) are dropped.
    async fn restore(&self, stored: Session) -> Result<Option<Session>, BackendError> {
        match auth::decode_claims(&stored.access_token, &self.jwt_secret) {
            Ok(claims) if claims.sub == stored.user.id => {
                *self.session.lock() = Some(stored.clone());
                tracing::info!(user_id = %stored.user.id, "restored persisted session");
                Ok(Some(stored))
            }
            Ok(_) => {
                tracing::warn!("persisted session token does not match its user; discarding");
                self.persist(None).await;
                Ok(None)
            }
            Err(e) if matches!(e.kind(), ErrorKind::ExpiredSignature) => {
                tracing::info!("persisted session expired; refreshing");
                match self.refresh_session(&stored.refresh_token).await {
                    Ok(session) => Ok(Some(session)),
                    Err(BackendError::Api { status, message }) => {
                        tracing::warn!(status, %message, "refresh rejected; discarding session");
                        self.persist(None).await;
                        Ok(None)
                    }
                    Err(e) => Err(e),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "persisted session failed verification; discarding");
                self.persist(None).await;
                Ok(None)
            }
        }
    }

    /// Keeps the access token fresh in the background, like the hosted client library does.
    /// The task ends once the client is dropped.
    pub fn spawn_auto_refresh(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                let Some(client) = weak.upgrade() else {
                    break;
                };
                let due = client.session.lock().as_ref().map(|s| {
                    (
                        s.refresh_token.clone(),
                        s.expires_at - Duration::seconds(REFRESH_MARGIN_SECS),
                    )
                });
                let wait = match due {
                    Some((refresh_token, at)) if at <= Utc::now() => {
                        match client.refresh_session(&refresh_token).await {
                            Ok(_) => continue,
                            Err(e) => {
                                tracing::warn!(error = %e, "token refresh failed");
                                REFRESH_IDLE
                            }
                        }
                    }
                    Some((_, at)) => (at - Utc::now())
                        .to_std()
                        .unwrap_or(REFRESH_IDLE)
                        .min(REFRESH_IDLE),
                    None => REFRESH_IDLE,
                };
                drop(client);
                tokio::time::sleep(wait).await;
            }
        })
    }
}

#[async_trait]
impl AuthBackend for SupabaseClient {
    async fn get_session(&self) -> Result<Option<Session>, BackendError> {
        let current = self.session.lock().clone();
        if let Some(session) = current {
            return Ok(Some(session));
        }
        match self.load_persisted().await {
            Some(stored) => self.restore(stored).await,
            None => Ok(None),
        }
    }

    fn on_session_change(&self, listener: SessionListener) -> Subscription {
        self.listeners.register(listener)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, BackendError> {
        let request = self
            .http
            .post(self.auth_url("token"))
            .query(&[("grant_type", "password")])
            .header("apikey", &self.anon_key)
            .json(&serde_json::json!({ "email": email, "password": password }));
        let response = Self::checked(request.send().await?).await?;
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        let session = Session::from(token);
        tracing::info!(user_id = %session.user.id, "signed in");
        self.install(session.clone(), AuthEvent::SignedIn).await;
        Ok(session)
    }

    async fn sign_up(
        &self,
        attributes: &SignUpAttributes,
    ) -> Result<Option<Session>, BackendError> {
        let body = SignUpBody {
            email: &attributes.email,
            password: &attributes.password,
            data: SignUpMetadata {
                full_name: &attributes.full_name,
            },
        };
        let request = self
            .http
            .post(self.auth_url("signup"))
            .header("apikey", &self.anon_key)
            .json(&body);
        let response = Self::checked(request.send().await?).await?;
        let parsed: SignUpResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        match parsed {
            SignUpResponse::Session(token) => {
                let session = Session::from(token);
                self.install(session.clone(), AuthEvent::SignedIn).await;
                Ok(Some(session))
            }
            SignUpResponse::User(user) => {
                tracing::info!(user_id = %user.id, "account created; awaiting email confirmation");
                Ok(None)
            }
        }
    }

    async fn sign_out(&self, session: &Session) -> Result<(), BackendError> {
        let request = self
            .http
            .post(self.auth_url("logout"))
            .header("apikey", &self.anon_key)
            .bearer_auth(&session.access_token);
        let remote = match request.send().await {
            Ok(response) => Self::checked(response).await.map(|_| ()),
            Err(e) => Err(e.into()),
        };

        // The local session goes regardless of what the server said, unless a newer
        // sign-in replaced it while the request was in flight.
        let ended = {
            let mut current = self.session.lock();
            let still_current = current
                .as_ref()
                .is_some_and(|c| c.access_token == session.access_token);
            if still_current {
                current.take();
            }
            still_current
        };
        if ended {
            self.persist(None).await;
            self.listeners.emit(AuthEvent::SignedOut, None);
        } else {
            tracing::info!(
                user_id = %session.user.id,
                "session was replaced during sign-out; keeping the newer one"
            );
        }
        remote
    }

    fn active_session(&self) -> Option<Session> {
        self.session.lock().clone()
    }
}

#[async_trait]
impl DataBackend for SupabaseClient {
    async fn get_profile(&self, user_id: Uuid) -> Result<Option<Profile>, BackendError> {
        let request = self
            .http
            .get(self.rest_url("profiles"))
            .query(&[("select", "*".to_string()), ("user_id", format!("eq.{user_id}"))]);
        self.fetch_one(request).await
    }

    async fn update_profile(
        &self,
        user_id: Uuid,
        update: &ProfileUpdate,
    ) -> Result<(), BackendError> {
        let request = self
            .http
            .patch(self.rest_url("profiles"))
            .query(&[("user_id", format!("eq.{user_id}"))])
            .json(update);
        self.execute(request).await
    }

    async fn list_teacher_names(&self) -> Result<Vec<TeacherName>, BackendError> {
        let request = self
            .http
            .get(self.rest_url("profiles"))
            .query(&[("select", "user_id,full_name")]);
        self.fetch(request).await
    }

    async fn get_role(&self, user_id: Uuid) -> Result<Option<Role>, BackendError> {
        let request = self
            .http
            .get(self.rest_url("user_roles"))
            .query(&[("select", "role".to_string()), ("user_id", format!("eq.{user_id}"))]);
        let row: Option<RoleRow> = self.fetch_one(request).await?;
        Ok(row.map(|r| r.role))
    }

    async fn set_role(&self, user_id: Uuid, role: Role) -> Result<(), BackendError> {
        let request = Self::returning(
            self.http
                .patch(self.rest_url("user_roles"))
                .query(&[("user_id", format!("eq.{user_id}"))])
                .json(&serde_json::json!({ "role": role })),
        );
        let rows: Vec<serde_json::Value> = self.fetch(request).await?;
        if rows.is_empty() {
            return Err(BackendError::Api {
                status: 404,
                message: "No role record for this user".to_string(),
            });
        }
        Ok(())
    }

    async fn list_role_members(&self, role: Role) -> Result<Vec<RoleMember>, BackendError> {
        let request = self.http.get(self.rest_url("user_roles")).query(&[
            ("select", "*,profiles(*)".to_string()),
            ("role", format!("eq.{role}")),
        ]);
        self.fetch(request).await
    }

    async fn list_courses(&self, order: CourseOrder) -> Result<Vec<Course>, BackendError> {
        let order = match order {
            CourseOrder::TitleAsc => "title.asc",
            CourseOrder::NewestFirst => "created_at.desc",
        };
        let request = self
            .http
            .get(self.rest_url("courses"))
            .query(&[("select", "*"), ("order", order)]);
        self.fetch(request).await
    }

    async fn list_teacher_courses(&self, teacher_id: Uuid) -> Result<Vec<Course>, BackendError> {
        let request = self.http.get(self.rest_url("courses")).query(&[
            ("select", "*".to_string()),
            ("teacher_id", format!("eq.{teacher_id}")),
            ("order", "created_at.desc".to_string()),
        ]);
        self.fetch(request).await
    }

    async fn get_course(&self, id: Uuid) -> Result<Option<Course>, BackendError> {
        let request = self
            .http
            .get(self.rest_url("courses"))
            .query(&[("select", "*".to_string()), ("id", format!("eq.{id}"))]);
        self.fetch_one(request).await
    }

    async fn create_course(&self, payload: &CoursePayload) -> Result<Course, BackendError> {
        let request = Self::returning(self.http.post(self.rest_url("courses")).json(payload));
        let rows: Vec<Course> = self.fetch(request).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| BackendError::Decode("insert returned no row".to_string()))
    }

    async fn update_course(
        &self,
        id: Uuid,
        payload: &CoursePayload,
    ) -> Result<Option<Course>, BackendError> {
        let request = Self::returning(
            self.http
                .patch(self.rest_url("courses"))
                .query(&[("id", format!("eq.{id}"))])
                .json(payload),
        );
        let rows: Vec<Course> = self.fetch(request).await?;
        Ok(rows.into_iter().next())
    }

    async fn delete_course(&self, id: Uuid) -> Result<bool, BackendError> {
        let request = Self::returning(
            self.http
                .delete(self.rest_url("courses"))
                .query(&[("id", format!("eq.{id}"))]),
        );
        let rows: Vec<serde_json::Value> = self.fetch(request).await?;
        Ok(!rows.is_empty())
    }

    async fn list_student_enrollments(
        &self,
        student_id: Uuid,
    ) -> Result<Vec<Enrollment>, BackendError> {
        let request = self.http.get(self.rest_url("enrollments")).query(&[
            ("select", "*".to_string()),
            ("student_id", format!("eq.{student_id}")),
        ]);
        self.fetch(request).await
    }

    async fn list_course_enrollments(
        &self,
        course_id: Uuid,
    ) -> Result<Vec<EnrolledStudent>, BackendError> {
        let request = self.http.get(self.rest_url("enrollments")).query(&[
            ("select", "*,profiles(*)".to_string()),
            ("course_id", format!("eq.{course_id}")),
        ]);
        self.fetch(request).await
    }

    async fn enroll(&self, student_id: Uuid, course_id: Uuid) -> Result<Enrollment, BackendError> {
        let request = Self::returning(
            self.http
                .post(self.rest_url("enrollments"))
                .json(&EnrollmentBody {
                    student_id,
                    course_id,
                }),
        );
        let rows: Vec<Enrollment> = self.fetch(request).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| BackendError::Decode("insert returned no row".to_string()))
    }

    async fn unenroll(&self, student_id: Uuid, course_id: Uuid) -> Result<bool, BackendError> {
        let request = Self::returning(self.http.delete(self.rest_url("enrollments")).query(&[
            ("student_id", format!("eq.{student_id}")),
            ("course_id", format!("eq.{course_id}")),
        ]));
        let rows: Vec<serde_json::Value> = self.fetch(request).await?;
        Ok(!rows.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_up_response_distinguishes_session_from_user() {
        let user = serde_json::json!({ "id": Uuid::nil(), "email": "a@b.c" });
        assert!(matches!(
            serde_json::from_value::<SignUpResponse>(user.clone()).unwrap(),
            SignUpResponse::User(_)
        ));

        let session = serde_json::json!({
            "access_token": "a",
            "refresh_token": "r",
            "expires_in": 3600,
            "expires_at": 1_900_000_000,
            "token_type": "bearer",
            "user": user,
        });
        match serde_json::from_value::<SignUpResponse>(session).unwrap() {
            SignUpResponse::Session(token) => {
                let session = Session::from(token);
                assert_eq!(session.expires_at.timestamp(), 1_900_000_000);
                assert_eq!(session.user.email, "a@b.c");
            }
            SignUpResponse::User(_) => panic!("expected a session"),
        }
    }

    #[test]
    fn error_body_prefers_the_most_specific_text() {
        let body: ErrorBody = serde_json::from_str(
            r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#,
        )
        .unwrap();
        assert_eq!(body.into_message().as_deref(), Some("Invalid login credentials"));

        let body: ErrorBody =
            serde_json::from_str(r#"{"code":"23505","message":"duplicate key"}"#).unwrap();
        assert_eq!(body.into_message().as_deref(), Some("duplicate key"));
    }
}
