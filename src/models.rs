use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::ValidationError;

// --- Identity & Authorization ---

/// Role
///
/// The single authorization role held by an identity (`public.user_roles.role`).
/// Governs which dashboards a user may open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum Role {
    Admin,
    Teacher,
    Student,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
            Role::Student => "student",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Role::Admin),
            "teacher" => Some(Role::Teacher),
            "student" => Some(Role::Student),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// dashboard_path
///
/// Landing page for a role. Anything that is not admin or teacher lands on the
/// student dashboard, including an unresolved role.
pub fn dashboard_path(role: Option<Role>) -> &'static str {
    match role {
        Some(Role::Admin) => "/admin",
        Some(Role::Teacher) => "/teacher",
        _ => "/student",
    }
}

/// RoleStatus
///
/// Outcome of role resolution for the current identity. Only `Resolved` can grant
/// access to a role-gated page; the other states are distinct so a pending lookup
/// is never mistaken for "no role assigned" and vice versa.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, TS, ToSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
#[ts(export)]
pub enum RoleStatus {
    /// No completed lookup for the current identity (or no identity at all).
    #[default]
    Unresolved,
    Resolved { role: Role },
    /// Lookup succeeded but the identity has no role row.
    Unassigned,
    /// Lookup failed; the reason is kept for diagnostics.
    Failed { reason: String },
}

impl RoleStatus {
    pub fn role(&self) -> Option<Role> {
        match self {
            RoleStatus::Resolved { role } => Some(*role),
            _ => None,
        }
    }
}

/// Identity
///
/// The authenticated principal issued by GoTrue (`auth.users`). The session store
/// keeps a cached copy for as long as the session lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct Identity {
    pub id: Uuid,
    #[serde(default)]
    pub email: String,
}

/// Session
///
/// A signed-in session as handed out by the auth backend. Never sent to page clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub user: Identity,
}

/// AuthEvent
///
/// Kinds of session-change notification pushed by the auth backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthEvent {
    SignedIn,
    SignedOut,
    TokenRefreshed,
}

// --- Profiles ---

/// Profile
///
/// A row of `public.profiles`, one-to-one with an identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct Profile {
    pub id: Uuid,
    pub user_id: Uuid,
    pub full_name: String,
    pub email: String,
    pub avatar_url: Option<String>,
    pub phone: Option<String>,
    pub batch: Option<String>,
}

impl Profile {
    /// Case-insensitive match on name, email or batch. An empty term matches everything.
    pub fn matches(&self, term: &str) -> bool {
        let term = term.trim().to_lowercase();
        term.is_empty()
            || self.full_name.to_lowercase().contains(&term)
            || self.email.to_lowercase().contains(&term)
            || self
                .batch
                .as_deref()
                .is_some_and(|b| b.to_lowercase().contains(&term))
    }
}

/// Two-letter initials for avatars; `U` when there is no name.
pub fn initials(full_name: Option<&str>) -> String {
    let initials: String = full_name
        .unwrap_or_default()
        .split_whitespace()
        .filter_map(|part| part.chars().next())
        .flat_map(char::to_uppercase)
        .take(2)
        .collect();
    if initials.is_empty() { "U".to_string() } else { initials }
}

/// ProfileForm
///
/// Input payload for `PUT /profile`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct ProfileForm {
    pub full_name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub batch: String,
}

/// ProfileUpdate
///
/// Column values written to `public.profiles`. `None` fields are left untouched,
/// `Some(None)` clears the column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch: Option<Option<String>>,
}

impl ProfileForm {
    pub fn validate(&self) -> Result<ProfileUpdate, ValidationError> {
        let full_name = self.full_name.trim();
        if full_name.is_empty() {
            return Err(ValidationError::FullNameRequired);
        }
        Ok(ProfileUpdate {
            full_name: Some(full_name.to_string()),
            phone: Some(non_blank(&self.phone)),
            batch: Some(non_blank(&self.batch)),
        })
    }
}

fn non_blank(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// TeacherName
///
/// `profiles` projection used by the public catalogue to label courses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct TeacherName {
    pub user_id: Uuid,
    pub full_name: String,
}

/// RoleMember
///
/// A `user_roles` row joined with the owner's profile (`select=*,profiles(*)`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct RoleMember {
    pub id: Uuid,
    pub user_id: Uuid,
    pub role: Role,
    #[serde(rename = "profiles", default)]
    pub profile: Option<Profile>,
}

impl RoleMember {
    pub fn matches(&self, term: &str) -> bool {
        match &self.profile {
            Some(profile) => profile.matches(term),
            None => term.trim().is_empty(),
        }
    }
}

// --- Courses & Enrollments ---

/// Course
///
/// A row of `public.courses`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct Course {
    pub id: Uuid,
    pub title: String,
    pub code: String,
    pub description: Option<String>,
    pub credits: Option<i32>,
    pub teacher_id: Option<Uuid>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

impl Course {
    /// Dashboard search: title or code.
    pub fn matches(&self, term: &str) -> bool {
        let term = term.trim().to_lowercase();
        term.is_empty()
            || self.title.to_lowercase().contains(&term)
            || self.code.to_lowercase().contains(&term)
    }

    /// Catalogue search: title, code or description.
    pub fn matches_catalogue(&self, term: &str) -> bool {
        self.matches(term)
            || self
                .description
                .as_deref()
                .is_some_and(|d| d.to_lowercase().contains(&term.trim().to_lowercase()))
    }
}

/// CourseOrder
///
/// Sort orders the pages ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CourseOrder {
    TitleAsc,
    NewestFirst,
}

/// CourseForm
///
/// Input payload for creating or editing a course (admin dialog).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CourseForm {
    pub title: String,
    pub code: String,
    #[serde(default)]
    pub description: String,
    pub credits: Option<i32>,
    pub teacher_id: Option<Uuid>,
}

/// CoursePayload
///
/// Normalized column values sent to `public.courses`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoursePayload {
    pub title: String,
    pub code: String,
    pub description: Option<String>,
    pub credits: i32,
    pub teacher_id: Option<Uuid>,
}

pub const DEFAULT_CREDITS: i32 = 3;

impl CourseForm {
    pub fn validate(&self) -> Result<CoursePayload, ValidationError> {
        let title = self.title.trim();
        let code = self.code.trim();
        if title.is_empty() || code.is_empty() {
            return Err(ValidationError::CourseTitleAndCodeRequired);
        }
        Ok(CoursePayload {
            title: title.to_string(),
            code: code.to_uppercase(),
            description: non_blank(&self.description),
            credits: self.credits.filter(|c| *c > 0).unwrap_or(DEFAULT_CREDITS),
            teacher_id: self.teacher_id,
        })
    }
}

/// Enrollment
///
/// A row of `public.enrollments`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct Enrollment {
    pub id: Uuid,
    pub student_id: Uuid,
    pub course_id: Uuid,
    #[ts(type = "string")]
    pub enrolled_at: DateTime<Utc>,
}

/// EnrolledStudent
///
/// An enrollment joined with the student's profile, as listed on the teacher dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct EnrolledStudent {
    pub id: Uuid,
    pub student_id: Uuid,
    pub course_id: Uuid,
    #[ts(type = "string")]
    pub enrolled_at: DateTime<Utc>,
    #[serde(rename = "profiles", default)]
    pub profile: Option<Profile>,
}

impl EnrolledStudent {
    pub fn matches(&self, term: &str) -> bool {
        match &self.profile {
            Some(profile) => profile.matches(term),
            None => term.trim().is_empty(),
        }
    }
}

// --- Auth Forms ---

/// LoginRequest
///
/// Input payload for `POST /login`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

impl LoginRequest {
    /// Returns the trimmed email once both fields are present.
    pub fn validate(&self) -> Result<String, ValidationError> {
        let email = self.email.trim();
        if email.is_empty() || self.password.is_empty() {
            return Err(ValidationError::MissingCredentials);
        }
        Ok(email.to_string())
    }
}

/// SignupRequest
///
/// Input payload for `POST /signup`.
/// Note: the password is only passed through to GoTrue, never stored or logged here.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct SignupRequest {
    pub full_name: String,
    pub email: String,
    #[serde(default)]
    pub phone: String,
    pub password: String,
    pub confirm_password: String,
}

/// SignUpAttributes
///
/// Validated sign-up data: credentials plus the user metadata GoTrue stores on the account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignUpAttributes {
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub phone: Option<String>,
}

pub const MIN_PASSWORD_LEN: usize = 6;
pub const MIN_FULL_NAME_LEN: usize = 2;

impl SignupRequest {
    pub fn validate(&self) -> Result<SignUpAttributes, ValidationError> {
        let full_name = self.full_name.trim();
        let email = self.email.trim();
        if full_name.is_empty() || email.is_empty() || self.password.is_empty() {
            return Err(ValidationError::MissingRequiredFields);
        }
        if full_name.chars().count() < MIN_FULL_NAME_LEN {
            return Err(ValidationError::FullNameTooShort);
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ValidationError::PasswordTooShort);
        }
        if self.password != self.confirm_password {
            return Err(ValidationError::PasswordMismatch);
        }
        Ok(SignUpAttributes {
            email: email.to_string(),
            password: self.password.clone(),
            full_name: full_name.to_string(),
            phone: non_blank(&self.phone),
        })
    }
}

// --- Page Schemas (Output) ---

/// NoticeVariant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum NoticeVariant {
    Default,
    Destructive,
}

/// Notice
///
/// A dismissable user notification. Every failure and most successful actions
/// come back as one of these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct Notice {
    pub title: String,
    pub description: String,
    pub variant: NoticeVariant,
}

impl Notice {
    pub fn info(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            variant: NoticeVariant::Default,
        }
    }

    pub fn error(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            variant: NoticeVariant::Destructive,
        }
    }
}

/// ActionResponse
///
/// Result of a form submission: a notice and, optionally, where to go next.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct ActionResponse {
    pub notice: Notice,
    pub redirect: Option<String>,
}

/// AccessDenied
///
/// Body of the access-denied view, also returned by the route guard on a 403.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct AccessDenied {
    pub status: String,
    pub message: String,
    pub home: String,
}

impl Default for AccessDenied {
    fn default() -> Self {
        Self {
            status: "access_denied".to_string(),
            message: "You don't have permission to view this page.".to_string(),
            home: "/".to_string(),
        }
    }
}

/// HomePage
///
/// `GET /` summary: who is signed in and where their dashboard lives.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct HomePage {
    pub signed_in: bool,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub initials: String,
    pub role: Option<Role>,
    pub dashboard: Option<String>,
}

/// ProfilePage
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct ProfilePage {
    pub identity: Identity,
    pub role: RoleStatus,
    pub profile: Option<Profile>,
}

/// CatalogueEntry
///
/// One course on the public catalogue, labelled with its teacher's name.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct CatalogueEntry {
    pub course: Course,
    pub teacher_name: String,
}

/// TeacherSummary
///
/// A teacher row on the admin dashboard with the number of courses they teach.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct TeacherSummary {
    pub member: RoleMember,
    pub course_count: usize,
}

/// AdminDashboard
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct AdminDashboard {
    pub total_students: usize,
    pub total_teachers: usize,
    pub total_courses: usize,
    pub students: Vec<RoleMember>,
    pub teachers: Vec<TeacherSummary>,
    pub courses: Vec<Course>,
}

/// TeacherDashboard
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct TeacherDashboard {
    pub full_name: Option<String>,
    pub courses: Vec<Course>,
}

/// CourseRoster
///
/// Students enrolled in one of the teacher's courses.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct CourseRoster {
    pub course: Course,
    pub total: usize,
    pub students: Vec<EnrolledStudent>,
}

/// StudentDashboard
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct StudentDashboard {
    pub full_name: Option<String>,
    pub enrolled: Vec<Course>,
    pub available: Vec<Course>,
}

/// EnrollRequest
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct EnrollRequest {
    pub course_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(name: &str, email: &str, batch: Option<&str>) -> Profile {
        Profile {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            full_name: name.to_string(),
            email: email.to_string(),
            avatar_url: None,
            phone: None,
            batch: batch.map(str::to_string),
        }
    }

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Teacher).unwrap(), "\"teacher\"");
        assert_eq!(Role::parse("admin"), Some(Role::Admin));
        assert_eq!(Role::parse("Admin"), None);
    }

    #[test]
    fn role_status_is_internally_tagged() {
        let json = serde_json::to_value(RoleStatus::Resolved { role: Role::Admin }).unwrap();
        assert_eq!(json, serde_json::json!({ "status": "resolved", "role": "admin" }));
        let json = serde_json::to_value(RoleStatus::Unassigned).unwrap();
        assert_eq!(json, serde_json::json!({ "status": "unassigned" }));
    }

    #[test]
    fn dashboard_falls_back_to_student() {
        assert_eq!(dashboard_path(Some(Role::Admin)), "/admin");
        assert_eq!(dashboard_path(Some(Role::Teacher)), "/teacher");
        assert_eq!(dashboard_path(None), "/student");
    }

    #[test]
    fn profile_search_covers_name_email_and_batch() {
        let p = profile("Ada Lovelace", "ada@uni.edu", Some("CS-2024"));
        assert!(p.matches(""));
        assert!(p.matches("LOVE"));
        assert!(p.matches("uni.edu"));
        assert!(p.matches("cs-20"));
        assert!(!p.matches("turing"));
    }

    #[test]
    fn initials_take_first_two_words() {
        assert_eq!(initials(Some("ada king lovelace")), "AK");
        assert_eq!(initials(Some("")), "U");
        assert_eq!(initials(None), "U");
    }

    #[test]
    fn course_form_normalizes_payload() {
        let form = CourseForm {
            title: "  Operating Systems ".into(),
            code: "cs301".into(),
            description: "   ".into(),
            credits: Some(0),
            teacher_id: None,
        };
        let payload = form.validate().unwrap();
        assert_eq!(payload.title, "Operating Systems");
        assert_eq!(payload.code, "CS301");
        assert_eq!(payload.description, None);
        assert_eq!(payload.credits, DEFAULT_CREDITS);
    }

    #[test]
    fn course_form_requires_title_and_code() {
        let form = CourseForm { title: "Algebra".into(), ..Default::default() };
        assert_eq!(form.validate(), Err(ValidationError::CourseTitleAndCodeRequired));
    }

    #[test]
    fn signup_checks_run_in_order() {
        let mut req = SignupRequest {
            full_name: "A".into(),
            email: "a@b.c".into(),
            phone: String::new(),
            password: "123".into(),
            confirm_password: "456".into(),
        };
        assert_eq!(req.validate(), Err(ValidationError::FullNameTooShort));
        req.full_name = "Al".into();
        assert_eq!(req.validate(), Err(ValidationError::PasswordTooShort));
        req.password = "123456".into();
        assert_eq!(req.validate(), Err(ValidationError::PasswordMismatch));
        req.confirm_password = "123456".into();
        req.phone = " 555-0100 ".into();
        let attrs = req.validate().unwrap();
        assert_eq!(attrs.phone.as_deref(), Some("555-0100"));
    }

    #[test]
    fn login_requires_both_fields() {
        let req = LoginRequest { email: "   ".into(), password: "x".into() };
        assert_eq!(req.validate(), Err(ValidationError::MissingCredentials));
        let req = LoginRequest { email: " a@b.c ".into(), password: "x".into() };
        assert_eq!(req.validate().unwrap(), "a@b.c");
    }

    #[test]
    fn profile_form_blanks_become_null() {
        let form = ProfileForm { full_name: " Ada ".into(), phone: " ".into(), batch: "B1".into() };
        let update = form.validate().unwrap();
        assert_eq!(update.full_name.as_deref(), Some("Ada"));
        assert_eq!(update.phone, Some(None));
        assert_eq!(update.batch, Some(Some("B1".into())));
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["phone"], serde_json::Value::Null);
    }

    #[test]
    fn role_member_reads_embedded_profile() {
        let json = serde_json::json!({
            "id": Uuid::nil(),
            "user_id": Uuid::nil(),
            "role": "student",
            "profiles": null
        });
        let member: RoleMember = serde_json::from_value(json).unwrap();
        assert_eq!(member.profile, None);
        assert!(member.matches(""));
        assert!(!member.matches("x"));
    }
}
