//! In-process backend.
//!
//! Implements both backend traits over plain maps so the session store, the route
//! guard and every page can be exercised without a Supabase project. Also used for
//! local runs with `APP_BACKEND=memory`.
//!
//! It behaves like the hosted project where the pages can observe it: sign-up
//! creates a profile and a `student` role, deleting a course removes its
//! enrollments, duplicate enrollments and course codes are conflicts, and a
//! role update that matches no row is reported as not found.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use uuid::Uuid;

use super::{AuthBackend, DataBackend, ListenerRegistry, SessionListener, Subscription};
use crate::{
    error::BackendError,
    models::{
        AuthEvent, Course, CourseOrder, CoursePayload, EnrolledStudent, Enrollment, Identity,
        Profile, ProfileUpdate, Role, RoleMember, Session, SignUpAttributes, TeacherName,
    },
};

struct Account {
    password: String,
    identity: Identity,
}

#[derive(Default)]
struct Tables {
    accounts: HashMap<String, Account>,
    profiles: HashMap<Uuid, Profile>,
    roles: HashMap<Uuid, (Uuid, Role)>,
    courses: Vec<Course>,
    enrollments: Vec<Enrollment>,
    last_stamp: Option<DateTime<Utc>>,
}

impl Tables {
    /// Strictly increasing timestamps so "newest first" is deterministic.
    fn stamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let stamp = match self.last_stamp {
            Some(last) if now <= last => last + Duration::milliseconds(1),
            _ => now,
        };
        self.last_stamp = Some(stamp);
        stamp
    }

    fn member(&self, user_id: Uuid, row_id: Uuid, role: Role) -> RoleMember {
        RoleMember {
            id: row_id,
            user_id,
            role,
            profile: self.profiles.get(&user_id).cloned(),
        }
    }
}

#[derive(Default)]
struct Faults {
    session_read: AtomicBool,
    profile_lookups: AtomicBool,
    role_lookups: AtomicBool,
    tables: AtomicBool,
    sign_out: AtomicBool,
}

fn check(flag: &AtomicBool, what: &str) -> Result<(), BackendError> {
    if flag.load(Ordering::SeqCst) {
        return Err(BackendError::Unavailable(format!("simulated {what} failure")));
    }
    Ok(())
}

fn conflict(message: impl Into<String>) -> BackendError {
    BackendError::Api {
        status: 409,
        message: message.into(),
    }
}

/// InMemoryBackend
#[derive(Default)]
pub struct InMemoryBackend {
    tables: Mutex<Tables>,
    session: Mutex<Option<Session>>,
    listeners: ListenerRegistry,
    faults: Faults,
    auto_confirm: AtomicBool,
    role_gates: Mutex<HashMap<Uuid, oneshot::Receiver<()>>>,
    role_lookups: AtomicUsize,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend pre-filled with one account per role and a few courses.
    /// Passwords are the role name followed by `123`.
    pub fn demo() -> Self {
        let backend = Self::new();
        let admin = backend.seed_user("admin@edu.local", "admin123", "Ada Admin", Some(Role::Admin));
        let teacher = backend.seed_user(
            "teacher@edu.local",
            "teacher123",
            "Theo Teacher",
            Some(Role::Teacher),
        );
        let student = backend.seed_user(
            "student@edu.local",
            "student123",
            "Sam Student",
            Some(Role::Student),
        );
        let rust = backend.seed_course("Systems Programming", "CS310", Some(teacher.id));
        backend.seed_course("Discrete Mathematics", "MA120", Some(teacher.id));
        backend.seed_course("Technical Writing", "EN200", None);
        backend.seed_enrollment(student.id, rust.id);
        tracing::info!(admin = %admin.email, "in-memory backend seeded with demo accounts");
        backend
    }

    // --- seeding ---

    /// Creates an account with a profile and, optionally, a role row.
    pub fn seed_user(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
        role: Option<Role>,
    ) -> Identity {
        let identity = Identity {
            id: Uuid::new_v4(),
            email: email.to_string(),
        };
        let mut tables = self.tables.lock();
        tables.accounts.insert(
            email.to_lowercase(),
            Account {
                password: password.to_string(),
                identity: identity.clone(),
            },
        );
        tables.profiles.insert(
            identity.id,
            Profile {
                id: Uuid::new_v4(),
                user_id: identity.id,
                full_name: full_name.to_string(),
                email: email.to_string(),
                avatar_url: None,
                phone: None,
                batch: None,
            },
        );
        if let Some(role) = role {
            tables.roles.insert(identity.id, (Uuid::new_v4(), role));
        }
        identity
    }

    pub fn seed_course(&self, title: &str, code: &str, teacher_id: Option<Uuid>) -> Course {
        let mut tables = self.tables.lock();
        let course = Course {
            id: Uuid::new_v4(),
            title: title.to_string(),
            code: code.to_string(),
            description: None,
            credits: Some(crate::models::DEFAULT_CREDITS),
            teacher_id,
            created_at: tables.stamp(),
        };
        tables.courses.push(course.clone());
        course
    }

    pub fn seed_enrollment(&self, student_id: Uuid, course_id: Uuid) -> Enrollment {
        let mut tables = self.tables.lock();
        let enrollment = Enrollment {
            id: Uuid::new_v4(),
            student_id,
            course_id,
            enrolled_at: tables.stamp(),
        };
        tables.enrollments.push(enrollment.clone());
        enrollment
    }

    pub fn remove_profile(&self, user_id: Uuid) {
        self.tables.lock().profiles.remove(&user_id);
    }

    /// Places a session in storage without notifying listeners, as if it had been
    /// persisted by a previous run.
    pub fn restore_session(&self, identity: &Identity) -> Session {
        let session = Self::issue(identity);
        *self.session.lock() = Some(session.clone());
        session
    }

    /// Pushes an arbitrary event to the registered listeners.
    pub fn emit(&self, event: AuthEvent, session: Option<Session>) {
        self.listeners.emit(event, session);
    }

    // --- test controls ---

    pub fn fail_session_read(&self, fail: bool) {
        self.faults.session_read.store(fail, Ordering::SeqCst);
    }

    pub fn fail_profile_lookups(&self, fail: bool) {
        self.faults.profile_lookups.store(fail, Ordering::SeqCst);
    }

    pub fn fail_role_lookups(&self, fail: bool) {
        self.faults.role_lookups.store(fail, Ordering::SeqCst);
    }

    /// Makes every table call other than the profile/role lookups fail.
    pub fn fail_tables(&self, fail: bool) {
        self.faults.tables.store(fail, Ordering::SeqCst);
    }

    pub fn fail_sign_out(&self, fail: bool) {
        self.faults.sign_out.store(fail, Ordering::SeqCst);
    }

    /// When set, sign-up returns a live session instead of waiting for email confirmation.
    pub fn set_auto_confirm(&self, auto_confirm: bool) {
        self.auto_confirm.store(auto_confirm, Ordering::SeqCst);
    }

    /// Holds the next role lookup for `user_id` until the returned sender fires (or is dropped).
    pub fn gate_role_lookup(&self, user_id: Uuid) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.role_gates.lock().insert(user_id, rx);
        tx
    }

    pub fn role_lookup_count(&self) -> usize {
        self.role_lookups.load(Ordering::SeqCst)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn current_session(&self) -> Option<Session> {
        self.session.lock().clone()
    }

    fn issue(identity: &Identity) -> Session {
        Session {
            access_token: format!("memory-access-{}", Uuid::new_v4()),
            refresh_token: format!("memory-refresh-{}", Uuid::new_v4()),
            expires_at: Utc::now() + Duration::hours(1),
            user: identity.clone(),
        }
    }
}

#[async_trait]
impl AuthBackend for InMemoryBackend {
    async fn get_session(&self) -> Result<Option<Session>, BackendError> {
        check(&self.faults.session_read, "session read")?;
        Ok(self.session.lock().clone())
    }

    fn on_session_change(&self, listener: SessionListener) -> Subscription {
        self.listeners.register(listener)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, BackendError> {
        let identity = {
            let tables = self.tables.lock();
            match tables.accounts.get(&email.to_lowercase()) {
                Some(account) if account.password == password => account.identity.clone(),
                _ => {
                    return Err(BackendError::Api {
                        status: 400,
                        message: "Invalid login credentials".to_string(),
                    });
                }
            }
        };
        let session = Self::issue(&identity);
        *self.session.lock() = Some(session.clone());
        self.listeners.emit(AuthEvent::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn sign_up(
        &self,
        attributes: &SignUpAttributes,
    ) -> Result<Option<Session>, BackendError> {
        let key = attributes.email.to_lowercase();
        if self.tables.lock().accounts.contains_key(&key) {
            return Err(BackendError::Api {
                status: 422,
                message: "User already registered".to_string(),
            });
        }
        let identity = self.seed_user(
            &attributes.email,
            &attributes.password,
            &attributes.full_name,
            Some(Role::Student),
        );
        if !self.auto_confirm.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let session = Self::issue(&identity);
        *self.session.lock() = Some(session.clone());
        self.listeners.emit(AuthEvent::SignedIn, Some(session.clone()));
        Ok(Some(session))
    }

    async fn sign_out(&self, session: &Session) -> Result<(), BackendError> {
        let remote = check(&self.faults.sign_out, "sign-out");
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
            self.listeners.emit(AuthEvent::SignedOut, None);
        }
        remote
    }

    fn active_session(&self) -> Option<Session> {
        self.current_session()
    }
}

#[async_trait]
impl DataBackend for InMemoryBackend {
    async fn get_profile(&self, user_id: Uuid) -> Result<Option<Profile>, BackendError> {
        check(&self.faults.profile_lookups, "profile lookup")?;
        Ok(self.tables.lock().profiles.get(&user_id).cloned())
    }

    async fn update_profile(
        &self,
        user_id: Uuid,
        update: &ProfileUpdate,
    ) -> Result<(), BackendError> {
        check(&self.faults.tables, "profile update")?;
        let mut tables = self.tables.lock();
        if let Some(profile) = tables.profiles.get_mut(&user_id) {
            if let Some(full_name) = &update.full_name {
                profile.full_name = full_name.clone();
            }
            if let Some(phone) = &update.phone {
                profile.phone = phone.clone();
            }
            if let Some(batch) = &update.batch {
                profile.batch = batch.clone();
            }
        }
        Ok(())
    }

    async fn list_teacher_names(&self) -> Result<Vec<TeacherName>, BackendError> {
        check(&self.faults.tables, "profile listing")?;
        Ok(self
            .tables
            .lock()
            .profiles
            .values()
            .map(|p| TeacherName {
                user_id: p.user_id,
                full_name: p.full_name.clone(),
            })
            .collect())
    }

    async fn get_role(&self, user_id: Uuid) -> Result<Option<Role>, BackendError> {
        self.role_lookups.fetch_add(1, Ordering::SeqCst);
        let gate = self.role_gates.lock().remove(&user_id);
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        check(&self.faults.role_lookups, "role lookup")?;
        Ok(self.tables.lock().roles.get(&user_id).map(|(_, role)| *role))
    }

    async fn set_role(&self, user_id: Uuid, role: Role) -> Result<(), BackendError> {
        check(&self.faults.tables, "role update")?;
        match self.tables.lock().roles.get_mut(&user_id) {
            Some(entry) => {
                entry.1 = role;
                Ok(())
            }
            None => Err(BackendError::Api {
                status: 404,
                message: "No role record for this user".to_string(),
            }),
        }
    }

    async fn list_role_members(&self, role: Role) -> Result<Vec<RoleMember>, BackendError> {
        check(&self.faults.tables, "role listing")?;
        let tables = self.tables.lock();
        let mut members: Vec<RoleMember> = tables
            .roles
            .iter()
            .filter(|(_, (_, r))| *r == role)
            .map(|(user_id, (row_id, r))| tables.member(*user_id, *row_id, *r))
            .collect();
        members.sort_by(|a, b| {
            let name = |m: &RoleMember| m.profile.as_ref().map(|p| p.full_name.clone());
            name(a).cmp(&name(b))
        });
        Ok(members)
    }

    async fn list_courses(&self, order: CourseOrder) -> Result<Vec<Course>, BackendError> {
        check(&self.faults.tables, "course listing")?;
        let mut courses = self.tables.lock().courses.clone();
        match order {
            CourseOrder::TitleAsc => courses.sort_by(|a, b| a.title.cmp(&b.title)),
            CourseOrder::NewestFirst => courses.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        }
        Ok(courses)
    }

    async fn list_teacher_courses(&self, teacher_id: Uuid) -> Result<Vec<Course>, BackendError> {
        let mut courses = self.list_courses(CourseOrder::NewestFirst).await?;
        courses.retain(|c| c.teacher_id == Some(teacher_id));
        Ok(courses)
    }

    async fn get_course(&self, id: Uuid) -> Result<Option<Course>, BackendError> {
        check(&self.faults.tables, "course lookup")?;
        Ok(self.tables.lock().courses.iter().find(|c| c.id == id).cloned())
    }

    async fn create_course(&self, payload: &CoursePayload) -> Result<Course, BackendError> {
        check(&self.faults.tables, "course insert")?;
        let mut tables = self.tables.lock();
        if tables.courses.iter().any(|c| c.code == payload.code) {
            return Err(conflict(
                "duplicate key value violates unique constraint \"courses_code_key\"",
            ));
        }
        let course = Course {
            id: Uuid::new_v4(),
            title: payload.title.clone(),
            code: payload.code.clone(),
            description: payload.description.clone(),
            credits: Some(payload.credits),
            teacher_id: payload.teacher_id,
            created_at: tables.stamp(),
        };
        tables.courses.push(course.clone());
        Ok(course)
    }

    async fn update_course(
        &self,
        id: Uuid,
        payload: &CoursePayload,
    ) -> Result<Option<Course>, BackendError> {
        check(&self.faults.tables, "course update")?;
        let mut tables = self.tables.lock();
        if tables
            .courses
            .iter()
            .any(|c| c.id != id && c.code == payload.code)
        {
            return Err(conflict(
                "duplicate key value violates unique constraint \"courses_code_key\"",
            ));
        }
        Ok(tables.courses.iter_mut().find(|c| c.id == id).map(|course| {
            course.title = payload.title.clone();
            course.code = payload.code.clone();
            course.description = payload.description.clone();
            course.credits = Some(payload.credits);
            course.teacher_id = payload.teacher_id;
            course.clone()
        }))
    }

    async fn delete_course(&self, id: Uuid) -> Result<bool, BackendError> {
        check(&self.faults.tables, "course delete")?;
        let mut tables = self.tables.lock();
        let before = tables.courses.len();
        tables.courses.retain(|c| c.id != id);
        let removed = tables.courses.len() != before;
        if removed {
            tables.enrollments.retain(|e| e.course_id != id);
        }
        Ok(removed)
    }

    async fn list_student_enrollments(
        &self,
        student_id: Uuid,
    ) -> Result<Vec<Enrollment>, BackendError> {
        check(&self.faults.tables, "enrollment listing")?;
        Ok(self
            .tables
            .lock()
            .enrollments
            .iter()
            .filter(|e| e.student_id == student_id)
            .cloned()
            .collect())
    }

    async fn list_course_enrollments(
        &self,
        course_id: Uuid,
    ) -> Result<Vec<EnrolledStudent>, BackendError> {
        check(&self.faults.tables, "enrollment listing")?;
        let tables = self.tables.lock();
        Ok(tables
            .enrollments
            .iter()
            .filter(|e| e.course_id == course_id)
            .map(|e| EnrolledStudent {
                id: e.id,
                student_id: e.student_id,
                course_id: e.course_id,
                enrolled_at: e.enrolled_at,
                profile: tables.profiles.get(&e.student_id).cloned(),
            })
            .collect())
    }

    async fn enroll(&self, student_id: Uuid, course_id: Uuid) -> Result<Enrollment, BackendError> {
        check(&self.faults.tables, "enrollment insert")?;
        {
            let tables = self.tables.lock();
            if !tables.courses.iter().any(|c| c.id == course_id) {
                return Err(conflict(
                    "insert or update on table \"enrollments\" violates foreign key constraint",
                ));
            }
            if tables
                .enrollments
                .iter()
                .any(|e| e.student_id == student_id && e.course_id == course_id)
            {
                return Err(conflict(
                    "duplicate key value violates unique constraint \"enrollments_student_id_course_id_key\"",
                ));
            }
        }
        Ok(self.seed_enrollment(student_id, course_id))
    }

    async fn unenroll(&self, student_id: Uuid, course_id: Uuid) -> Result<bool, BackendError> {
        check(&self.faults.tables, "enrollment delete")?;
        let mut tables = self.tables.lock();
        let before = tables.enrollments.len();
        tables
            .enrollments
            .retain(|e| !(e.student_id == student_id && e.course_id == course_id));
        Ok(tables.enrollments.len() != before)
    }
}
