//! External collaborator contracts.
//!
//! The hosted backend provides two things: authentication (sessions and
//! session-change notifications) and tables behind row level security.
//! Both are traits so the session store and page handlers can run against the
//! real Supabase project ([`SupabaseClient`]) or an in-process stand-in
//! ([`InMemoryBackend`]) without knowing which.

use std::sync::{
    Arc, Weak,
    atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::{
    error::BackendError,
    models::{
        AuthEvent, Course, CourseOrder, CoursePayload, EnrolledStudent, Enrollment, Profile,
        ProfileUpdate, Role, RoleMember, Session, SignUpAttributes, TeacherName,
    },
};

pub mod memory;
pub mod supabase;

pub use memory::InMemoryBackend;
pub use supabase::SupabaseClient;

/// Callback invoked on every sign-in, sign-out and token refresh.
pub type SessionListener = Arc<dyn Fn(AuthEvent, Option<Session>) + Send + Sync>;

/// AuthBackend
///
/// Authentication half of the external collaborator.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// One-shot read of the current (or persisted) session.
    async fn get_session(&self) -> Result<Option<Session>, BackendError>;

    /// Registers a session-change listener. The listener stays registered until the
    /// returned [`Subscription`] is unsubscribed or dropped.
    fn on_session_change(&self, listener: SessionListener) -> Subscription;

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, BackendError>;

    /// Creates an account. Returns a session only when the project auto-confirms
    /// new users; otherwise the user must verify their email first.
    async fn sign_up(&self, attributes: &SignUpAttributes)
    -> Result<Option<Session>, BackendError>;

    /// Revokes `session` remotely. The local session is dropped (and `SignedOut`
    /// emitted) only if `session` is still the current one; a sign-in that landed in
    /// the meantime is kept.
    async fn sign_out(&self, session: &Session) -> Result<(), BackendError>;

    /// The session the backend currently holds, without any network call.
    fn active_session(&self) -> Option<Session>;
}

/// DataBackend
///
/// Table half of the external collaborator. Row level security decides what the
/// signed-in user may read or write; these calls just surface the outcome.
#[async_trait]
pub trait DataBackend: Send + Sync {
    // --- profiles ---
    async fn get_profile(&self, user_id: Uuid) -> Result<Option<Profile>, BackendError>;
    async fn update_profile(
        &self,
        user_id: Uuid,
        update: &ProfileUpdate,
    ) -> Result<(), BackendError>;
    async fn list_teacher_names(&self) -> Result<Vec<TeacherName>, BackendError>;

    // --- user_roles ---
    async fn get_role(&self, user_id: Uuid) -> Result<Option<Role>, BackendError>;
    async fn set_role(&self, user_id: Uuid, role: Role) -> Result<(), BackendError>;
    async fn list_role_members(&self, role: Role) -> Result<Vec<RoleMember>, BackendError>;

    // --- courses ---
    async fn list_courses(&self, order: CourseOrder) -> Result<Vec<Course>, BackendError>;
    async fn list_teacher_courses(&self, teacher_id: Uuid) -> Result<Vec<Course>, BackendError>;
    async fn get_course(&self, id: Uuid) -> Result<Option<Course>, BackendError>;
    async fn create_course(&self, payload: &CoursePayload) -> Result<Course, BackendError>;
    async fn update_course(
        &self,
        id: Uuid,
        payload: &CoursePayload,
    ) -> Result<Option<Course>, BackendError>;
    /// Returns false when no course had that id.
    async fn delete_course(&self, id: Uuid) -> Result<bool, BackendError>;

    // --- enrollments ---
    async fn list_student_enrollments(
        &self,
        student_id: Uuid,
    ) -> Result<Vec<Enrollment>, BackendError>;
    async fn list_course_enrollments(
        &self,
        course_id: Uuid,
    ) -> Result<Vec<EnrolledStudent>, BackendError>;
    async fn enroll(&self, student_id: Uuid, course_id: Uuid) -> Result<Enrollment, BackendError>;
    /// Returns false when the student was not enrolled.
    async fn unenroll(&self, student_id: Uuid, course_id: Uuid) -> Result<bool, BackendError>;
}

/// Both halves, as one hosted project provides them.
pub trait Backend: AuthBackend + DataBackend {}

impl<T: AuthBackend + DataBackend> Backend for T {}

pub type AuthState = Arc<dyn AuthBackend>;
pub type DataState = Arc<dyn DataBackend>;

// --- Listener bookkeeping shared by the implementations ---

type ListenerSlots = Mutex<Vec<(u64, SessionListener)>>;

/// ListenerRegistry
///
/// Holds the registered session listeners of a backend and hands out [`Subscription`]s.
#[derive(Default)]
pub struct ListenerRegistry {
    slots: Arc<ListenerSlots>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    pub fn register(&self, listener: SessionListener) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.slots.lock().push((id, listener));
        Subscription {
            id,
            slots: Arc::downgrade(&self.slots),
        }
    }

    /// Delivers an event to every listener. Listeners are called outside the lock,
    /// so a listener may register or unsubscribe without deadlocking.
    pub fn emit(&self, event: AuthEvent, session: Option<Session>) {
        let listeners: Vec<SessionListener> =
            self.slots.lock().iter().map(|(_, l)| l.clone()).collect();
        tracing::debug!(?event, listeners = listeners.len(), "emitting auth event");
        for listener in listeners {
            listener(event, session.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Subscription
///
/// Handle for a registered session listener. Unsubscribes on drop.
pub struct Subscription {
    id: u64,
    slots: Weak<ListenerSlots>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(slots) = self.slots.upgrade() {
            slots.lock().retain(|(id, _)| *id != self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn dropping_a_subscription_removes_the_listener() {
        let registry = ListenerRegistry::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let sub = registry.register(Arc::new(move |_: AuthEvent, _: Option<Session>| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        registry.emit(AuthEvent::SignedOut, None);
        assert_eq!(registry.len(), 1);

        sub.unsubscribe();
        registry.emit(AuthEvent::SignedOut, None);
        assert!(registry.is_empty());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
