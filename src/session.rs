//! Session store.
//!
//! Single source of truth for "who is signed in right now": the cached identity,
//! its resolved role and profile, and whether the first resolution pass has
//! finished. The state lives in a `tokio::sync::watch` channel, so readers take
//! cheap snapshots and dependents can subscribe to changes.
//!
//! Ordering rules:
//! - `initialize` registers the backend listener before reading the stored session,
//!   so no sign-in/out that happens in between is lost.
//! - Every identity change (and every refresh) bumps a generation counter. A role
//!   resolution only commits if the counter has not moved since it started;
//!   otherwise its result belongs to an identity that is no longer current.
//! - Clearing the identity clears role and profile in the same update.

use std::{future::Future, sync::Arc};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    backend::{AuthState, DataState, SessionListener, Subscription},
    error::BackendError,
    models::{AuthEvent, Identity, Profile, Role, RoleStatus, Session},
    resolver::RoleResolver,
};

/// AuthSnapshot
///
/// The (identity, role, profile, loading) view consumed by the route guard and pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct AuthSnapshot {
    pub identity: Option<Identity>,
    pub role: RoleStatus,
    pub profile: Option<Profile>,
    /// True until the first resolution pass after process start completes.
    pub loading: bool,
    #[serde(skip)]
    generation: u64,
}

impl AuthSnapshot {
    /// State at process start: nothing known yet.
    pub fn loading() -> Self {
        Self {
            identity: None,
            role: RoleStatus::Unresolved,
            profile: None,
            loading: true,
            generation: 0,
        }
    }

    pub fn signed_out() -> Self {
        Self {
            loading: false,
            ..Self::loading()
        }
    }

    pub fn signed_in(identity: Identity, role: RoleStatus, profile: Option<Profile>) -> Self {
        Self {
            identity: Some(identity),
            role,
            profile,
            loading: false,
            generation: 0,
        }
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.identity.as_ref().map(|i| i.id)
    }

    pub fn role(&self) -> Option<Role> {
        self.role.role()
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }

    /// Nothing is pending: the first pass is done and a signed-in identity has a
    /// role outcome (resolved, unassigned or failed).
    pub fn is_settled(&self) -> bool {
        !self.loading && (self.identity.is_none() || self.role != RoleStatus::Unresolved)
    }
}

#[derive(Debug, Clone, Copy)]
struct Ticket {
    generation: u64,
    user_id: Uuid,
    /// Re-resolution for an identity that may already be resolved.
    refresh: bool,
}

enum Applied {
    /// A newer update arrived first; nothing was changed.
    Stale,
    Cleared,
    Pending(Ticket),
}

struct StoreInner {
    auth: AuthState,
    resolver: RoleResolver,
    state: watch::Sender<AuthSnapshot>,
    subscription: Mutex<Option<Subscription>>,
}

/// SessionStore
///
/// Cheap to clone; all clones share one state. Construct one per process and
/// hand it to whatever needs it.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<StoreInner>,
}

impl SessionStore {
    pub fn new(auth: AuthState, data: DataState) -> Self {
        let (state, _) = watch::channel(AuthSnapshot::loading());
        Self {
            inner: Arc::new(StoreInner {
                auth,
                resolver: RoleResolver::new(data),
                state,
                subscription: Mutex::new(None),
            }),
        }
    }

    pub fn snapshot(&self) -> AuthSnapshot {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.inner.state.subscribe()
    }

    /// Waits until [`AuthSnapshot::is_settled`] holds and returns that snapshot.
    pub async fn settled(&self) -> AuthSnapshot {
        let mut receiver = self.subscribe();
        match receiver.wait_for(AuthSnapshot::is_settled).await {
            Ok(snapshot) => snapshot.clone(),
            Err(_) => self.snapshot(),
        }
    }

    /// initialize
    ///
    /// Listener first, then one explicit read of the stored session. If the listener
    /// delivers anything while the read is in flight, the read is stale and dropped.
    /// A failed read is treated as "signed out" so loading always ends.
    pub async fn initialize(&self) {
        let baseline = {
            let mut subscription = self.inner.subscription.lock();
            if subscription.is_none() {
                *subscription = Some(self.inner.auth.on_session_change(self.listener()));
            }
            self.inner.state.borrow().generation
        };

        let session = match self.inner.auth.get_session().await {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(error = %e, "could not read stored session; starting signed out");
                None
            }
        };

        match self.apply_session(session.as_ref(), Some(baseline)) {
            Applied::Pending(ticket) => self.run(ticket).await,
            Applied::Cleared => tracing::info!("no stored session"),
            Applied::Stale => {
                tracing::debug!("session changed during startup read; keeping the newer state")
            }
        }
    }

    /// on_session_changed
    ///
    /// Replaces or clears the identity and, when one is present, resolves its role
    /// and profile before returning.
    pub async fn on_session_changed(&self, session: Option<Session>) {
        if let Applied::Pending(ticket) = self.apply_session(session.as_ref(), None) {
            self.run(ticket).await;
        }
    }

    /// refresh
    ///
    /// Re-fetches role and profile for the active identity; does nothing when signed out.
    /// Previously resolved values survive a failed refresh.
    pub async fn refresh(&self) {
        let mut ticket = None;
        self.inner.state.send_if_modified(|s| {
            let Some(identity) = &s.identity else {
                return false;
            };
            s.generation += 1;
            ticket = Some(Ticket {
                generation: s.generation,
                user_id: identity.id,
                refresh: true,
            });
            false
        });
        match ticket {
            Some(ticket) => self.run(ticket).await,
            None => tracing::debug!("refresh requested while signed out; nothing to do"),
        }
    }

    /// sign_out
    ///
    /// Local state is cleared when this is called, before the returned future is
    /// polled. The future revokes the session that was active at call time and
    /// reports the outcome. A failure does not bring the local session back, and a
    /// sign-in that happens before the future completes is left alone.
    pub fn sign_out(&self) -> impl Future<Output = Result<(), BackendError>> + Send + use<> {
        let ending = self.inner.auth.active_session();
        self.apply_session(None, None);
        tracing::info!("signed out locally");
        let auth = self.inner.auth.clone();
        async move {
            let Some(session) = ending else {
                return Ok(());
            };
            let result = auth.sign_out(&session).await;
            if let Err(e) = &result {
                tracing::warn!(error = %e, "remote sign-out failed; local session already cleared");
            }
            result
        }
    }

    /// Releases the backend subscription.
    pub fn shutdown(&self) {
        if let Some(subscription) = self.inner.subscription.lock().take() {
            subscription.unsubscribe();
            tracing::debug!("session listener released");
        }
    }

    fn listener(&self) -> SessionListener {
        let weak = Arc::downgrade(&self.inner);
        Arc::new(move |event: AuthEvent, session: Option<Session>| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let store = SessionStore { inner };
            tracing::debug!(?event, "session change notification");
            if let Applied::Pending(ticket) = store.apply_session(session.as_ref(), None) {
                match tokio::runtime::Handle::try_current() {
                    Ok(handle) => {
                        handle.spawn(async move { store.run(ticket).await });
                    }
                    Err(_) => {
                        tracing::error!("no async runtime available; role resolution skipped")
                    }
                }
            }
        })
    }

    /// The synchronous half of a session change.
    ///
    /// `only_if` makes the update conditional on the generation still matching.
    fn apply_session(&self, session: Option<&Session>, only_if: Option<u64>) -> Applied {
        let mut applied = Applied::Stale;
        self.inner.state.send_if_modified(|s| {
            if only_if.is_some_and(|generation| generation != s.generation) {
                return false;
            }
            s.generation += 1;
            match session {
                Some(session) => {
                    let same_identity = s.user_id() == Some(session.user.id);
                    if !same_identity {
                        s.role = RoleStatus::Unresolved;
                        s.profile = None;
                    }
                    s.identity = Some(session.user.clone());
                    applied = Applied::Pending(Ticket {
                        generation: s.generation,
                        user_id: session.user.id,
                        refresh: same_identity,
                    });
                }
                None => {
                    s.identity = None;
                    s.role = RoleStatus::Unresolved;
                    s.profile = None;
                    s.loading = false;
                    applied = Applied::Cleared;
                }
            }
            true
        });
        applied
    }

    /// The asynchronous half: resolve, then commit only if still current.
    async fn run(&self, ticket: Ticket) {
        let resolution = self.inner.resolver.resolve(ticket.user_id).await;
        let committed = self.inner.state.send_if_modified(|s| {
            if s.generation != ticket.generation {
                return false;
            }
            resolution.apply_to(s, ticket.refresh);
            s.loading = false;
            true
        });
        if committed {
            tracing::debug!(user_id = %ticket.user_id, "resolution committed");
        } else {
            tracing::debug!(
                user_id = %ticket.user_id,
                generation = ticket.generation,
                "discarding stale resolution"
            );
        }
    }
}
