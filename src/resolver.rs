use uuid::Uuid;

use crate::{
    backend::DataState,
    error::BackendError,
    models::{Profile, Role, RoleStatus},
    session::AuthSnapshot,
};

/// Lookup
///
/// Outcome of one side of a resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    Found(T),
    Missing,
    Failed(String),
}

impl<T> From<Result<Option<T>, BackendError>> for Lookup<T> {
    fn from(result: Result<Option<T>, BackendError>) -> Self {
        match result {
            Ok(Some(value)) => Lookup::Found(value),
            Ok(None) => Lookup::Missing,
            Err(e) => Lookup::Failed(e.to_string()),
        }
    }
}

/// Resolution
///
/// The profile and role fetched for one identity. Each side succeeds or fails on
/// its own; a failure of one never discards the other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub profile: Lookup<Profile>,
    pub role: Lookup<Role>,
}

impl Resolution {
    /// Writes the result into the snapshot.
    ///
    /// With `keep_prior_on_failure` (a refresh for an identity that was already
    /// resolved) a failed side leaves the previous value in place.
    pub(crate) fn apply_to(self, snapshot: &mut AuthSnapshot, keep_prior_on_failure: bool) {
        match self.role {
            Lookup::Found(role) => snapshot.role = RoleStatus::Resolved { role },
            Lookup::Missing => snapshot.role = RoleStatus::Unassigned,
            Lookup::Failed(reason) => {
                if !(keep_prior_on_failure && snapshot.role.role().is_some()) {
                    snapshot.role = RoleStatus::Failed { reason };
                }
            }
        }
        match self.profile {
            Lookup::Found(profile) => snapshot.profile = Some(profile),
            Lookup::Missing => snapshot.profile = None,
            Lookup::Failed(_) if keep_prior_on_failure => {}
            Lookup::Failed(_) => snapshot.profile = None,
        }
    }
}

/// RoleResolver
///
/// Maps an identity to its role (`user_roles`) and profile (`profiles`).
/// Holds no state of its own; the session store decides whether a result is still
/// wanted when it arrives.
#[derive(Clone)]
pub struct RoleResolver {
    data: DataState,
}

impl RoleResolver {
    pub fn new(data: DataState) -> Self {
        Self { data }
    }

    /// Runs both lookups concurrently and reports each outcome separately.
    pub async fn resolve(&self, user_id: Uuid) -> Resolution {
        let (profile, role) = tokio::join!(
            self.data.get_profile(user_id),
            self.data.get_role(user_id)
        );

        let profile = Lookup::from(profile);
        let role = Lookup::from(role);

        if let Lookup::Failed(reason) = &profile {
            tracing::warn!(%user_id, %reason, "profile lookup failed");
        }
        match &role {
            Lookup::Failed(reason) => tracing::warn!(%user_id, %reason, "role lookup failed"),
            Lookup::Missing => tracing::warn!(%user_id, "identity has no role record"),
            Lookup::Found(role) => tracing::debug!(%user_id, %role, "role resolved"),
        }

        Resolution { profile, role }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Identity;

    fn resolved_snapshot() -> AuthSnapshot {
        let identity = Identity {
            id: Uuid::new_v4(),
            email: "t@uni.edu".into(),
        };
        let profile = Profile {
            id: Uuid::new_v4(),
            user_id: identity.id,
            full_name: "Theo".into(),
            email: identity.email.clone(),
            avatar_url: None,
            phone: None,
            batch: None,
        };
        AuthSnapshot::signed_in(identity, RoleStatus::Resolved { role: Role::Teacher }, Some(profile))
    }

    #[test]
    fn failed_refresh_keeps_what_was_known() {
        let mut snapshot = resolved_snapshot();
        let failed = Resolution {
            profile: Lookup::Failed("timeout".into()),
            role: Lookup::Failed("timeout".into()),
        };
        failed.apply_to(&mut snapshot, true);
        assert_eq!(snapshot.role.role(), Some(Role::Teacher));
        assert!(snapshot.profile.is_some());
    }

    #[test]
    fn failed_first_resolution_marks_the_role_failed() {
        let mut snapshot = resolved_snapshot();
        let failed = Resolution {
            profile: Lookup::Missing,
            role: Lookup::Failed("timeout".into()),
        };
        failed.apply_to(&mut snapshot, false);
        assert!(matches!(snapshot.role, RoleStatus::Failed { .. }));
        assert!(snapshot.profile.is_none());
    }

    #[test]
    fn missing_role_is_unassigned_not_failed() {
        let mut snapshot = resolved_snapshot();
        Resolution {
            profile: Lookup::Missing,
            role: Lookup::Missing,
        }
        .apply_to(&mut snapshot, true);
        assert_eq!(snapshot.role, RoleStatus::Unassigned);
    }
}
