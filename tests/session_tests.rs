mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::{store_for, wait_until};
use edu_hub::{
    Access, GuardOutcome, InMemoryBackend,
    backend::{AuthBackend, DataBackend},
    guard::evaluate,
    models::{AuthEvent, ProfileUpdate, Role, RoleStatus, Session},
    resolver::{Lookup, RoleResolver},
};

fn backend() -> Arc<InMemoryBackend> {
    Arc::new(InMemoryBackend::new())
}

#[tokio::test]
async fn test_store_starts_loading_and_settles_signed_out_without_session() {
    let backend = backend();
    let store = store_for(&backend);

    let before = store.snapshot();
    assert!(before.loading);
    assert_eq!(evaluate(&before, Access::ADMIN), GuardOutcome::Loading);
    assert_eq!(evaluate(&before, Access::Public), GuardOutcome::Loading);

    store.initialize().await;

    let after = store.snapshot();
    assert!(!after.loading);
    assert!(after.identity.is_none());
    assert_eq!(after.role, RoleStatus::Unresolved);
    assert_eq!(evaluate(&after, Access::ADMIN), GuardOutcome::RedirectToLogin);
}

#[tokio::test]
async fn test_initialize_restores_stored_session_with_role_and_profile() {
    let backend = backend();
    let teacher = backend.seed_user("t@uni.edu", "teach1", "Theo Teacher", Some(Role::Teacher));
    backend.restore_session(&teacher);
    let store = store_for(&backend);

    store.initialize().await;

    let snapshot = store.snapshot();
    assert!(!snapshot.loading);
    assert_eq!(snapshot.user_id(), Some(teacher.id));
    assert_eq!(snapshot.role(), Some(Role::Teacher));
    assert_eq!(
        snapshot.profile.as_ref().map(|p| p.full_name.as_str()),
        Some("Theo Teacher")
    );
    assert_eq!(evaluate(&snapshot, Access::TEACHER), GuardOutcome::Allowed);
    assert_eq!(evaluate(&snapshot, Access::ADMIN), GuardOutcome::Denied);
}

#[tokio::test]
async fn test_failed_session_read_counts_as_signed_out() {
    let backend = backend();
    let user = backend.seed_user("s@uni.edu", "stud12", "Sam", Some(Role::Student));
    backend.restore_session(&user);
    backend.fail_session_read(true);
    let store = store_for(&backend);

    store.initialize().await;

    let snapshot = store.snapshot();
    assert!(!snapshot.loading, "loading must end even when the read fails");
    assert!(snapshot.identity.is_none());
}

#[tokio::test]
async fn test_initialize_twice_registers_one_listener() {
    let backend = backend();
    let store = store_for(&backend);

    store.initialize().await;
    store.initialize().await;

    assert_eq!(backend.listener_count(), 1);
}

#[tokio::test]
async fn test_listener_is_registered_before_the_first_resolution_finishes() {
    let backend = backend();
    let admin = backend.seed_user("a@uni.edu", "admin1", "Ada", Some(Role::Admin));
    backend.restore_session(&admin);
    let release = backend.gate_role_lookup(admin.id);
    let store = store_for(&backend);

    let init = tokio::spawn({
        let store = store.clone();
        async move { store.initialize().await }
    });
    wait_until(|| backend.role_lookup_count() >= 1).await;

    assert_eq!(backend.listener_count(), 1);
    let pending = store.snapshot();
    assert!(pending.loading);
    assert_eq!(pending.user_id(), Some(admin.id));
    assert_eq!(evaluate(&pending, Access::ADMIN), GuardOutcome::Loading);

    release.send(()).ok();
    init.await.unwrap();
    assert_eq!(evaluate(&store.snapshot(), Access::ADMIN), GuardOutcome::Allowed);
}

#[tokio::test]
async fn test_stale_resolution_is_discarded_when_identity_changes() {
    let backend = backend();
    let admin = backend.seed_user("a@uni.edu", "admin1", "Ada", Some(Role::Admin));
    backend.seed_user("b@uni.edu", "stud12", "Bea", Some(Role::Student));
    backend.restore_session(&admin);
    let release_admin = backend.gate_role_lookup(admin.id);
    let store = store_for(&backend);

    let init = tokio::spawn({
        let store = store.clone();
        async move { store.initialize().await }
    });
    wait_until(|| backend.role_lookup_count() >= 1).await;

    // Someone else signs in while the admin lookup is still in flight.
    let bea = backend.sign_in("b@uni.edu", "stud12").await.unwrap();
    let switched = store.snapshot();
    assert_eq!(switched.user_id(), Some(bea.user.id));
    assert_eq!(switched.role, RoleStatus::Unresolved);

    release_admin.send(()).ok();
    init.await.unwrap();

    let settled = store.settled().await;
    assert_eq!(settled.user_id(), Some(bea.user.id));
    assert_eq!(settled.role(), Some(Role::Student));
    assert_eq!(evaluate(&settled, Access::ADMIN), GuardOutcome::Denied);
}

#[tokio::test]
async fn test_sign_out_clears_state_before_the_remote_call() {
    let backend = backend();
    let admin = backend.seed_user("a@uni.edu", "admin1", "Ada", Some(Role::Admin));
    backend.restore_session(&admin);
    let store = store_for(&backend);
    store.initialize().await;
    assert_eq!(store.snapshot().role(), Some(Role::Admin));

    let remote = store.sign_out();

    let cleared = store.snapshot();
    assert!(cleared.identity.is_none());
    assert_eq!(cleared.role, RoleStatus::Unresolved);
    assert!(cleared.profile.is_none());
    assert_eq!(evaluate(&cleared, Access::ADMIN), GuardOutcome::RedirectToLogin);

    remote.await.unwrap();
    assert!(backend.current_session().is_none());
}

#[tokio::test]
async fn test_remote_sign_out_failure_keeps_local_state_cleared() {
    let backend = backend();
    let user = backend.seed_user("s@uni.edu", "stud12", "Sam", Some(Role::Student));
    backend.restore_session(&user);
    backend.fail_sign_out(true);
    let store = store_for(&backend);
    store.initialize().await;

    let result = store.sign_out().await;

    assert!(result.is_err());
    assert!(store.snapshot().identity.is_none());
    assert!(backend.current_session().is_none());
}

#[tokio::test]
async fn test_late_remote_sign_out_does_not_end_a_newer_sign_in() {
    let backend = backend();
    let admin = backend.seed_user("a@uni.edu", "admin1", "Ada", Some(Role::Admin));
    let student = backend.seed_user("s@uni.edu", "stud12", "Sam", Some(Role::Student));
    backend.restore_session(&admin);
    let store = store_for(&backend);
    store.initialize().await;

    // The remote half is only polled after someone else has signed in.
    let remote = store.sign_out();
    backend.sign_in("s@uni.edu", "stud12").await.unwrap();
    assert_eq!(store.settled().await.user_id(), Some(student.id));

    remote.await.unwrap();

    let after = store.snapshot();
    assert_eq!(after.user_id(), Some(student.id));
    assert_eq!(after.role(), Some(Role::Student));
    assert_eq!(
        backend.current_session().map(|s| s.user.id),
        Some(student.id)
    );
}

#[tokio::test]
async fn test_sign_out_without_backend_session_skips_the_remote_call() {
    let backend = backend();
    let store = store_for(&backend);
    store.initialize().await;
    backend.fail_sign_out(true);

    assert!(store.sign_out().await.is_ok());
    assert!(store.snapshot().identity.is_none());
}

#[tokio::test]
async fn test_switching_identity_never_exposes_previous_role() {
    let backend = backend();
    let admin = backend.seed_user("a@uni.edu", "admin1", "Ada", Some(Role::Admin));
    let student = backend.seed_user("s@uni.edu", "stud12", "Sam", Some(Role::Student));
    let store = store_for(&backend);
    store.initialize().await;

    backend.sign_in("a@uni.edu", "admin1").await.unwrap();
    let first = store.settled().await;
    assert_eq!(first.role(), Some(Role::Admin));
    assert_eq!(first.user_id(), Some(admin.id));

    store.sign_out().await.unwrap();
    let release = backend.gate_role_lookup(student.id);
    backend.sign_in("s@uni.edu", "stud12").await.unwrap();

    let mid = store.snapshot();
    assert_eq!(mid.user_id(), Some(student.id));
    assert_ne!(mid.role(), Some(Role::Admin));
    assert!(mid.profile.is_none());
    assert_ne!(evaluate(&mid, Access::ADMIN), GuardOutcome::Allowed);

    release.send(()).ok();
    let settled = store.settled().await;
    assert_eq!(settled.role(), Some(Role::Student));
}

#[tokio::test]
async fn test_identity_without_role_record_is_denied_role_pages() {
    let backend = backend();
    let orphan = backend.seed_user("o@uni.edu", "orphan1", "Otto", None);
    backend.restore_session(&orphan);
    let store = store_for(&backend);

    store.initialize().await;

    let snapshot = store.snapshot();
    assert_eq!(snapshot.role, RoleStatus::Unassigned);
    assert_eq!(evaluate(&snapshot, Access::STUDENT), GuardOutcome::Denied);
    assert_eq!(evaluate(&snapshot, Access::Authenticated), GuardOutcome::Allowed);
    assert_eq!(evaluate(&snapshot, Access::Roles(&[])), GuardOutcome::Allowed);
}

#[tokio::test]
async fn test_failed_role_lookup_is_denied_not_loading() {
    let backend = backend();
    let user = backend.seed_user("s@uni.edu", "stud12", "Sam", Some(Role::Student));
    backend.restore_session(&user);
    backend.fail_role_lookups(true);
    let store = store_for(&backend);

    store.initialize().await;

    let snapshot = store.snapshot();
    assert!(!snapshot.loading);
    assert!(matches!(snapshot.role, RoleStatus::Failed { .. }));
    // The profile lookup succeeded on its own.
    assert!(snapshot.profile.is_some());
    assert_eq!(evaluate(&snapshot, Access::STUDENT), GuardOutcome::Denied);
}

#[tokio::test]
async fn test_refresh_picks_up_profile_changes() {
    let backend = backend();
    let user = backend.seed_user("s@uni.edu", "stud12", "Sam", Some(Role::Student));
    backend.restore_session(&user);
    let store = store_for(&backend);
    store.initialize().await;

    let update = ProfileUpdate {
        full_name: Some("Samantha".to_string()),
        ..Default::default()
    };
    backend.update_profile(user.id, &update).await.unwrap();
    backend.set_role(user.id, Role::Teacher).await.unwrap();
    store.refresh().await;

    let snapshot = store.snapshot();
    assert_eq!(
        snapshot.profile.as_ref().map(|p| p.full_name.as_str()),
        Some("Samantha")
    );
    assert_eq!(snapshot.role(), Some(Role::Teacher));
}

#[tokio::test]
async fn test_failed_refresh_keeps_previous_role_and_profile() {
    let backend = backend();
    let user = backend.seed_user("t@uni.edu", "teach1", "Theo", Some(Role::Teacher));
    backend.restore_session(&user);
    let store = store_for(&backend);
    store.initialize().await;

    backend.fail_role_lookups(true);
    backend.fail_profile_lookups(true);
    store.refresh().await;

    let snapshot = store.snapshot();
    assert_eq!(snapshot.role(), Some(Role::Teacher));
    assert!(snapshot.profile.is_some());
}

#[tokio::test]
async fn test_refresh_while_signed_out_does_nothing() {
    let backend = backend();
    let store = store_for(&backend);
    store.initialize().await;

    store.refresh().await;

    assert_eq!(backend.role_lookup_count(), 0);
    assert!(store.snapshot().identity.is_none());
}

#[tokio::test]
async fn test_token_refresh_for_same_identity_keeps_role_visible() {
    let backend = backend();
    let user = backend.seed_user("t@uni.edu", "teach1", "Theo", Some(Role::Teacher));
    let session = backend.restore_session(&user);
    let store = store_for(&backend);
    store.initialize().await;

    let release = backend.gate_role_lookup(user.id);
    let lookups = backend.role_lookup_count();
    let refreshed = Session {
        access_token: "rotated".to_string(),
        expires_at: Utc::now() + Duration::hours(1),
        ..session
    };
    backend.emit(AuthEvent::TokenRefreshed, Some(refreshed));

    let during = store.snapshot();
    assert_eq!(during.role(), Some(Role::Teacher));
    assert_eq!(evaluate(&during, Access::TEACHER), GuardOutcome::Allowed);

    wait_until(|| backend.role_lookup_count() > lookups).await;
    release.send(()).ok();
}

#[tokio::test]
async fn test_signed_out_event_clears_identity() {
    let backend = backend();
    let user = backend.seed_user("s@uni.edu", "stud12", "Sam", Some(Role::Student));
    backend.restore_session(&user);
    let store = store_for(&backend);
    store.initialize().await;

    backend.emit(AuthEvent::SignedOut, None);

    let snapshot = store.snapshot();
    assert!(snapshot.identity.is_none());
    assert_eq!(snapshot.role, RoleStatus::Unresolved);
}

#[tokio::test]
async fn test_shutdown_releases_the_listener() {
    let backend = backend();
    backend.seed_user("s@uni.edu", "stud12", "Sam", Some(Role::Student));
    let store = store_for(&backend);
    store.initialize().await;
    assert_eq!(backend.listener_count(), 1);

    store.shutdown();

    assert_eq!(backend.listener_count(), 0);
    backend.sign_in("s@uni.edu", "stud12").await.unwrap();
    assert!(store.snapshot().identity.is_none());
}

#[tokio::test]
async fn test_subscribers_see_the_resolved_snapshot() {
    let backend = backend();
    let user = backend.seed_user("s@uni.edu", "stud12", "Sam", Some(Role::Student));
    let store = store_for(&backend);
    let mut changes = store.subscribe();
    store.initialize().await;

    backend.sign_in("s@uni.edu", "stud12").await.unwrap();

    let seen = changes
        .wait_for(|s| s.role() == Some(Role::Student))
        .await
        .unwrap()
        .clone();
    assert_eq!(seen.user_id(), Some(user.id));
}

#[tokio::test]
async fn test_resolving_twice_gives_identical_results() {
    let backend = backend();
    let user = backend.seed_user("t@uni.edu", "teach1", "Theo", Some(Role::Teacher));
    let resolver = RoleResolver::new(backend.clone());

    let first = resolver.resolve(user.id).await;
    let second = resolver.resolve(user.id).await;

    assert_eq!(first, second);
    assert_eq!(first.role, Lookup::Found(Role::Teacher));
}

#[tokio::test]
async fn test_partial_failure_keeps_the_side_that_succeeded() {
    let backend = backend();
    let user = backend.seed_user("t@uni.edu", "teach1", "Theo", Some(Role::Teacher));
    backend.fail_profile_lookups(true);
    let resolver = RoleResolver::new(backend.clone());

    let resolution = resolver.resolve(user.id).await;

    assert!(matches!(resolution.profile, Lookup::Failed(_)));
    assert_eq!(resolution.role, Lookup::Found(Role::Teacher));
}

#[tokio::test]
async fn test_missing_profile_and_role_resolve_to_missing() {
    let backend = backend();
    let user = backend.seed_user("x@uni.edu", "nobody1", "X", None);
    backend.remove_profile(user.id);
    let resolver = RoleResolver::new(backend.clone());

    let resolution = resolver.resolve(user.id).await;

    assert_eq!(resolution.profile, Lookup::Missing);
    assert_eq!(resolution.role, Lookup::Missing);
}
