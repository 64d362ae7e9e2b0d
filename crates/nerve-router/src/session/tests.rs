// crates/nerve-router/src/session/tests.rs
// ============================================================================
// Module: Session Manager Tests
// Description: Unit tests for grants, expiry, leases, and ordering.
// Purpose: Pin idempotent close, in-flight pinning, and FIFO turns.
// Dependencies: nerve-core, tokio
// ============================================================================

//! ## Overview
//! Uses a manual clock for expiry and paused tokio time for ordering.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    reason = "Test-only panic-based assertions are permitted."
)]

use nerve_core::ManualClock;
use nerve_core::RequestorClass;
use nerve_core::Scope;

use super::*;

fn setup() -> (Arc<ManualClock>, SessionManager) {
    let clock = Arc::new(ManualClock::new(Timestamp::from_unix_millis(10_000)));
    let settings = SessionSettings {
        idle_timeout_ms: 1_000,
        max_grant_ttl_ms: 5_000,
        max_sessions: 4,
        max_grants_per_session: 2,
    };
    (clock.clone(), SessionManager::new(clock, settings))
}

fn user() -> Requestor {
    Requestor::new("alice", RequestorClass::User)
}

fn pattern(raw: &str) -> CapabilityPattern {
    CapabilityPattern::parse(raw).unwrap()
}

#[test]
fn open_mints_distinct_ids() {
    let (_clock, manager) = setup();
    let a = manager.open(user()).unwrap();
    let b = manager.open(user()).unwrap();
    assert_ne!(a.session_id, b.session_id);
    assert_eq!(a.state, SessionState::Open);
    assert_eq!(manager.len(), 2);
}

#[test]
fn open_or_resume_reuses_live_session() {
    let (clock, manager) = setup();
    let first = manager.open_or_resume(user()).unwrap();
    let again = manager.open_or_resume(user()).unwrap();
    assert_eq!(first.session_id, again.session_id);
    clock.advance(2_000);
    let fresh = manager.open_or_resume(user()).unwrap();
    assert_ne!(first.session_id, fresh.session_id);
}

#[test]
fn session_limit_is_enforced() {
    let (_clock, manager) = setup();
    for _ in 0..4 {
        manager.open(user()).unwrap();
    }
    assert_eq!(manager.open(user()).unwrap_err().code(), "session_limit");
}

#[test]
fn grants_bump_epoch_and_respect_limits() {
    let (_clock, manager) = setup();
    let id = manager.open(user()).unwrap().session_id;
    assert_eq!(manager.grant(&id, Grant::new(pattern("read.*"), Scope::Unrestricted)).unwrap(), 1);
    assert_eq!(manager.grant(&id, Grant::new(pattern("read.*"), Scope::Unrestricted)).unwrap(), 2);
    manager.grant(&id, Grant::new(pattern("action.fs.move"), Scope::Unrestricted)).unwrap();
    let err = manager.grant(&id, Grant::new(pattern("*"), Scope::Unrestricted)).unwrap_err();
    assert_eq!(err.code(), "grant_limit");
}

#[test]
fn elevated_grants_need_bounded_future_expiry() {
    let (clock, manager) = setup();
    let id = manager.open(user()).unwrap().session_id;
    let mut unbounded =
        Grant::elevated(pattern("action.net.disable"), Scope::Unrestricted, clock.now());
    unbounded.expires_at = None;
    assert_eq!(manager.grant(&id, unbounded).unwrap_err(), SessionError::ExpiryRequired);
    let past = Grant::elevated(pattern("action.net.disable"), Scope::Unrestricted, clock.now());
    assert_eq!(manager.grant(&id, past).unwrap_err(), SessionError::AlreadyExpired);
    let far = clock.now().saturating_add_ms(60_000);
    let long = Grant::elevated(pattern("action.net.disable"), Scope::Unrestricted, far);
    assert_eq!(manager.grant(&id, long).unwrap_err().code(), "grant_ttl_exceeded");
    let near = clock.now().saturating_add_ms(500);
    manager
        .grant(&id, Grant::elevated(pattern("action.net.disable"), Scope::Unrestricted, near))
        .unwrap();
}

#[test]
fn malformed_scope_is_rejected() {
    let (_clock, manager) = setup();
    let id = manager.open(user()).unwrap().session_id;
    let scope = Scope::PathPrefix {
        param: "path".to_string(),
        prefix: "relative/dir".to_string(),
    };
    assert_eq!(
        manager.grant(&id, Grant::new(pattern("read.file"), scope)).unwrap_err(),
        SessionError::InvalidScope
    );
}

#[test]
fn revoke_removes_matching_pattern_only() {
    let (_clock, manager) = setup();
    let id = manager.open(user()).unwrap().session_id;
    manager.grant(&id, Grant::new(pattern("read.*"), Scope::Unrestricted)).unwrap();
    assert!(!manager.revoke(&id, &pattern("read.file")).unwrap());
    assert!(manager.revoke(&id, &pattern("read.*")).unwrap());
    assert!(manager.get(&id).unwrap().grants.is_empty());
}

#[test]
fn close_is_idempotent_and_blocks_requests() {
    let (_clock, manager) = setup();
    let id = manager.open(user()).unwrap().session_id;
    manager.grant(&id, Grant::new(pattern("read.*"), Scope::Unrestricted)).unwrap();
    assert!(manager.close(&id));
    assert!(!manager.close(&id));
    assert!(manager.begin_request(&id).is_err());
    assert!(manager.grant(&id, Grant::new(pattern("read.*"), Scope::Unrestricted)).is_err());
}

#[test]
fn lazy_expiry_reports_expired_once() {
    let (clock, manager) = setup();
    let id = manager.open(user()).unwrap().session_id;
    clock.advance(1_000);
    assert_eq!(manager.begin_request(&id).err().unwrap().code(), "session_expired");
    assert_eq!(manager.begin_request(&id).err().unwrap().code(), "session_unavailable");
    assert!(!manager.close(&id));
}

#[test]
fn activity_extends_idle_window() {
    let (clock, manager) = setup();
    let id = manager.open(user()).unwrap().session_id;
    clock.advance(900);
    drop(manager.begin_request(&id).unwrap());
    clock.advance(900);
    assert!(manager.begin_request(&id).is_ok());
}

#[test]
fn sweep_skips_sessions_with_in_flight_requests() {
    let (clock, manager) = setup();
    let busy = manager.open(user()).unwrap().session_id;
    let idle = manager.open(user()).unwrap().session_id;
    let lease = manager.begin_request(&busy).unwrap();
    clock.advance(5_000);
    assert_eq!(manager.sweep(), vec![idle]);
    assert!(lease.snapshot().is_ok());
    drop(lease);
    assert_eq!(manager.sweep(), vec![busy]);
    assert!(manager.is_empty());
    assert!(manager.sweep().is_empty());
}

#[test]
fn close_with_in_flight_revokes_now_and_removes_on_release() {
    let (_clock, manager) = setup();
    let id = manager.open(user()).unwrap().session_id;
    manager.grant(&id, Grant::new(pattern("read.*"), Scope::Unrestricted)).unwrap();
    let lease = manager.begin_request(&id).unwrap();
    let epoch_before = lease.grant_epoch().unwrap();
    assert!(manager.close(&id));
    assert!(lease.grant_epoch().is_none());
    assert!(lease.snapshot().is_err());
    assert!(epoch_before > 0);
    assert_eq!(manager.len(), 1);
    drop(lease);
    assert!(manager.is_empty());
}

#[tokio::test(start_paused = true)]
async fn leases_take_turns_in_submission_order() {
    let (_clock, manager) = setup();
    let id = manager.open(user()).unwrap().session_id;
    let first = manager.begin_request(&id).unwrap();
    let second = manager.begin_request(&id).unwrap();
    let third = manager.begin_request(&id).unwrap();

    first.wait_turn().await;
    let waiting = tokio::time::timeout(Duration::from_millis(50), second.wait_turn()).await;
    assert!(waiting.is_err());

    drop(third);
    drop(first);
    tokio::time::timeout(Duration::from_millis(50), second.wait_turn()).await.unwrap();
    drop(second);

    let fourth = manager.begin_request(&id).unwrap();
    tokio::time::timeout(Duration::from_millis(50), fourth.wait_turn()).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn sweeper_task_closes_idle_sessions() {
    let clock = Arc::new(ManualClock::new(Timestamp::from_unix_millis(0)));
    let manager = SessionManager::new(clock.clone(), SessionSettings {
        idle_timeout_ms: 100,
        ..SessionSettings::default()
    });
    manager.open(user()).unwrap();
    clock.advance(200);
    let handle = manager.spawn_sweeper(Duration::from_millis(10));
    tokio::time::sleep(Duration::from_millis(25)).await;
    assert!(manager.is_empty());
    handle.abort();
}
