// crates/nerve-router/src/guard/tests.rs
// ============================================================================
// Module: Permission Guard Tests
// Description: Unit and property tests for authorization decisions.
// Purpose: Pin scope checks, deny dominance, elevation, and determinism.
// Dependencies: nerve-config, nerve-core, proptest
// ============================================================================

//! ## Overview
//! Decisions are evaluated against hand-built sessions and policy snapshots.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    reason = "Test-only panic-based assertions are permitted."
)]

use nerve_config::PolicyRuleConfig;
use nerve_config::PolicyTableConfig;
use nerve_core::CapabilityPattern;
use nerve_core::Requestor;
use nerve_core::RequestorClass;
use nerve_core::Scope;
use nerve_core::SideEffect;
use proptest::prelude::*;
use serde_json::json;

use super::*;

const NOW: Timestamp = Timestamp::from_unix_millis(50_000);

fn name(raw: &str) -> CapabilityName {
    CapabilityName::parse(raw).unwrap()
}

fn pattern(raw: &str) -> CapabilityPattern {
    CapabilityPattern::parse(raw).unwrap()
}

fn session(class: RequestorClass, grants: Vec<Grant>) -> Session {
    Session {
        session_id: SessionId::new("s"),
        requestor: Requestor::new("r", class),
        grants,
        created_at: Timestamp::EPOCH,
        last_activity: NOW,
        idle_timeout_ms: 60_000,
        grant_epoch: 3,
        state: SessionState::Open,
    }
}

fn rule(
    id: &str,
    class: Option<RequestorClass>,
    cap: &str,
    effect: PolicyEffect,
) -> PolicyRuleConfig {
    PolicyRuleConfig {
        id: id.to_string(),
        requestor_class: class,
        capability: pattern(cap),
        effect,
    }
}

fn policy(rules: Vec<PolicyRuleConfig>) -> PolicySnapshot {
    PolicySnapshot::from_config(&PolicyTableConfig {
        version: 7,
        default: PolicyEffect::Deny,
        rules,
    })
    .unwrap()
}

fn var_app() -> Scope {
    Scope::PathPrefix {
        param: "path".to_string(),
        prefix: "/var/app".to_string(),
    }
}

fn read_file() -> Capability {
    Capability::read(name("read.file"))
}

#[test]
fn scoped_read_grant_allows_inside_and_denies_outside() {
    let s = session(RequestorClass::User, vec![Grant::new(pattern("read.file"), var_app())]);
    let p = policy(Vec::new());
    let cap = read_file();
    let inside = evaluate(&s, Some(&cap), &cap.name, &json!({"path": "/var/app/log.txt"}), &p, NOW);
    assert_eq!(inside.verdict, Verdict::Allow);
    assert_eq!(inside.rule_id, "grant:read.file");
    assert_eq!(inside.policy_version, 7);
    assert_eq!(inside.grant_epoch, 3);
    let outside = evaluate(&s, Some(&cap), &cap.name, &json!({"path": "/etc/shadow"}), &p, NOW);
    assert_eq!(outside.verdict, Verdict::DenyWithReason(DenyReason::ScopeViolation));
    let escape = evaluate(
        &s,
        Some(&cap),
        &cap.name,
        &json!({"path": "/var/app/../../etc/shadow"}),
        &p,
        NOW,
    );
    assert!(!escape.is_allow());
}

#[test]
fn explicit_policy_deny_dominates_grant() {
    let s = session(RequestorClass::User, vec![Grant::new(pattern("read.*"), Scope::Unrestricted)]);
    let p =
        policy(vec![rule("no-files", Some(RequestorClass::User), "read.file", PolicyEffect::Deny)]);
    let cap = read_file();
    let decision = evaluate(&s, Some(&cap), &cap.name, &json!({}), &p, NOW);
    assert_eq!(decision.verdict, Verdict::Deny);
    assert_eq!(decision.rule_id, "no-files");
}

#[test]
fn policy_fallback_applies_without_grant() {
    let s = session(RequestorClass::Guest, Vec::new());
    let p = policy(vec![rule(
        "guest-info",
        Some(RequestorClass::Guest),
        "read.system.info",
        PolicyEffect::Allow,
    )]);
    let info = Capability::read(name("read.system.info"));
    let allowed = evaluate(&s, Some(&info), &info.name, &json!({}), &p, NOW);
    assert_eq!(allowed.verdict, Verdict::Allow);
    assert_eq!(allowed.rule_id, "guest-info");
    let cap = read_file();
    let denied = evaluate(&s, Some(&cap), &cap.name, &json!({}), &p, NOW);
    assert_eq!(denied.verdict, Verdict::DenyWithReason(DenyReason::NoGrant));
    assert_eq!(denied.rule_id, nerve_config::DEFAULT_RULE_ID);
}

#[test]
fn irreversible_needs_elevation_even_when_policy_allows() {
    let s =
        session(RequestorClass::External, vec![Grant::new(pattern("read.*"), Scope::Unrestricted)]);
    let p = policy(vec![rule("allow-all", None, "*", PolicyEffect::Allow)]);
    let cap = Capability::action(name("action.network.disable"), SideEffect::Irreversible);
    let decision = evaluate(&s, Some(&cap), &cap.name, &json!({}), &p, NOW);
    assert_eq!(decision.verdict, Verdict::DenyWithReason(DenyReason::ElevationRequired));
}

#[test]
fn ordinary_grant_does_not_cover_irreversible() {
    let s = session(RequestorClass::System, vec![Grant::new(pattern("*"), Scope::Unrestricted)]);
    let cap = Capability::action(name("action.network.disable"), SideEffect::Irreversible);
    let decision = evaluate(&s, Some(&cap), &cap.name, &json!({}), &policy(Vec::new()), NOW);
    assert_eq!(decision.verdict, Verdict::DenyWithReason(DenyReason::ElevationRequired));
}

#[test]
fn live_elevated_grant_allows_irreversible() {
    let grant = Grant::elevated(
        pattern("action.network.disable"),
        Scope::Unrestricted,
        NOW.saturating_add_ms(1),
    );
    let s = session(RequestorClass::User, vec![grant]);
    let cap = Capability::action(name("action.network.disable"), SideEffect::Irreversible);
    let p = policy(Vec::new());
    assert!(evaluate(&s, Some(&cap), &cap.name, &json!({}), &p, NOW).is_allow());
    let later = NOW.saturating_add_ms(1);
    assert!(!evaluate(&s, Some(&cap), &cap.name, &json!({}), &p, later).is_allow());
}

#[test]
fn closed_sessions_and_unknown_capabilities_are_denied() {
    let mut s = session(RequestorClass::User, vec![Grant::new(pattern("*"), Scope::Unrestricted)]);
    let p = policy(Vec::new());
    let unknown = evaluate(&s, None, &name("read.nothing"), &json!({}), &p, NOW);
    assert_eq!(unknown.verdict, Verdict::DenyWithReason(DenyReason::UnknownCapability));
    s.state = SessionState::Closed;
    let cap = read_file();
    let closed = evaluate(&s, Some(&cap), &cap.name, &json!({}), &p, NOW);
    assert_eq!(closed.verdict, Verdict::DenyWithReason(DenyReason::SessionUnavailable));
}

#[test]
fn most_specific_satisfied_grant_is_reported() {
    let s = session(
        RequestorClass::User,
        vec![
            Grant::new(pattern("*"), Scope::Unrestricted),
            Grant::new(pattern("read.file"), var_app()),
        ],
    );
    let cap = read_file();
    let p = policy(Vec::new());
    let inside = evaluate(&s, Some(&cap), &cap.name, &json!({"path": "/var/app/a"}), &p, NOW);
    assert_eq!(inside.rule_id, "grant:read.file");
    let outside = evaluate(&s, Some(&cap), &cap.name, &json!({"path": "/etc/a"}), &p, NOW);
    assert_eq!(outside.rule_id, "grant:*");
    assert!(outside.is_allow());
}

#[test]
fn tokens_are_issued_only_for_allows_and_go_stale() {
    let store = Arc::new(PolicyStore::new(policy(Vec::new())));
    let guard = PermissionGuard::new(Arc::clone(&store));
    let s = session(RequestorClass::User, vec![Grant::new(pattern("read.*"), Scope::Unrestricted)]);
    let cap = read_file();
    let request_id = RequestId::new("r1");

    let allowed = guard.authorize(&request_id, &s, Some(&cap), &cap.name, &json!({}), NOW);
    let token = allowed.token.unwrap();
    assert_eq!(token.request_id(), &request_id);
    assert_eq!(guard.redeem(token, Some(3)), Ok(()));

    let stale_epoch = guard.authorize(&request_id, &s, Some(&cap), &cap.name, &json!({}), NOW);
    assert_eq!(
        guard.redeem(stale_epoch.token.unwrap(), Some(4)),
        Err(DenyReason::AuthorizationStale)
    );

    let closed = guard.authorize(&request_id, &s, Some(&cap), &cap.name, &json!({}), NOW);
    assert_eq!(guard.redeem(closed.token.unwrap(), None), Err(DenyReason::SessionUnavailable));

    let before_reload = guard.authorize(&request_id, &s, Some(&cap), &cap.name, &json!({}), NOW);
    store
        .reload(&PolicyTableConfig {
            version: 8,
            default: PolicyEffect::Deny,
            rules: Vec::new(),
        })
        .unwrap();
    assert_eq!(
        guard.redeem(before_reload.token.unwrap(), Some(3)),
        Err(DenyReason::AuthorizationStale)
    );

    let denied = guard.authorize(&request_id, &s, None, &name("read.none"), &json!({}), NOW);
    assert!(denied.token.is_none());
}

fn arb_pattern() -> impl Strategy<Value = CapabilityPattern> {
    prop_oneof![
        Just(pattern("*")),
        Just(pattern("read.*")),
        Just(pattern("action.*")),
        Just(pattern("read.file")),
        Just(pattern("action.net.disable")),
    ]
}

fn arb_grant() -> impl Strategy<Value = Grant> {
    (arb_pattern(), any::<bool>(), any::<bool>(), 0i64..100_000).prop_map(
        |(pattern, scoped, elevated, expiry)| Grant {
            pattern,
            scope: if scoped { var_app() } else { Scope::Unrestricted },
            expires_at: Some(Timestamp::from_unix_millis(expiry)),
            elevated,
        },
    )
}

fn arb_capability() -> impl Strategy<Value = Capability> {
    prop_oneof![
        Just(read_file()),
        Just(Capability::action(name("action.net.disable"), SideEffect::Irreversible)),
        Just(Capability::action(name("action.fs.move"), SideEffect::Reversible)),
    ]
}

proptest! {
    #[test]
    fn decisions_are_deterministic(
        grants in prop::collection::vec(arb_grant(), 0..6),
        cap in arb_capability(),
        path in prop_oneof![Just("/var/app/x"), Just("/etc/passwd"), Just("/var/app/../etc")],
        allow_all in any::<bool>(),
    ) {
        let s = session(RequestorClass::User, grants);
        let rules = if allow_all {
            vec![rule("all", None, "*", PolicyEffect::Allow)]
        } else {
            Vec::new()
        };
        let p = policy(rules);
        let params = json!({"path": path});
        let first = evaluate(&s, Some(&cap), &cap.name, &params, &p, NOW);
        let second = evaluate(&s, Some(&cap), &cap.name, &params, &p, NOW);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn irreversible_allow_implies_live_elevated_grant(
        grants in prop::collection::vec(arb_grant(), 0..6),
        allow_all in any::<bool>(),
    ) {
        let s = session(RequestorClass::External, grants);
        let rules = if allow_all {
            vec![rule("all", None, "*", PolicyEffect::Allow)]
        } else {
            Vec::new()
        };
        let cap = Capability::action(name("action.net.disable"), SideEffect::Irreversible);
        let decision =
            evaluate(&s, Some(&cap), &cap.name, &json!({"path": "/etc"}), &policy(rules), NOW);
        if decision.is_allow() {
            let covered = s.matching_grants(&cap.name, NOW).any(|g| g.elevated);
            prop_assert!(covered);
        }
    }
}
