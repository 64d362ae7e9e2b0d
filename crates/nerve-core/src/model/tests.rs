// crates/nerve-core/src/model/tests.rs
// ============================================================================
// Module: Data Model Unit Tests
// Description: Unit tests for capability names, patterns, scopes, and hashing.
// Purpose: Pin matching semantics that authorization depends on.
// Dependencies: proptest, serde_json
// ============================================================================

//! ## Overview
//! Exercises the pure matching and hashing helpers of the data model.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    reason = "Test-only panic-based assertions are permitted."
)]

use proptest::prelude::*;
use serde_json::json;

use super::*;

fn cap(name: &str) -> CapabilityName {
    CapabilityName::parse(name).unwrap()
}

fn path_scope(prefix: &str) -> Scope {
    Scope::PathPrefix {
        param: "path".to_string(),
        prefix: prefix.to_string(),
    }
}

// ============================================================================
// SECTION: Names and Patterns
// ============================================================================

#[test]
fn capability_name_rejects_malformed_input() {
    assert!(CapabilityName::parse("read.file").is_ok());
    assert_eq!(CapabilityName::parse(""), Err(IdentifierError::Empty));
    assert!(CapabilityName::parse("read..file").is_err());
    assert!(CapabilityName::parse("Read.File").is_err());
    assert!(CapabilityName::parse(".read").is_err());
    assert!(CapabilityName::parse(&"a".repeat(MAX_LEN + 1)).is_err());
}

const MAX_LEN: usize = identifiers::MAX_CAPABILITY_NAME_LEN;

#[test]
fn capability_name_deserialization_validates() {
    let ok: CapabilityName = serde_json::from_value(json!("read.process.list")).unwrap();
    assert_eq!(ok.as_str(), "read.process.list");
    assert!(serde_json::from_value::<CapabilityName>(json!("read file")).is_err());
}

#[test]
fn prefix_patterns_match_whole_segments() {
    let pattern = CapabilityPattern::parse("read.*").unwrap();
    assert!(pattern.matches(&cap("read.file")));
    assert!(pattern.matches(&cap("read.process.list")));
    assert!(!pattern.matches(&cap("readonly.file")));
    assert!(!pattern.matches(&cap("read")));
    assert!(CapabilityPattern::parse("*").unwrap().matches(&cap("action.network.disable")));
    assert!(CapabilityPattern::parse(".*").is_err());
    assert!(CapabilityPattern::parse("read.*.x").is_err());
}

#[test]
fn pattern_round_trips_through_wire_form() {
    for raw in ["*", "read.*", "action.network.disable"] {
        let pattern = CapabilityPattern::parse(raw).unwrap();
        assert_eq!(serde_json::to_value(&pattern).unwrap(), json!(raw));
    }
}

#[test]
fn pattern_specificity_orders_exact_above_prefix_above_any() {
    let exact = CapabilityPattern::parse("read.file").unwrap();
    let deep = CapabilityPattern::parse("read.file.*").unwrap();
    let shallow = CapabilityPattern::parse("read.*").unwrap();
    let any = CapabilityPattern::Any;
    assert!(exact.specificity() > deep.specificity());
    assert!(deep.specificity() > shallow.specificity());
    assert!(shallow.specificity() > any.specificity());
}

// ============================================================================
// SECTION: Capability Descriptors
// ============================================================================

#[test]
fn capability_validation_ties_kind_to_side_effect() {
    assert!(Capability::read(cap("read.file")).validate().is_ok());
    let mut bad_read = Capability::read(cap("read.file"));
    bad_read.side_effect = SideEffect::Reversible;
    assert!(matches!(bad_read.validate(), Err(CapabilityError::ReadWithSideEffect(_))));
    let bad_action = Capability::action(cap("action.x"), SideEffect::None);
    assert!(matches!(bad_action.validate(), Err(CapabilityError::ActionWithoutSideEffect(_))));
    let zero = Capability::read(cap("read.file")).with_version(0);
    assert!(matches!(zero.validate(), Err(CapabilityError::ZeroVersion(_))));
}

// ============================================================================
// SECTION: Scopes
// ============================================================================

#[test]
fn path_scope_allows_paths_below_prefix() {
    let scope = path_scope("/var/app");
    assert!(scope.permits(&json!({"path": "/var/app/log.txt"})));
    assert!(scope.permits(&json!({"path": "/var/app"})));
    assert!(scope.permits(&json!({"path": "/var/app/./sub/../log.txt"})));
}

#[test]
fn path_scope_denies_siblings_and_escapes() {
    let scope = path_scope("/var/app");
    assert!(!scope.permits(&json!({"path": "/etc/shadow"})));
    assert!(!scope.permits(&json!({"path": "/var/application/x"})));
    assert!(!scope.permits(&json!({"path": "/var/app/../../etc/shadow"})));
    assert!(!scope.permits(&json!({"path": "var/app/log.txt"})));
    assert!(!scope.permits(&json!({"path": 7})));
    assert!(!scope.permits(&json!({})));
}

#[test]
fn normalize_path_rejects_climbing_above_root() {
    assert_eq!(normalize_path("/a/b/../c"), Some(vec!["a", "c"]));
    assert_eq!(normalize_path("/.."), None);
    assert_eq!(normalize_path("relative"), None);
    assert_eq!(normalize_path("/"), Some(Vec::new()));
}

#[test]
fn param_scopes_compare_json_values() {
    let equals = Scope::ParamEquals {
        param: "iface".to_string(),
        value: json!("wlan0"),
    };
    assert!(equals.permits(&json!({"iface": "wlan0"})));
    assert!(!equals.permits(&json!({"iface": "eth0"})));
    let one_of = Scope::ParamOneOf {
        param: "level".to_string(),
        values: vec![json!(1), json!(2)],
    };
    assert!(one_of.permits(&json!({"level": 2})));
    assert!(!one_of.permits(&json!({"level": 3})));
    assert!(!Scope::ParamOneOf {
        param: "level".to_string(),
        values: Vec::new(),
    }
    .is_well_formed());
}

#[test]
fn grants_replace_by_pattern_and_bump_epoch() {
    let mut session = Session {
        session_id: SessionId::new("s-1"),
        requestor: Requestor::new("alice", RequestorClass::User),
        grants: Vec::new(),
        created_at: Timestamp::EPOCH,
        last_activity: Timestamp::EPOCH,
        idle_timeout_ms: 1_000,
        grant_epoch: 0,
        state: SessionState::Open,
    };
    let pattern = CapabilityPattern::parse("read.*").unwrap();
    session.upsert_grant(Grant::new(pattern.clone(), Scope::Unrestricted));
    session.upsert_grant(Grant::new(pattern.clone(), path_scope("/var/app")));
    assert_eq!(session.grants.len(), 1);
    assert_eq!(session.grant_epoch, 2);
    assert_eq!(session.matching_grants(&cap("read.file"), Timestamp::EPOCH).count(), 1);
    assert!(session.remove_grant(&pattern));
    assert!(!session.remove_grant(&pattern));
    assert_eq!(session.grant_epoch, 3);
}

#[test]
fn elevated_grant_sits_beside_ordinary_grant_on_same_pattern() {
    let mut session = Session {
        session_id: SessionId::new("s-1"),
        requestor: Requestor::new("alice", RequestorClass::User),
        grants: Vec::new(),
        created_at: Timestamp::EPOCH,
        last_activity: Timestamp::EPOCH,
        idle_timeout_ms: 1_000,
        grant_epoch: 0,
        state: SessionState::Open,
    };
    let pattern = CapabilityPattern::parse("action.disk.wipe").unwrap();
    let first_expiry = Timestamp::from_unix_millis(500);
    let second_expiry = Timestamp::from_unix_millis(900);
    session.upsert_grant(Grant::new(pattern.clone(), Scope::Unrestricted));
    session.upsert_grant(Grant::elevated(pattern.clone(), Scope::Unrestricted, first_expiry));
    session.upsert_grant(Grant::elevated(pattern.clone(), Scope::Unrestricted, second_expiry));

    assert_eq!(session.grants.len(), 2);
    assert_eq!(session.grants.iter().filter(|grant| !grant.elevated).count(), 1);
    let elevated = session.grants.iter().find(|grant| grant.elevated).unwrap();
    assert_eq!(elevated.expires_at, Some(second_expiry));
    assert!(session.remove_grant(&pattern));
    assert!(session.grants.is_empty());
}

#[test]
fn expired_grants_do_not_match() {
    let grant = Grant::new(CapabilityPattern::Any, Scope::Unrestricted)
        .with_expiry(Timestamp::from_unix_millis(100));
    assert!(!grant.is_expired(Timestamp::from_unix_millis(99)));
    assert!(grant.is_expired(Timestamp::from_unix_millis(100)));
}

// ============================================================================
// SECTION: Hashing and Plans
// ============================================================================

#[test]
fn canonical_hash_ignores_key_order() {
    let a = hash_canonical_json(&json!({"b": 1, "a": [true, null]})).unwrap();
    let b = hash_canonical_json(&json!({"a": [true, null], "b": 1})).unwrap();
    assert_eq!(a, b);
    assert_eq!(a.value.len(), 64);
}

#[test]
fn chain_digest_depends_on_every_input() {
    let body = HashDigest::sha256(b"body");
    let genesis = chain_digest(1, None, &body);
    assert_ne!(genesis, chain_digest(2, None, &body));
    assert_ne!(genesis, chain_digest(1, Some(&genesis), &body));
    assert_ne!(genesis, chain_digest(1, None, &HashDigest::sha256(b"other")));
}

#[test]
fn step_check_reads_json_pointer() {
    let check = StepCheck {
        pointer: "/status".to_string(),
        equals: json!("ok"),
    };
    assert!(check.holds(&json!({"status": "ok"})));
    assert!(!check.holds(&json!({"status": "failed"})));
    assert!(!check.holds(&json!([])));
}

proptest! {
    #[test]
    fn path_scope_never_admits_dotdot_escape(
        segments in proptest::collection::vec("[a-z]{1,6}", 0..4),
        climbs in 1usize..4,
    ) {
        let scope = path_scope("/var/app");
        let mut path = String::from("/var/app");
        for _ in 0..(climbs + segments.len()) {
            path.push_str("/..");
        }
        for segment in &segments {
            path.push('/');
            path.push_str(segment);
        }
        let admitted = scope.permits(&json!({"path": path}));
        if let Some(parts) = normalize_path(&path) {
            prop_assert_eq!(admitted, parts.starts_with(&["var", "app"]));
        } else {
            prop_assert!(!admitted);
        }
    }

    #[test]
    fn scope_evaluation_is_deterministic(path in "/[a-z/.]{0,24}") {
        let scope = path_scope("/var/app");
        let params = json!({"path": path});
        prop_assert_eq!(scope.permits(&params), scope.permits(&params));
    }
}
