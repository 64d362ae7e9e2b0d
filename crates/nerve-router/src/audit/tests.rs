// crates/nerve-router/src/audit/tests.rs
// ============================================================================
// Module: Audit Log Tests
// Description: Unit tests for sequencing, querying, and chain verification.
// Purpose: Pin gap-free sequences and tamper detection.
// Dependencies: nerve-core, tempfile
// ============================================================================

//! ## Overview
//! Exercises the in-memory log, the restartable cursor, and file exports.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    reason = "Test-only panic-based assertions are permitted."
)]

use nerve_core::AuditOutcome;
use nerve_core::CapabilityName;
use nerve_core::PlanId;
use nerve_core::PlanLink;
use nerve_core::PlanRole;
use nerve_core::RequestId;
use nerve_core::SessionId;
use nerve_core::StepId;
use nerve_core::Timestamp;
use nerve_core::Verdict;

use super::*;

fn record(request: &str, session: &str, outcome: AuditOutcome) -> AuditRecord {
    AuditRecord {
        request_id: RequestId::new(request),
        session_id: SessionId::new(session),
        requestor_id: None,
        capability: CapabilityName::parse("read.file").unwrap(),
        plan: None,
        verdict: Verdict::Allow,
        rule_id: "grant:read.*".to_string(),
        policy_version: 1,
        provider_id: None,
        attempts: Vec::new(),
        outcome,
        reason: None,
        recorded_at: Timestamp::from_unix_millis(42),
    }
}

#[test]
fn sequences_start_at_one_without_gaps() {
    let log = AuditLog::new(16);
    let sequences: Vec<u64> = (0..5)
        .map(|i| log.append(record(&format!("r{i}"), "s", AuditOutcome::Success)).unwrap())
        .collect();
    assert_eq!(sequences, vec![1, 2, 3, 4, 5]);
    assert_eq!(log.last_sequence().unwrap(), 5);
    assert_eq!(log.verify().unwrap(), 5);
}

#[test]
fn concurrent_appends_stay_contiguous() {
    let log = Arc::new(AuditLog::new(1_000));
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let log = Arc::clone(&log);
            std::thread::spawn(move || {
                for i in 0..25 {
                    log.append(record(&format!("t{t}-{i}"), "s", AuditOutcome::Success)).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    let sequences: Vec<u64> = log.query(AuditFilter::default()).map(|e| e.sequence).collect();
    assert_eq!(sequences, (1..=200).collect::<Vec<_>>());
    assert_eq!(log.verify().unwrap(), 200);
}

#[test]
fn tampering_is_detected() {
    let log = AuditLog::new(16);
    for i in 0..3 {
        log.append(record(&format!("r{i}"), "s", AuditOutcome::Success)).unwrap();
    }
    let mut entries: Vec<AuditEntry> = log.query(AuditFilter::default()).collect();
    entries[1].record.outcome = AuditOutcome::Denied;
    let err = verify_chain(&entries).unwrap_err();
    assert!(matches!(err, AuditError::ChainBroken { sequence: 2, .. }));

    let mut reordered: Vec<AuditEntry> = log.query(AuditFilter::default()).collect();
    reordered.swap(0, 1);
    assert!(verify_chain(&reordered).is_err());
}

#[test]
fn retention_drops_oldest_and_suffix_still_verifies() {
    let log = AuditLog::new(3);
    for i in 0..10 {
        log.append(record(&format!("r{i}"), "s", AuditOutcome::Success)).unwrap();
    }
    assert_eq!(log.len().unwrap(), 3);
    let first = log.query(AuditFilter::default()).next().unwrap();
    assert_eq!(first.sequence, 8);
    assert_eq!(log.verify().unwrap(), 3);
}

#[test]
fn request_index_tracks_retained_entries() {
    let log = AuditLog::new(2);
    log.append(record("r0", "s", AuditOutcome::Success)).unwrap();
    assert!(log.contains_request(&RequestId::new("r0")).unwrap());
    assert!(!log.contains_request(&RequestId::new("r1")).unwrap());

    log.append(record("r1", "s", AuditOutcome::Success)).unwrap();
    log.append(record("r2", "s", AuditOutcome::Success)).unwrap();

    assert!(!log.contains_request(&RequestId::new("r0")).unwrap());
    assert!(log.contains_request(&RequestId::new("r1")).unwrap());
    assert!(log.contains_request(&RequestId::new("r2")).unwrap());
}

#[test]
fn cursor_filters_and_restarts() {
    let log = AuditLog::new(16);
    log.append(record("a", "s1", AuditOutcome::Success)).unwrap();
    log.append(record("b", "s2", AuditOutcome::Denied)).unwrap();
    log.append(record("c", "s1", AuditOutcome::Timeout)).unwrap();
    log.append(record("d", "s1", AuditOutcome::Success)).unwrap();

    let filter = AuditFilter {
        session_id: Some(SessionId::new("s1")),
        ..AuditFilter::default()
    };
    let mut cursor = log.query(filter.clone());
    assert_eq!(cursor.next().unwrap().record.request_id.as_str(), "a");
    let resume_at = cursor.position();
    assert_eq!(resume_at, 2);

    let resumed: Vec<String> = log
        .query(AuditFilter {
            from_sequence: Some(resume_at),
            ..filter
        })
        .map(|entry| entry.record.request_id.as_str().to_string())
        .collect();
    assert_eq!(resumed, vec!["c", "d"]);

    let denied = AuditFilter {
        outcome: Some(AuditOutcome::Denied),
        ..AuditFilter::default()
    };
    assert_eq!(log.query(denied).count(), 1);
}

#[test]
fn cursor_sees_entries_appended_after_creation() {
    let log = AuditLog::new(16);
    log.append(record("a", "s", AuditOutcome::Success)).unwrap();
    let mut cursor = log.query(AuditFilter::default());
    assert!(cursor.next().is_some());
    assert!(cursor.next().is_none());
    log.append(record("b", "s", AuditOutcome::Success)).unwrap();
    assert_eq!(cursor.next().unwrap().sequence, 2);
}

#[test]
fn plan_filter_groups_linked_entries() {
    let log = AuditLog::new(16);
    let mut linked = record("a", "s", AuditOutcome::Success);
    linked.plan = Some(PlanLink {
        plan_id: PlanId::new("p1"),
        step_id: StepId::new("one"),
        role: PlanRole::Step,
    });
    log.append(linked).unwrap();
    log.append(record("b", "s", AuditOutcome::Success)).unwrap();
    let filter = AuditFilter {
        plan_id: Some(PlanId::new("p1")),
        ..AuditFilter::default()
    };
    let found: Vec<AuditEntry> = log.query(filter).collect();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].record.request_id.as_str(), "a");
}

#[test]
fn file_export_verifies_and_resumes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.jsonl");
    {
        let log = AuditLog::new(16).with_sink(Arc::new(FileAuditSink::new(&path).unwrap()));
        log.append(record("a", "s", AuditOutcome::Success)).unwrap();
        log.append(record("b", "s", AuditOutcome::Denied)).unwrap();
    }
    let tail = read_chain_tail(&path).unwrap().unwrap();
    assert_eq!(tail.sequence, 2);
    {
        let log = AuditLog::new(16)
            .with_tail(Some(tail))
            .with_sink(Arc::new(FileAuditSink::new(&path).unwrap()));
        assert_eq!(log.append(record("c", "s", AuditOutcome::Success)).unwrap(), 3);
    }
    assert_eq!(verify_audit_file(&path).unwrap(), 3);

    let text = std::fs::read_to_string(&path).unwrap();
    std::fs::write(&path, text.replace("\"denied\"", "\"success\"")).unwrap();
    assert_eq!(verify_audit_file(&path).unwrap_err().code(), "audit_chain_broken");
}

#[test]
fn missing_file_has_no_tail() {
    let dir = tempfile::tempdir().unwrap();
    assert!(read_chain_tail(&dir.path().join("absent.jsonl")).unwrap().is_none());
}
