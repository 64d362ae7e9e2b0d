// crates/nerve-core/src/model/audit.rs
// ============================================================================
// Module: Context Nerve Audit Model
// Description: Audit records, chained audit entries, and query filters.
// Purpose: Define the durable shape of "what was decided and what happened".
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! The router builds one [`AuditRecord`] per request. The audit log turns it
//! into an [`AuditEntry`] by assigning a sequence number and linking it into
//! the hash chain. [`AuditFilter`] selects entries for export.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::model::decision::Verdict;
use crate::model::hashing::HashDigest;
use crate::model::identifiers::CapabilityName;
use crate::model::identifiers::PlanId;
use crate::model::identifiers::ProviderId;
use crate::model::identifiers::RequestId;
use crate::model::identifiers::RequestorId;
use crate::model::identifiers::SessionId;
use crate::model::request::PlanLink;
use crate::model::timestamp::Timestamp;

// ============================================================================
// SECTION: Outcomes
// ============================================================================

/// Terminal outcome of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    /// Provider returned a valid payload.
    Success,
    /// Authorization denied; no provider contacted.
    Denied,
    /// No eligible provider.
    NoProvider,
    /// Final attempt exceeded its deadline or was cancelled.
    Timeout,
    /// Final attempt failed.
    ProviderError,
}

impl AuditOutcome {
    /// Stable label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Denied => "denied",
            Self::NoProvider => "no_provider",
            Self::Timeout => "timeout",
            Self::ProviderError => "provider_error",
        }
    }
}

/// Outcome of one provider attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Provider succeeded.
    Success,
    /// Provider returned an error.
    Error,
    /// Attempt exceeded its time bound.
    Timeout,
    /// Attempt was cancelled by the caller.
    Cancelled,
}

/// Record of one provider attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// Provider contacted.
    pub provider_id: ProviderId,
    /// Attempt outcome.
    pub outcome: AttemptOutcome,
    /// Elapsed wall time.
    pub elapsed_ms: u64,
    /// Error code when the attempt failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

// ============================================================================
// SECTION: Records and Entries
// ============================================================================

/// Audit content produced by the router before sequencing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Request identifier.
    pub request_id: RequestId,
    /// Session identifier.
    pub session_id: SessionId,
    /// Requestor identity, when the session was resolvable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requestor_id: Option<RequestorId>,
    /// Requested capability.
    pub capability: CapabilityName,
    /// Plan linkage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<PlanLink>,
    /// Authorization verdict.
    pub verdict: Verdict,
    /// Rule that produced the verdict.
    pub rule_id: String,
    /// Policy version consulted.
    pub policy_version: u64,
    /// Provider of the final attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<ProviderId>,
    /// Provider attempts in order.
    #[serde(default)]
    pub attempts: Vec<AttemptRecord>,
    /// Terminal outcome.
    pub outcome: AuditOutcome,
    /// Reason code on non-success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Time the outcome was known.
    pub recorded_at: Timestamp,
}

/// Sequenced, hash-chained audit entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Sequence number; starts at 1 with no gaps.
    pub sequence: u64,
    /// Audited content.
    #[serde(flatten)]
    pub record: AuditRecord,
    /// Digest of the previous entry; `None` for the first entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_hash: Option<HashDigest>,
    /// Digest linking this entry into the chain.
    pub entry_hash: HashDigest,
}

// ============================================================================
// SECTION: Filters
// ============================================================================

/// Audit query filter; unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditFilter {
    /// First sequence number to return (inclusive).
    #[serde(default)]
    pub from_sequence: Option<u64>,
    /// Session filter.
    #[serde(default)]
    pub session_id: Option<SessionId>,
    /// Request filter.
    #[serde(default)]
    pub request_id: Option<RequestId>,
    /// Plan filter.
    #[serde(default)]
    pub plan_id: Option<PlanId>,
    /// Capability filter.
    #[serde(default)]
    pub capability: Option<CapabilityName>,
    /// Outcome filter.
    #[serde(default)]
    pub outcome: Option<AuditOutcome>,
}

impl AuditFilter {
    /// Returns true when `entry` satisfies every set field.
    #[must_use]
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        let record = &entry.record;
        self.from_sequence.is_none_or(|from| entry.sequence >= from)
            && self.session_id.as_ref().is_none_or(|id| &record.session_id == id)
            && self.request_id.as_ref().is_none_or(|id| &record.request_id == id)
            && self
                .plan_id
                .as_ref()
                .is_none_or(|id| record.plan.as_ref().is_some_and(|plan| &plan.plan_id == id))
            && self.capability.as_ref().is_none_or(|cap| &record.capability == cap)
            && self.outcome.is_none_or(|outcome| record.outcome == outcome)
    }
}
