// crates/nerve-core/src/model/decision.rs
// ============================================================================
// Module: Context Nerve Decisions
// Description: Authorization verdicts, deny reasons, and decision records.
// Purpose: Capture the outcome of permission evaluation with stable codes.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Every authorization produces a [`Decision`]. Denials carry a
//! [`DenyReason`] whose `code()` is a stable label used in audit entries and
//! responses. A plain `Deny` is an explicit policy-table denial; everything
//! else is `DenyWithReason`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::model::timestamp::Timestamp;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Why a request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// Session unknown or closed.
    SessionUnavailable,
    /// Session idled past its timeout.
    SessionExpired,
    /// Capability is not registered.
    UnknownCapability,
    /// No grant or policy rule allows the capability.
    NoGrant,
    /// A grant matched but the parameters fall outside its scope.
    ScopeViolation,
    /// An explicit policy rule denies the capability.
    PolicyDenied,
    /// Irreversible capability without a live elevated grant.
    ElevationRequired,
    /// Grants or policy changed between decision and execution.
    AuthorizationStale,
    /// Deadline or cancellation arrived before the session turn.
    Unserved,
}

impl DenyReason {
    /// Stable code.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::SessionUnavailable => "session_unavailable",
            Self::SessionExpired => "session_expired",
            Self::UnknownCapability => "unknown_capability",
            Self::NoGrant => "no_grant",
            Self::ScopeViolation => "scope_violation",
            Self::PolicyDenied => "policy_denied",
            Self::ElevationRequired => "elevation_required",
            Self::AuthorizationStale => "authorization_stale",
            Self::Unserved => "unserved",
        }
    }
}

/// Authorization verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", content = "reason", rename_all = "snake_case")]
pub enum Verdict {
    /// Request may proceed.
    Allow,
    /// Denied by an explicit policy rule.
    Deny,
    /// Denied for a specific reason.
    DenyWithReason(DenyReason),
}

impl Verdict {
    /// Stable label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
            Self::DenyWithReason(_) => "deny_with_reason",
        }
    }

    /// Returns the denial reason code, if any.
    #[must_use]
    pub const fn reason_code(self) -> Option<&'static str> {
        match self {
            Self::Allow => None,
            Self::Deny => Some(DenyReason::PolicyDenied.code()),
            Self::DenyWithReason(reason) => Some(reason.code()),
        }
    }
}

/// Authorization decision record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    /// Verdict.
    pub verdict: Verdict,
    /// Rule that produced the verdict (`grant:<pattern>`, a policy rule id, or a built-in).
    pub rule_id: String,
    /// Policy snapshot version consulted.
    pub policy_version: u64,
    /// Grant epoch of the session at decision time.
    pub grant_epoch: u64,
    /// Decision time.
    pub decided_at: Timestamp,
}

impl Decision {
    /// Returns true for `Allow`.
    #[must_use]
    pub fn is_allow(&self) -> bool {
        self.verdict == Verdict::Allow
    }
}
