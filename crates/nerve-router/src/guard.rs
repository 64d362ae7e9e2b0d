// crates/nerve-router/src/guard.rs
// ============================================================================
// Module: Permission Guard
// Description: Deterministic authorization of requests against grants and policy.
// Purpose: Produce one decision per request and bind it to a single-use token.
// Dependencies: nerve-config, nerve-core, tracing
// ============================================================================

//! ## Overview
//! [`evaluate`] is a pure function of the session, the cataloged capability,
//! the request parameters, the policy snapshot, and the decision time.
//!
//! Evaluation order:
//! 1. Closed sessions and unknown capabilities are denied.
//! 2. Irreversible capabilities need an unexpired elevated grant whose scope
//!    admits the parameters. Policy never grants them.
//! 3. Otherwise a matching grant with a satisfied scope allows, unless an
//!    explicit policy rule denies (deny dominates).
//! 4. Matching grants whose scopes all fail deny with `scope_violation`.
//! 5. Without a matching grant the policy table decides.
//!
//! An allow comes with an [`AuthorizationToken`]. The token is move-only and
//! redeemed once right before dispatch; it fails when the session's grants or
//! the policy version changed since the decision.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use nerve_config::PolicyEffect;
use nerve_config::PolicySnapshot;
use nerve_config::PolicyStore;
use nerve_core::Capability;
use nerve_core::CapabilityName;
use nerve_core::Decision;
use nerve_core::DenyReason;
use nerve_core::Grant;
use nerve_core::RequestId;
use nerve_core::Session;
use nerve_core::SessionId;
use nerve_core::SessionState;
use nerve_core::Timestamp;
use nerve_core::Verdict;
use serde_json::Value;
use tracing::debug;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Rule id for denials caused by session state.
pub const SESSION_RULE_ID: &str = "builtin.session";
/// Rule id for denials of uncataloged capabilities.
pub const CATALOG_RULE_ID: &str = "builtin.catalog";
/// Rule id for irreversible capabilities lacking elevation.
pub const ELEVATION_RULE_ID: &str = "builtin.elevation";
/// Rule id for stale authorization tokens.
pub const TOKEN_RULE_ID: &str = "builtin.token";
/// Rule id for requests settled while queued behind their session.
pub const QUEUE_RULE_ID: &str = "builtin.queue";

// ============================================================================
// SECTION: Evaluation
// ============================================================================

/// Evaluates a request and returns exactly one decision.
#[must_use]
pub fn evaluate(
    session: &Session,
    capability: Option<&Capability>,
    name: &CapabilityName,
    params: &Value,
    policy: &PolicySnapshot,
    now: Timestamp,
) -> Decision {
    let decide = |verdict: Verdict, rule_id: String| Decision {
        verdict,
        rule_id,
        policy_version: policy.version(),
        grant_epoch: session.grant_epoch,
        decided_at: now,
    };
    if session.state != SessionState::Open {
        return decide(
            Verdict::DenyWithReason(DenyReason::SessionUnavailable),
            SESSION_RULE_ID.to_string(),
        );
    }
    let Some(capability) = capability else {
        return decide(
            Verdict::DenyWithReason(DenyReason::UnknownCapability),
            CATALOG_RULE_ID.to_string(),
        );
    };

    let class = session.requestor.class;
    let explicit_deny = policy
        .explicit_rule(class, name)
        .filter(|rule| rule.effect == PolicyEffect::Deny)
        .map(|rule| rule.id.clone());
    let irreversible = capability.is_irreversible();
    let candidates = ranked_grants(session, name, now, irreversible);

    if candidates.is_empty() {
        if irreversible {
            return decide(
                Verdict::DenyWithReason(DenyReason::ElevationRequired),
                ELEVATION_RULE_ID.to_string(),
            );
        }
        let fallback = policy.evaluate(class, name);
        return match (fallback.effect, fallback.explicit) {
            (PolicyEffect::Allow, _) => decide(Verdict::Allow, fallback.rule_id),
            (PolicyEffect::Deny, true) => decide(Verdict::Deny, fallback.rule_id),
            (PolicyEffect::Deny, false) => {
                decide(Verdict::DenyWithReason(DenyReason::NoGrant), fallback.rule_id)
            }
        };
    }

    let Some(grant) = candidates.iter().find(|grant| grant.scope.permits(params)) else {
        return decide(
            Verdict::DenyWithReason(DenyReason::ScopeViolation),
            grant_rule_id(candidates[0]),
        );
    };
    if let Some(rule_id) = explicit_deny {
        return decide(Verdict::Deny, rule_id);
    }
    decide(Verdict::Allow, grant_rule_id(grant))
}

/// Returns unexpired grants selecting `name`, most specific first.
fn ranked_grants<'a>(
    session: &'a Session,
    name: &'a CapabilityName,
    now: Timestamp,
    elevated_only: bool,
) -> Vec<&'a Grant> {
    let mut grants: Vec<&Grant> = session
        .matching_grants(name, now)
        .filter(|grant| !elevated_only || grant.elevated)
        .collect();
    grants.sort_by(|a, b| {
        b.pattern
            .specificity()
            .cmp(&a.pattern.specificity())
            .then_with(|| a.pattern.to_string().cmp(&b.pattern.to_string()))
    });
    grants
}

/// Rule id recorded for a grant-based decision.
fn grant_rule_id(grant: &Grant) -> String {
    format!("grant:{}", grant.pattern)
}

// ============================================================================
// SECTION: Tokens
// ============================================================================

/// Single-use proof that a request was allowed.
///
/// # Invariants
/// - Not `Clone`; [`AuthorizationToken::redeem`] consumes it.
#[derive(Debug)]
pub struct AuthorizationToken {
    /// Request the token was issued for.
    request_id: RequestId,
    /// Session the decision was made against.
    session_id: SessionId,
    /// Authorized capability.
    capability: CapabilityName,
    /// Session grant epoch at decision time.
    grant_epoch: u64,
    /// Policy version at decision time.
    policy_version: u64,
}

impl AuthorizationToken {
    /// Request this token authorizes.
    #[must_use]
    pub const fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// Authorized capability.
    #[must_use]
    pub const fn capability(&self) -> &CapabilityName {
        &self.capability
    }

    /// Redeems the token against the current grant epoch and policy version.
    ///
    /// `grant_epoch` is `None` when the session has closed.
    ///
    /// # Errors
    ///
    /// Returns [`DenyReason::SessionUnavailable`] for closed sessions and
    /// [`DenyReason::AuthorizationStale`] when grants or policy changed.
    pub fn redeem(self, grant_epoch: Option<u64>, policy_version: u64) -> Result<(), DenyReason> {
        let Some(current) = grant_epoch else {
            return Err(DenyReason::SessionUnavailable);
        };
        if current != self.grant_epoch || policy_version != self.policy_version {
            debug!(
                request_id = %self.request_id,
                session_id = %self.session_id,
                "authorization token stale"
            );
            return Err(DenyReason::AuthorizationStale);
        }
        Ok(())
    }
}

/// Decision plus, for allows, the token that authorizes dispatch.
#[derive(Debug)]
pub struct Authorization {
    /// Decision.
    pub decision: Decision,
    /// Token; present only for allows.
    pub token: Option<AuthorizationToken>,
}

// ============================================================================
// SECTION: Guard
// ============================================================================

/// Permission guard bound to the live policy store.
pub struct PermissionGuard {
    /// Policy store.
    policy: Arc<PolicyStore>,
}

impl PermissionGuard {
    /// Creates a guard reading `policy`.
    #[must_use]
    pub const fn new(policy: Arc<PolicyStore>) -> Self {
        Self {
            policy,
        }
    }

    /// Current policy version.
    #[must_use]
    pub fn policy_version(&self) -> u64 {
        self.policy.snapshot().version()
    }

    /// Authorizes a request against the current policy snapshot.
    #[must_use]
    pub fn authorize(
        &self,
        request_id: &RequestId,
        session: &Session,
        capability: Option<&Capability>,
        name: &CapabilityName,
        params: &Value,
        now: Timestamp,
    ) -> Authorization {
        let snapshot = self.policy.snapshot();
        let decision = evaluate(session, capability, name, params, &snapshot, now);
        let token = decision.is_allow().then(|| AuthorizationToken {
            request_id: request_id.clone(),
            session_id: session.session_id.clone(),
            capability: name.clone(),
            grant_epoch: decision.grant_epoch,
            policy_version: decision.policy_version,
        });
        Authorization {
            decision,
            token,
        }
    }

    /// Redeems a token against the current policy version.
    ///
    /// # Errors
    ///
    /// See [`AuthorizationToken::redeem`].
    pub fn redeem(
        &self,
        token: AuthorizationToken,
        grant_epoch: Option<u64>,
    ) -> Result<(), DenyReason> {
        token.redeem(grant_epoch, self.policy_version())
    }
}

#[cfg(test)]
mod tests;
