// crates/nerve-core/src/model/request.rs
// ============================================================================
// Module: Context Nerve Requests
// Description: Capability requests and their routed responses.
// Purpose: Define the unit of work submitted to the context router.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! A request names one capability, carries its parameters, and has a
//! deadline. Requests issued by the intent engine also carry a [`PlanLink`]
//! so audit entries can be joined back to the plan step that produced them.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::model::audit::AuditOutcome;
use crate::model::identifiers::CapabilityName;
use crate::model::identifiers::PlanId;
use crate::model::identifiers::ProviderId;
use crate::model::identifiers::RequestId;
use crate::model::identifiers::SessionId;
use crate::model::identifiers::StepId;

// ============================================================================
// SECTION: Plan Links
// ============================================================================

/// Role a request plays inside a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanRole {
    /// Forward step.
    Step,
    /// Compensation for a previously committed step.
    Compensation,
}

/// Links a request to the plan step that issued it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanLink {
    /// Plan identifier.
    pub plan_id: PlanId,
    /// Step identifier.
    pub step_id: StepId,
    /// Forward step or compensation.
    pub role: PlanRole,
}

// ============================================================================
// SECTION: Requests
// ============================================================================

/// Capability request submitted to the router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Caller-supplied request id; the router assigns one when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
    /// Session the request runs under.
    pub session_id: SessionId,
    /// Requested capability.
    pub capability: CapabilityName,
    /// Capability parameters.
    #[serde(default)]
    pub params: Value,
    /// Deadline budget in milliseconds; must be positive.
    pub deadline_ms: u64,
    /// Plan step that issued the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<PlanLink>,
}

impl Request {
    /// Creates a request with no explicit id or plan link.
    #[must_use]
    pub const fn new(
        session_id: SessionId,
        capability: CapabilityName,
        params: Value,
        deadline_ms: u64,
    ) -> Self {
        Self {
            request_id: None,
            session_id,
            capability,
            params,
            deadline_ms,
            plan: None,
        }
    }

    /// Attaches an explicit request id.
    #[must_use]
    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }

    /// Attaches a plan link.
    #[must_use]
    pub fn with_plan(mut self, plan: PlanLink) -> Self {
        self.plan = Some(plan);
        self
    }
}

/// Routed response returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Request identifier.
    pub request_id: RequestId,
    /// Terminal status.
    pub status: AuditOutcome,
    /// Provider payload on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Stable reason code on failure or denial.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Provider that produced the final attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<ProviderId>,
    /// Policy rule id; disclosed to system requestors only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    /// Audit sequence number of the entry recorded for this request.
    pub audit_sequence: u64,
}

impl Response {
    /// Returns true when the request succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == AuditOutcome::Success
    }
}
