// crates/nerve-core/src/model/plan.rs
// ============================================================================
// Module: Context Nerve Plans
// Description: Intent plans, compensations, step checks, and plan results.
// Purpose: Describe ordered, compensable capability sequences.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! A plan is an ordered list of steps executed strictly in sequence under
//! one session. Every reversible step declares the compensation that undoes
//! it. A step may also declare a [`StepCheck`] that the provider payload must
//! satisfy for the step to count as succeeded.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::model::identifiers::CapabilityName;
use crate::model::identifiers::PlanId;
use crate::model::identifiers::SessionId;
use crate::model::identifiers::StepId;

// ============================================================================
// SECTION: Plans
// ============================================================================

/// Compensating action for a reversible step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compensation {
    /// Capability that undoes the step.
    pub capability: CapabilityName,
    /// Parameters for the compensation.
    #[serde(default)]
    pub params: Value,
}

/// Payload check evaluated after a step succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepCheck {
    /// RFC 6901 JSON pointer into the payload.
    pub pointer: String,
    /// Required value at the pointer.
    pub equals: Value,
}

impl StepCheck {
    /// Returns true when the payload satisfies the check.
    #[must_use]
    pub fn holds(&self, payload: &Value) -> bool {
        payload.pointer(&self.pointer) == Some(&self.equals)
    }
}

/// One plan step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    /// Step identifier; unique within the plan.
    pub step_id: StepId,
    /// Capability invoked.
    pub capability: CapabilityName,
    /// Parameters.
    #[serde(default)]
    pub params: Value,
    /// Per-step deadline; the engine default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,
    /// Compensation; required for reversible capabilities.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compensation: Option<Compensation>,
    /// Optional payload check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check: Option<StepCheck>,
}

/// Ordered plan of capability requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// Plan identifier; shared by every audit entry the plan produces.
    pub plan_id: PlanId,
    /// Session every step runs under.
    pub session_id: SessionId,
    /// Steps in execution order.
    pub steps: Vec<PlanStep>,
}

// ============================================================================
// SECTION: Results
// ============================================================================

/// Overall plan outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanOutcome {
    /// Every step succeeded.
    Completed,
    /// A step failed and every committed effect was undone.
    RolledBack,
    /// Some effects remain committed.
    Partial,
}

/// Failed step details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailure {
    /// Failed step.
    pub step_id: StepId,
    /// Stable reason code.
    pub reason: String,
}

/// Result of executing a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanResult {
    /// Plan identifier.
    pub plan_id: PlanId,
    /// Overall outcome.
    pub outcome: PlanOutcome,
    /// Steps that succeeded, in execution order.
    pub committed: Vec<StepId>,
    /// Steps whose compensation succeeded, in compensation order.
    pub compensated: Vec<StepId>,
    /// Steps whose compensation failed.
    pub compensation_failures: Vec<StepId>,
    /// First failing step, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<StepFailure>,
    /// Payloads of committed steps, in execution order.
    pub payloads: Vec<Value>,
}
