// crates/nerve-router/src/intent.rs
// ============================================================================
// Module: Intent Engine
// Description: Ordered plan execution with declared compensations.
// Purpose: Run multi-step actions through the router and undo them on failure.
// Dependencies: nerve-core, nerve-providers, serde_json, thiserror, tracing
// ============================================================================

//! ## Overview
//! A [`Plan`] is validated up front: every capability must be cataloged,
//! every reversible step must declare a compensation, and compensations
//! themselves must not be irreversible. Steps then run strictly in order
//! through the [`ContextRouter`], each request tagged with the plan id so the
//! audit log can reconstruct the sequence.
//!
//! On the first failing step, compensations of committed reversible steps run
//! in reverse order, each exactly once, continuing past individual failures.
//! Irreversible steps are never retried by the engine.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::sync::Arc;

use nerve_core::CapabilityName;
use nerve_core::Compensation;
use nerve_core::Plan;
use nerve_core::PlanLink;
use nerve_core::PlanOutcome;
use nerve_core::PlanResult;
use nerve_core::PlanRole;
use nerve_core::Request;
use nerve_core::SideEffect;
use nerve_core::StepFailure;
use nerve_core::StepId;
use nerve_providers::RegistryError;
use serde_json::Value;
use thiserror::Error;
use tracing::info;
use tracing::warn;

use crate::router::ContextRouter;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum steps per plan.
pub const MAX_PLAN_STEPS: usize = 64;
/// Failure reason for a step whose result check did not hold.
pub const CHECK_FAILED: &str = "check_failed";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Plan validation errors; raised before any step runs.
#[derive(Debug, Error)]
pub enum PlanError {
    /// Plan has no steps.
    #[error("plan has no steps")]
    Empty,
    /// Plan exceeds the step limit.
    #[error("plan has {0} steps; limit is {MAX_PLAN_STEPS}")]
    TooManySteps(usize),
    /// Step id used twice.
    #[error("duplicate step id {0}")]
    DuplicateStep(StepId),
    /// Reversible step without a compensation.
    #[error("reversible step {0} declares no compensation")]
    MissingCompensation(StepId),
    /// Capability is not cataloged.
    #[error("unknown capability {0}")]
    UnknownCapability(CapabilityName),
    /// Compensation targets an irreversible capability.
    #[error("compensation for step {0} is irreversible")]
    IrreversibleCompensation(StepId),
    /// Registry state unavailable.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl PlanError {
    /// Stable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Empty => "plan_empty",
            Self::TooManySteps(_) => "plan_too_large",
            Self::DuplicateStep(_) => "duplicate_step",
            Self::MissingCompensation(_) => "missing_compensation",
            Self::UnknownCapability(_) => "unknown_capability",
            Self::IrreversibleCompensation(_) => "irreversible_compensation",
            Self::Registry(err) => err.code(),
        }
    }
}

// ============================================================================
// SECTION: Engine
// ============================================================================

/// Plan executor on top of the router.
pub struct IntentEngine {
    /// Router every step is dispatched through.
    router: Arc<ContextRouter>,
}

impl IntentEngine {
    /// Creates an engine dispatching through `router`.
    #[must_use]
    pub const fn new(router: Arc<ContextRouter>) -> Self {
        Self {
            router,
        }
    }

    /// Executes `plan` and reports which steps committed and were compensated.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError`] when the plan fails validation; no step runs.
    pub async fn execute(&self, plan: &Plan) -> Result<PlanResult, PlanError> {
        let effects = self.validate(plan)?;
        info!(plan_id = %plan.plan_id, steps = plan.steps.len(), "plan started");

        let mut committed = Vec::new();
        let mut payloads = Vec::new();
        let mut pending: Vec<(&StepId, &Compensation)> = Vec::new();
        let mut irreversible_committed = false;
        let mut failure = None;
        for (step, effect) in plan.steps.iter().zip(effects) {
            let mut request =
                self.request(plan, &step.step_id, PlanRole::Step, &step.capability, &step.params);
            if let Some(deadline_ms) = step.deadline_ms {
                request.deadline_ms = deadline_ms;
            }
            let reason = match self.router.dispatch(request).await {
                Ok(response) if response.is_success() => {
                    let payload = response.payload.unwrap_or(Value::Null);
                    committed.push(step.step_id.clone());
                    match (effect, &step.compensation) {
                        (SideEffect::Reversible, Some(compensation)) => {
                            pending.push((&step.step_id, compensation));
                        }
                        (SideEffect::Irreversible, _) => irreversible_committed = true,
                        _ => {}
                    }
                    let held = step.check.as_ref().is_none_or(|check| check.holds(&payload));
                    payloads.push(payload);
                    if held {
                        continue;
                    }
                    CHECK_FAILED.to_string()
                }
                Ok(response) => {
                    response.reason.unwrap_or_else(|| response.status.as_str().to_string())
                }
                Err(err) => err.code().to_string(),
            };
            warn!(
                plan_id = %plan.plan_id,
                step_id = %step.step_id,
                reason = %reason,
                "plan step failed"
            );
            failure = Some((
                StepFailure {
                    step_id: step.step_id.clone(),
                    reason,
                },
                effect == SideEffect::Irreversible,
            ));
            break;
        }

        let Some((failure, failed_irreversible)) = failure else {
            info!(plan_id = %plan.plan_id, "plan completed");
            return Ok(PlanResult {
                plan_id: plan.plan_id.clone(),
                outcome: PlanOutcome::Completed,
                committed,
                compensated: Vec::new(),
                compensation_failures: Vec::new(),
                failure: None,
                payloads,
            });
        };

        let mut compensated = Vec::new();
        let mut compensation_failures = Vec::new();
        for (step_id, compensation) in pending.into_iter().rev() {
            let request = self.request(
                plan,
                step_id,
                PlanRole::Compensation,
                &compensation.capability,
                &compensation.params,
            );
            match self.router.dispatch(request).await {
                Ok(response) if response.is_success() => compensated.push(step_id.clone()),
                Ok(response) => {
                    warn!(
                        plan_id = %plan.plan_id,
                        step_id = %step_id,
                        status = response.status.as_str(),
                        "compensation failed"
                    );
                    compensation_failures.push(step_id.clone());
                }
                Err(err) => {
                    warn!(
                        plan_id = %plan.plan_id,
                        step_id = %step_id,
                        error = %err,
                        "compensation rejected"
                    );
                    compensation_failures.push(step_id.clone());
                }
            }
        }

        let outcome = if failed_irreversible
            || irreversible_committed
            || !compensation_failures.is_empty()
        {
            PlanOutcome::Partial
        } else {
            PlanOutcome::RolledBack
        };
        info!(
            plan_id = %plan.plan_id,
            compensated = compensated.len(),
            compensation_failures = compensation_failures.len(),
            "plan rolled back"
        );
        Ok(PlanResult {
            plan_id: plan.plan_id.clone(),
            outcome,
            committed,
            compensated,
            compensation_failures,
            failure: Some(failure),
            payloads,
        })
    }

    /// Validates the plan and returns each step's side-effect class.
    fn validate(&self, plan: &Plan) -> Result<Vec<SideEffect>, PlanError> {
        if plan.steps.is_empty() {
            return Err(PlanError::Empty);
        }
        if plan.steps.len() > MAX_PLAN_STEPS {
            return Err(PlanError::TooManySteps(plan.steps.len()));
        }
        let registry = self.router.registry();
        let mut seen = BTreeSet::new();
        let mut effects = Vec::with_capacity(plan.steps.len());
        for step in &plan.steps {
            if !seen.insert(&step.step_id) {
                return Err(PlanError::DuplicateStep(step.step_id.clone()));
            }
            let capability = registry
                .capability(&step.capability)?
                .ok_or_else(|| PlanError::UnknownCapability(step.capability.clone()))?;
            if capability.is_reversible() && step.compensation.is_none() {
                return Err(PlanError::MissingCompensation(step.step_id.clone()));
            }
            if let Some(compensation) = &step.compensation {
                let target = registry
                    .capability(&compensation.capability)?
                    .ok_or_else(|| PlanError::UnknownCapability(compensation.capability.clone()))?;
                if target.is_irreversible() {
                    return Err(PlanError::IrreversibleCompensation(step.step_id.clone()));
                }
            }
            effects.push(capability.side_effect);
        }
        Ok(effects)
    }

    /// Builds a plan-linked request with the router's default deadline.
    fn request(
        &self,
        plan: &Plan,
        step_id: &StepId,
        role: PlanRole,
        capability: &CapabilityName,
        params: &Value,
    ) -> Request {
        Request::new(
            plan.session_id.clone(),
            capability.clone(),
            params.clone(),
            self.router.settings().default_deadline_ms,
        )
        .with_plan(PlanLink {
            plan_id: plan.plan_id.clone(),
            step_id: step_id.clone(),
            role,
        })
    }
}
