// crates/nerve-router/src/router.rs
// ============================================================================
// Module: Context Router
// Description: Request validation, authorization, provider dispatch, and audit.
// Purpose: Turn one request into exactly one audited, typed outcome.
// Dependencies: nerve-config, nerve-core, nerve-providers, serde_json, tokio, tracing
// ============================================================================

//! ## Overview
//! Dispatch is split in two phases. [`ContextRouter::prepare`] validates the
//! request, assigns its id, registers it for cancellation, and takes the
//! session's ordering ticket; it runs synchronously so callers preserve
//! submission order. [`ContextRouter::run`] waits for the session turn,
//! authorizes, resolves providers, invokes them under a bounded deadline,
//! and appends the audit entry before returning the response.
//!
//! Security posture: denials never reach a provider, irreversible
//! capabilities are attempted at most once, and policy rule ids are only
//! disclosed to system requestors.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use nerve_config::RouterConfig;
use nerve_core::AttemptOutcome;
use nerve_core::AttemptRecord;
use nerve_core::AuditOutcome;
use nerve_core::AuditRecord;
use nerve_core::CancelHandle;
use nerve_core::CancelSignal;
use nerve_core::Capability;
use nerve_core::CapabilityName;
use nerve_core::Clock;
use nerve_core::DenyReason;
use nerve_core::InvocationContext;
use nerve_core::ProviderError;
use nerve_core::ProviderId;
use nerve_core::Request;
use nerve_core::RequestId;
use nerve_core::Requestor;
use nerve_core::RequestorClass;
use nerve_core::Response;
use nerve_core::Verdict;
use nerve_core::cancel_pair;
use nerve_providers::Candidate;
use nerve_providers::ProviderRegistry;
use nerve_providers::RegistryError;
use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinError;
use tokio::time::Instant;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::audit::AuditError;
use crate::audit::AuditLog;
use crate::guard::Authorization;
use crate::guard::PermissionGuard;
use crate::guard::QUEUE_RULE_ID;
use crate::guard::SESSION_RULE_ID;
use crate::guard::TOKEN_RULE_ID;
use crate::session::SessionError;
use crate::session::SessionLease;
use crate::session::SessionManager;
use crate::telemetry::DispatchMetricEvent;
use crate::telemetry::NoopMetrics;
use crate::telemetry::RouterMetrics;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Attempts allowed for read and reversible capabilities.
const MAX_ATTEMPTS: usize = 2;
/// Attempts allowed for irreversible capabilities.
const MAX_IRREVERSIBLE_ATTEMPTS: usize = 1;

// ============================================================================
// SECTION: Settings
// ============================================================================

/// Router timing and size limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterSettings {
    /// Deadline applied by front-ends when a request omits one.
    pub default_deadline_ms: u64,
    /// Largest accepted deadline.
    pub max_deadline_ms: u64,
    /// Upper bound for one provider attempt.
    pub attempt_timeout_ms: u64,
    /// Wind-down time granted to a cancelled provider.
    pub cancel_grace_ms: u64,
    /// Maximum serialized parameter size.
    pub max_params_bytes: usize,
}

impl RouterSettings {
    /// Builds settings from validated configuration.
    #[must_use]
    pub const fn from_config(config: &RouterConfig) -> Self {
        Self {
            default_deadline_ms: config.default_deadline_ms,
            max_deadline_ms: config.max_deadline_ms,
            attempt_timeout_ms: config.attempt_timeout_ms,
            cancel_grace_ms: config.cancel_grace_ms,
            max_params_bytes: config.max_params_bytes,
        }
    }
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self::from_config(&RouterConfig::default())
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Dispatch failures that do not produce a routed outcome.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Request failed validation; never audited.
    #[error("malformed request: {0}")]
    Malformed(String),
    /// Audit append failed; the response is withheld.
    #[error(transparent)]
    Audit(#[from] AuditError),
    /// Registry state unavailable.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl DispatchError {
    /// Stable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed_request",
            Self::Audit(err) => err.code(),
            Self::Registry(err) => err.code(),
        }
    }
}

/// Why a single provider attempt failed.
#[derive(Debug)]
enum AttemptFailure {
    /// Provider returned an error.
    Provider(ProviderError),
    /// Payload did not match the declared output shape.
    OutputShape(String),
    /// Attempt budget ran out.
    Deadline,
    /// Request was cancelled.
    Cancelled,
    /// Provider task panicked or registry state was unavailable.
    Internal(String),
}

impl AttemptFailure {
    /// Stable code recorded in the attempt and surfaced as the reason.
    const fn code(&self) -> &'static str {
        match self {
            Self::Provider(err) => err.code(),
            Self::OutputShape(_) => "output_shape_mismatch",
            Self::Deadline => "deadline_exceeded",
            Self::Cancelled => "cancelled",
            Self::Internal(_) => "provider_crashed",
        }
    }

    /// Diagnostic text kept for logs; never surfaced to requestors.
    fn detail(&self) -> Option<&str> {
        match self {
            Self::OutputShape(detail) | Self::Internal(detail) => Some(detail),
            Self::Provider(_) | Self::Deadline | Self::Cancelled => None,
        }
    }

    /// Attempt classification.
    const fn attempt_outcome(&self) -> AttemptOutcome {
        match self {
            Self::Deadline => AttemptOutcome::Timeout,
            Self::Cancelled | Self::Provider(ProviderError::Cancelled) => AttemptOutcome::Cancelled,
            Self::Provider(_) | Self::OutputShape(_) | Self::Internal(_) => AttemptOutcome::Error,
        }
    }

    /// Terminal outcome when this is the final failure.
    const fn audit_outcome(&self) -> AuditOutcome {
        match self {
            Self::Deadline | Self::Cancelled | Self::Provider(ProviderError::Cancelled) => {
                AuditOutcome::Timeout
            }
            Self::Provider(_) | Self::OutputShape(_) | Self::Internal(_) => {
                AuditOutcome::ProviderError
            }
        }
    }
}

// ============================================================================
// SECTION: Prepared Requests
// ============================================================================

/// In-flight cancellation handles keyed by request id.
type InflightTable = Arc<Mutex<HashMap<RequestId, CancelHandle>>>;

/// Removes a request from the in-flight table on drop.
struct InflightGuard {
    /// Shared table.
    table: InflightTable,
    /// Registered request.
    request_id: RequestId,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        lock_inflight(&self.table).remove(&self.request_id);
    }
}

/// A validated request holding its session ticket.
pub struct PreparedDispatch {
    /// Assigned request id.
    request_id: RequestId,
    /// Normalized request.
    request: Request,
    /// Session lease, or the reason the session could not be used.
    lease: Result<SessionLease, SessionError>,
    /// Request-level cancellation.
    cancel: CancelSignal,
    /// Submission time.
    started: Instant,
    /// Absolute deadline.
    deadline: Instant,
    /// In-flight registration.
    inflight: InflightGuard,
}

impl PreparedDispatch {
    /// Assigned request id.
    #[must_use]
    pub const fn request_id(&self) -> &RequestId {
        &self.request_id
    }
}

/// Request identity carried to the audit append.
struct Call<'a> {
    /// Request id.
    request_id: &'a RequestId,
    /// Request.
    request: &'a Request,
    /// Submission time.
    started: Instant,
}

/// Everything recorded for a terminal outcome.
struct Settlement {
    /// Guard verdict.
    verdict: Verdict,
    /// Deciding rule.
    rule_id: String,
    /// Policy version consulted.
    policy_version: u64,
    /// Terminal outcome.
    outcome: AuditOutcome,
    /// Reason code.
    reason: Option<String>,
    /// Provider of the final attempt.
    provider_id: Option<ProviderId>,
    /// Provider attempts.
    attempts: Vec<AttemptRecord>,
    /// Success payload.
    payload: Option<Value>,
}

impl Settlement {
    /// Settlement for a request that never reached a provider.
    fn denied(verdict: Verdict, rule_id: String, policy_version: u64) -> Self {
        Self {
            verdict,
            rule_id,
            policy_version,
            outcome: AuditOutcome::Denied,
            reason: verdict.reason_code().map(str::to_string),
            provider_id: None,
            attempts: Vec::new(),
            payload: None,
        }
    }
}

// ============================================================================
// SECTION: Router
// ============================================================================

/// Dispatch core orchestrating sessions, guard, registry, and audit.
pub struct ContextRouter {
    /// Provider registry live view.
    registry: Arc<ProviderRegistry>,
    /// Session manager.
    sessions: SessionManager,
    /// Permission guard.
    guard: PermissionGuard,
    /// Audit log.
    audit: Arc<AuditLog>,
    /// Metrics sink.
    metrics: Arc<dyn RouterMetrics>,
    /// Time source for audit and authorization timestamps.
    clock: Arc<dyn Clock>,
    /// Limits.
    settings: RouterSettings,
    /// In-flight requests.
    inflight: InflightTable,
    /// Generated request id counter.
    next_request: AtomicU64,
}

impl ContextRouter {
    /// Creates a router over the given components.
    #[must_use]
    pub fn new(
        registry: Arc<ProviderRegistry>,
        sessions: SessionManager,
        guard: PermissionGuard,
        audit: Arc<AuditLog>,
        clock: Arc<dyn Clock>,
        settings: RouterSettings,
    ) -> Self {
        Self {
            registry,
            sessions,
            guard,
            audit,
            metrics: Arc::new(NoopMetrics),
            clock,
            settings,
            inflight: Arc::new(Mutex::new(HashMap::new())),
            next_request: AtomicU64::new(1),
        }
    }

    /// Replaces the metrics sink.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn RouterMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Router limits.
    #[must_use]
    pub const fn settings(&self) -> &RouterSettings {
        &self.settings
    }

    /// Session manager.
    #[must_use]
    pub const fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Provider registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Audit log.
    #[must_use]
    pub const fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    /// Validates and dispatches one request.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Malformed`] for invalid requests and
    /// [`DispatchError::Audit`] when the outcome could not be recorded.
    pub async fn dispatch(&self, request: Request) -> Result<Response, DispatchError> {
        let prepared = self.prepare(request)?;
        self.run(prepared).await
    }

    /// Signals cancellation of an in-flight request.
    ///
    /// Returns false when the request is not in flight.
    pub fn cancel(&self, request_id: &RequestId) -> bool {
        let table = lock_inflight(&self.inflight);
        let Some(handle) = table.get(request_id) else {
            return false;
        };
        handle.cancel();
        info!(request_id = %request_id, "request cancellation signalled");
        true
    }

    /// Number of requests currently in flight.
    #[must_use]
    pub fn inflight(&self) -> usize {
        lock_inflight(&self.inflight).len()
    }

    // ------------------------------------------------------------------------
    // Phase one
    // ------------------------------------------------------------------------

    /// Validates a request and takes its session ticket.
    ///
    /// Session failures are not errors here; they settle as denials in
    /// [`ContextRouter::run`].
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Malformed`] when validation fails.
    pub fn prepare(&self, mut request: Request) -> Result<PreparedDispatch, DispatchError> {
        let supplied = request.request_id.take();
        if let Err(err) = self.validate(supplied.as_ref(), &mut request) {
            warn!(
                request_id = supplied.as_ref().map_or("", RequestId::as_str),
                session_id = %request.session_id,
                capability = %request.capability,
                error = %err,
                "malformed request rejected"
            );
            return Err(err);
        }
        let (handle, cancel) = cancel_pair();
        let request_id = {
            // Settled requests are audited before leaving the table, so an id
            // is always visible in one of the two while the lock is held.
            let mut table = lock_inflight(&self.inflight);
            let request_id = match supplied {
                Some(id) => {
                    if table.contains_key(&id) || self.audit.contains_request(&id)? {
                        warn!(request_id = %id, "reused request id rejected");
                        return Err(DispatchError::Malformed(format!(
                            "request id {id} was already used"
                        )));
                    }
                    id
                }
                None => loop {
                    let id = self.next_request_id();
                    if !table.contains_key(&id) && !self.audit.contains_request(&id)? {
                        break id;
                    }
                },
            };
            table.insert(request_id.clone(), handle);
            request_id
        };
        let inflight = InflightGuard {
            table: Arc::clone(&self.inflight),
            request_id: request_id.clone(),
        };
        let lease = self.sessions.begin_request(&request.session_id);
        let started = Instant::now();
        let deadline = started + Duration::from_millis(request.deadline_ms);
        Ok(PreparedDispatch {
            request_id,
            request,
            lease,
            cancel,
            started,
            deadline,
            inflight,
        })
    }

    /// Checks request shape and limits; normalizes null params to an object.
    fn validate(
        &self,
        request_id: Option<&RequestId>,
        request: &mut Request,
    ) -> Result<(), DispatchError> {
        if request_id.is_some_and(|id| id.as_str().trim().is_empty()) {
            return Err(DispatchError::Malformed("request id must not be empty".to_string()));
        }
        if request.deadline_ms == 0 {
            return Err(DispatchError::Malformed("deadline_ms must be positive".to_string()));
        }
        if request.deadline_ms > self.settings.max_deadline_ms {
            return Err(DispatchError::Malformed(format!(
                "deadline_ms exceeds {}",
                self.settings.max_deadline_ms
            )));
        }
        if request.params.is_null() {
            request.params = Value::Object(serde_json::Map::new());
        }
        if !request.params.is_object() {
            return Err(DispatchError::Malformed("params must be an object".to_string()));
        }
        let size = serde_json::to_vec(&request.params)
            .map_err(|err| DispatchError::Malformed(err.to_string()))?
            .len();
        if size > self.settings.max_params_bytes {
            return Err(DispatchError::Malformed(format!(
                "params of {size} bytes exceed {}",
                self.settings.max_params_bytes
            )));
        }
        if let Err(violation) =
            self.registry.validate_input(&request.capability, &request.params)?
        {
            return Err(DispatchError::Malformed(violation.to_string()));
        }
        Ok(())
    }

    /// Generates the next request id.
    fn next_request_id(&self) -> RequestId {
        let next = self.next_request.fetch_add(1, Ordering::Relaxed);
        RequestId::new(format!("req-{next:08}"))
    }

    // ------------------------------------------------------------------------
    // Phase two
    // ------------------------------------------------------------------------

    /// Runs a prepared request to its terminal outcome.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Audit`] when the outcome could not be recorded
    /// and [`DispatchError::Registry`] when registry state is unavailable.
    pub async fn run(&self, prepared: PreparedDispatch) -> Result<Response, DispatchError> {
        let PreparedDispatch {
            request_id,
            request,
            lease,
            cancel,
            started,
            deadline,
            inflight: _inflight,
        } = prepared;
        let call = Call {
            request_id: &request_id,
            request: &request,
            started,
        };

        let lease = match lease {
            Ok(lease) => lease,
            Err(err) => return self.finish(&call, None, self.session_denial(&err)),
        };
        let interruption = tokio::select! {
            biased;
            () = lease.wait_turn() => None,
            () = tokio::time::sleep_until(deadline) => Some(AttemptFailure::Deadline),
            () = cancel.cancelled() => Some(AttemptFailure::Cancelled),
        };
        if let Some(failure) = interruption {
            let session = lease.snapshot().ok();
            debug!(
                request_id = %request_id,
                code = failure.code(),
                "request settled while waiting for session turn"
            );
            return self.finish(
                &call,
                session.as_ref().map(|session| &session.requestor),
                self.unserved(&failure),
            );
        }
        let session = match lease.snapshot() {
            Ok(session) => session,
            Err(err) => return self.finish(&call, None, self.session_denial(&err)),
        };
        let requestor = &session.requestor;

        let capability = self.registry.capability(&request.capability)?;
        let Authorization {
            decision,
            token,
        } = self.guard.authorize(
            &request_id,
            &session,
            capability.as_ref(),
            &request.capability,
            &request.params,
            self.clock.now(),
        );
        let Some(token) = token else {
            debug!(
                request_id = %request_id,
                rule_id = %decision.rule_id,
                verdict = decision.verdict.as_str(),
                "request denied"
            );
            return self.finish(
                &call,
                Some(requestor),
                Settlement::denied(decision.verdict, decision.rule_id, decision.policy_version),
            );
        };

        let candidates = self.registry.resolve(&request.capability)?;
        if candidates.is_empty() {
            return self.finish(
                &call,
                Some(requestor),
                Settlement {
                    verdict: decision.verdict,
                    rule_id: decision.rule_id,
                    policy_version: decision.policy_version,
                    outcome: AuditOutcome::NoProvider,
                    reason: Some("no_provider".to_string()),
                    provider_id: None,
                    attempts: Vec::new(),
                    payload: None,
                },
            );
        }
        if let Err(reason) = self.guard.redeem(token, lease.grant_epoch()) {
            return self.finish(
                &call,
                Some(requestor),
                Settlement::denied(
                    Verdict::DenyWithReason(reason),
                    TOKEN_RULE_ID.to_string(),
                    self.guard.policy_version(),
                ),
            );
        }

        let irreversible = capability.as_ref().is_some_and(Capability::is_irreversible);
        let max_attempts = if irreversible { MAX_IRREVERSIBLE_ATTEMPTS } else { MAX_ATTEMPTS };
        let mut attempts = Vec::new();
        let mut last_failure = AttemptFailure::Deadline;
        let mut last_provider = None;
        let mut success = None;
        for candidate in candidates.iter().take(max_attempts) {
            if cancel.is_cancelled() {
                last_failure = AttemptFailure::Cancelled;
                break;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                last_failure = AttemptFailure::Deadline;
                break;
            }
            let budget = remaining.min(Duration::from_millis(self.settings.attempt_timeout_ms));
            let attempt_started = Instant::now();
            let result =
                self.attempt(candidate, &request_id, &request, requestor, budget, &cancel).await;
            let elapsed_ms = duration_millis(attempt_started.elapsed());
            last_provider = Some(candidate.provider_id.clone());
            match result {
                Ok(payload) => {
                    attempts.push(AttemptRecord {
                        provider_id: candidate.provider_id.clone(),
                        outcome: AttemptOutcome::Success,
                        elapsed_ms,
                        error_code: None,
                    });
                    self.report(&candidate.provider_id, true);
                    success = Some(payload);
                    break;
                }
                Err(failure) => {
                    debug!(
                        request_id = %request_id,
                        provider_id = %candidate.provider_id,
                        code = failure.code(),
                        detail = failure.detail(),
                        "provider attempt failed"
                    );
                    attempts.push(AttemptRecord {
                        provider_id: candidate.provider_id.clone(),
                        outcome: failure.attempt_outcome(),
                        elapsed_ms,
                        error_code: Some(failure.code().to_string()),
                    });
                    let stop = matches!(failure, AttemptFailure::Cancelled);
                    if !stop {
                        self.report(&candidate.provider_id, false);
                    }
                    last_failure = failure;
                    if stop {
                        break;
                    }
                }
            }
        }

        let settlement = match success {
            Some(payload) => Settlement {
                verdict: decision.verdict,
                rule_id: decision.rule_id,
                policy_version: decision.policy_version,
                outcome: AuditOutcome::Success,
                reason: None,
                provider_id: last_provider,
                attempts,
                payload: Some(payload),
            },
            None => Settlement {
                verdict: decision.verdict,
                rule_id: decision.rule_id,
                policy_version: decision.policy_version,
                outcome: last_failure.audit_outcome(),
                reason: Some(last_failure.code().to_string()),
                provider_id: last_provider,
                attempts,
                payload: None,
            },
        };
        self.finish(&call, Some(requestor), settlement)
    }

    /// Invokes one candidate under `budget`, honoring request cancellation.
    async fn attempt(
        &self,
        candidate: &Candidate,
        request_id: &RequestId,
        request: &Request,
        requestor: &Requestor,
        budget: Duration,
        cancel: &CancelSignal,
    ) -> Result<Value, AttemptFailure> {
        let (attempt_cancel, attempt_signal) = cancel_pair();
        let ctx = InvocationContext {
            request_id: request_id.clone(),
            session_id: request.session_id.clone(),
            requestor: requestor.clone(),
            deadline_ms: duration_millis(budget),
            cancel: attempt_signal,
        };
        let handler = Arc::clone(&candidate.handler);
        let capability = request.capability.clone();
        let params = request.params.clone();
        let mut task =
            tokio::spawn(async move { handler.invoke(&capability, &params, &ctx).await });

        let interruption = tokio::select! {
            joined = &mut task => return self.settle_attempt(&request.capability, joined),
            () = tokio::time::sleep(budget) => AttemptFailure::Deadline,
            () = cancel.cancelled() => AttemptFailure::Cancelled,
        };
        attempt_cancel.cancel();
        let grace = Duration::from_millis(self.settings.cancel_grace_ms);
        if tokio::time::timeout(grace, &mut task).await.is_err() {
            task.abort();
            warn!(
                request_id = %request_id,
                provider_id = %candidate.provider_id,
                "provider abandoned after cancellation grace"
            );
        }
        Err(interruption)
    }

    /// Classifies a finished provider task and checks its output shape.
    fn settle_attempt(
        &self,
        capability: &CapabilityName,
        joined: Result<Result<Value, ProviderError>, JoinError>,
    ) -> Result<Value, AttemptFailure> {
        let payload = match joined {
            Ok(result) => result.map_err(AttemptFailure::Provider)?,
            Err(err) => return Err(AttemptFailure::Internal(err.to_string())),
        };
        match self.registry.validate_output(capability, &payload) {
            Ok(Ok(())) => Ok(payload),
            Ok(Err(violation)) => Err(AttemptFailure::OutputShape(violation.to_string())),
            Err(err) => Err(AttemptFailure::Internal(err.to_string())),
        }
    }

    /// Feeds an attempt result into provider health tracking.
    fn report(&self, provider_id: &ProviderId, succeeded: bool) {
        let reported = if succeeded {
            self.registry.report_success(provider_id)
        } else {
            self.registry.report_failure(provider_id)
        };
        if let Err(err) = reported {
            debug!(provider_id = %provider_id, error = %err, "provider health report skipped");
        }
    }

    /// Denial for a session that could not be used.
    fn session_denial(&self, err: &SessionError) -> Settlement {
        let reason = match err {
            SessionError::Expired(_) => DenyReason::SessionExpired,
            _ => DenyReason::SessionUnavailable,
        };
        Settlement::denied(
            Verdict::DenyWithReason(reason),
            SESSION_RULE_ID.to_string(),
            self.guard.policy_version(),
        )
    }

    /// Settlement for a request interrupted before its session turn.
    fn unserved(&self, failure: &AttemptFailure) -> Settlement {
        Settlement {
            verdict: Verdict::DenyWithReason(DenyReason::Unserved),
            rule_id: QUEUE_RULE_ID.to_string(),
            policy_version: self.guard.policy_version(),
            outcome: failure.audit_outcome(),
            reason: Some(failure.code().to_string()),
            provider_id: None,
            attempts: Vec::new(),
            payload: None,
        }
    }

    /// Appends the audit entry, records metrics, and builds the response.
    fn finish(
        &self,
        call: &Call<'_>,
        requestor: Option<&Requestor>,
        settlement: Settlement,
    ) -> Result<Response, DispatchError> {
        let Settlement {
            verdict,
            rule_id,
            policy_version,
            outcome,
            reason,
            provider_id,
            attempts,
            payload,
        } = settlement;
        let attempt_count = attempts.len();
        let record = AuditRecord {
            request_id: call.request_id.clone(),
            session_id: call.request.session_id.clone(),
            requestor_id: requestor.map(|requestor| requestor.id.clone()),
            capability: call.request.capability.clone(),
            plan: call.request.plan.clone(),
            verdict,
            rule_id: rule_id.clone(),
            policy_version,
            provider_id: provider_id.clone(),
            attempts,
            outcome,
            reason: reason.clone(),
            recorded_at: self.clock.now(),
        };
        let audit_sequence = self.audit.append(record)?;
        self.metrics.record_dispatch(
            &DispatchMetricEvent {
                capability: call.request.capability.clone(),
                requestor_class: requestor.map(|requestor| requestor.class),
                outcome,
                attempts: attempt_count,
            },
            call.started.elapsed(),
        );
        info!(
            request_id = %call.request_id,
            session_id = %call.request.session_id,
            capability = %call.request.capability,
            outcome = outcome.as_str(),
            audit_sequence,
            "request settled"
        );
        let disclose = requestor.is_some_and(|requestor| requestor.class == RequestorClass::System);
        Ok(Response {
            request_id: call.request_id.clone(),
            status: outcome,
            payload,
            reason,
            provider_id,
            rule_id: disclose.then_some(rule_id),
            audit_sequence,
        })
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Locks the in-flight table, recovering from poisoning.
fn lock_inflight(
    table: &Mutex<HashMap<RequestId, CancelHandle>>,
) -> MutexGuard<'_, HashMap<RequestId, CancelHandle>> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Converts a duration to whole milliseconds, saturating.
fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
