// crates/nerve-providers/src/registry.rs
// ============================================================================
// Module: Provider Registry
// Description: Live registry of providers, capabilities, and liveness.
// Purpose: Resolve capability names to ordered, eligible provider candidates.
// Dependencies: nerve-core, nerve-config, jsonschema, serde_json, tracing
// ============================================================================

//! ## Overview
//! The registry owns two maps: provider records keyed by [`ProviderId`] and a
//! capability catalog keyed by [`CapabilityName`]. A capability definition is
//! immutable once cataloged; a provider may only offer the same definition or
//! a strictly higher version, which then supersedes it.
//!
//! Liveness is derived at read time from missed heartbeat intervals and
//! consecutive failures, so lookups always see current state without a
//! background task. [`ProviderRegistry::sweep`] persists the derived state
//! and evicts providers that stayed unreachable for too long.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::RwLock;
use std::sync::RwLockReadGuard;
use std::sync::RwLockWriteGuard;

use jsonschema::Validator;
use nerve_config::RegistryConfig;
use nerve_core::Capability;
use nerve_core::CapabilityError;
use nerve_core::CapabilityName;
use nerve_core::Clock;
use nerve_core::ContextProvider;
use nerve_core::DataShape;
use nerve_core::Liveness;
use nerve_core::ProviderId;
use nerve_core::ProviderStatus;
use nerve_core::Timestamp;
use nerve_core::TrustTier;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use tracing::info;
use tracing::warn;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum capabilities one provider may declare.
pub const MAX_CAPABILITIES_PER_PROVIDER: usize = 256;
/// Maximum schema violations reported for one payload.
const MAX_REPORTED_VIOLATIONS: usize = 8;

// ============================================================================
// SECTION: Liveness Policy
// ============================================================================

/// Heartbeat and failure thresholds driving liveness transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessPolicy {
    /// Expected heartbeat interval.
    pub heartbeat_interval_ms: u64,
    /// Missed intervals before `degraded`.
    pub degraded_after_missed: u32,
    /// Missed intervals before `unreachable`.
    pub unreachable_after_missed: u32,
    /// Missed intervals before eviction.
    pub evict_after_missed: u32,
    /// Consecutive failures before `degraded`.
    pub degraded_after_failures: u32,
}

impl LivenessPolicy {
    /// Builds a policy from registry configuration.
    #[must_use]
    pub const fn from_config(config: &RegistryConfig) -> Self {
        Self {
            heartbeat_interval_ms: config.heartbeat_interval_ms,
            degraded_after_missed: config.degraded_after_missed,
            unreachable_after_missed: config.unreachable_after_missed,
            evict_after_missed: config.evict_after_missed,
            degraded_after_failures: config.degraded_after_failures,
        }
    }

    /// Returns heartbeat intervals missed between `last` and `now`.
    fn missed(&self, last: Timestamp, now: Timestamp) -> u64 {
        now.millis_since(last) / self.heartbeat_interval_ms.max(1)
    }

    /// Derives liveness for a record at `now`.
    fn derive(&self, record: &ProviderRecord, now: Timestamp) -> Liveness {
        let missed = self.missed(record.last_heartbeat, now);
        if missed >= u64::from(self.unreachable_after_missed) {
            Liveness::Unreachable
        } else if missed >= u64::from(self.degraded_after_missed)
            || record.consecutive_failures >= self.degraded_after_failures
        {
            Liveness::Degraded
        } else {
            Liveness::Active
        }
    }
}

impl Default for LivenessPolicy {
    fn default() -> Self {
        Self::from_config(&RegistryConfig::default())
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Provider identifier already registered.
    #[error("provider already registered: {0}")]
    DuplicateProvider(ProviderId),
    /// Capability name is cataloged with a different definition at the same or higher version.
    #[error("capability {name} already registered at version {existing}")]
    DuplicateCapability {
        /// Capability name.
        name: CapabilityName,
        /// Version currently cataloged.
        existing: u32,
    },
    /// Capability descriptor is invalid.
    #[error(transparent)]
    InvalidCapability(#[from] CapabilityError),
    /// Data shape schema failed to compile.
    #[error("capability {name} has invalid shape {shape_id}: {message}")]
    InvalidShape {
        /// Capability name.
        name: CapabilityName,
        /// Shape identifier.
        shape_id: String,
        /// Compiler message.
        message: String,
    },
    /// Registration declared no capabilities or too many.
    #[error("provider must declare between 1 and {MAX_CAPABILITIES_PER_PROVIDER} capabilities")]
    CapabilityCount,
    /// Unknown provider.
    #[error("unknown provider: {0}")]
    UnknownProvider(ProviderId),
    /// Internal lock was poisoned.
    #[error("provider registry lock poisoned")]
    Poisoned,
}

impl RegistryError {
    /// Stable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::DuplicateProvider(_) => "duplicate_provider",
            Self::DuplicateCapability {
                ..
            } => "duplicate_capability",
            Self::InvalidCapability(_) => "invalid_capability",
            Self::InvalidShape {
                ..
            } => "invalid_shape",
            Self::CapabilityCount => "capability_count",
            Self::UnknownProvider(_) => "unknown_provider",
            Self::Poisoned => "registry_poisoned",
        }
    }
}

/// Payload failed a capability data shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("payload violates shape {shape_id}: {}", .violations.join("; "))]
pub struct ShapeViolation {
    /// Shape identifier.
    pub shape_id: String,
    /// Validation messages, truncated.
    pub violations: Vec<String>,
}

// ============================================================================
// SECTION: Records
// ============================================================================

/// Provider candidate returned by [`ProviderRegistry::resolve`].
#[derive(Clone)]
pub struct Candidate {
    /// Provider identifier.
    pub provider_id: ProviderId,
    /// Trust tier.
    pub tier: TrustTier,
    /// Liveness at resolution time.
    pub liveness: Liveness,
    /// Provider implementation.
    pub handler: Arc<dyn ContextProvider>,
}

/// Outcome of a liveness sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Providers whose persisted liveness changed.
    pub transitioned: Vec<(ProviderId, Liveness)>,
    /// Providers evicted.
    pub evicted: Vec<ProviderId>,
}

/// Registry-owned provider state.
struct ProviderRecord {
    /// Provider implementation.
    handler: Arc<dyn ContextProvider>,
    /// Trust tier.
    tier: TrustTier,
    /// Declared capabilities.
    capabilities: BTreeMap<CapabilityName, Capability>,
    /// Registration time.
    registered_at: Timestamp,
    /// Most recent heartbeat.
    last_heartbeat: Timestamp,
    /// Most recent heartbeat or successful invocation.
    last_healthy: Timestamp,
    /// Liveness persisted by the last sweep.
    liveness: Liveness,
    /// Operator enablement.
    enabled: bool,
    /// Failures since the last success.
    consecutive_failures: u32,
    /// Successful invocations.
    success_count: u64,
    /// Failed invocations.
    failure_count: u64,
}

/// Cataloged capability with compiled shape validators.
struct CatalogEntry {
    /// Capability definition.
    capability: Capability,
    /// Compiled input validator.
    input: Option<Arc<Validator>>,
    /// Compiled output validator.
    output: Option<Arc<Validator>>,
}

/// State behind the registry lock.
#[derive(Default)]
struct RegistryState {
    /// Providers by id.
    providers: BTreeMap<ProviderId, ProviderRecord>,
    /// Capability catalog.
    catalog: BTreeMap<CapabilityName, CatalogEntry>,
}

impl RegistryState {
    /// Re-derives the catalog after providers leave.
    ///
    /// Each name falls back to the highest version a remaining provider still
    /// offers; names nobody offers are dropped.
    fn reconcile_catalog(&mut self) -> Result<(), RegistryError> {
        let mut fallbacks = Vec::new();
        let mut orphaned = Vec::new();
        for (name, entry) in &self.catalog {
            let offered = self
                .providers
                .values()
                .filter_map(|record| record.capabilities.get(name))
                .max_by_key(|capability| capability.version);
            match offered {
                None => orphaned.push(name.clone()),
                Some(capability) if capability.version < entry.capability.version => {
                    fallbacks.push(compile_entry(capability)?);
                }
                Some(_) => {}
            }
        }
        for name in orphaned {
            self.catalog.remove(&name);
        }
        for entry in fallbacks {
            debug!(
                capability = %entry.capability.name,
                version = entry.capability.version,
                "capability reverted to highest offered version"
            );
            self.catalog.insert(entry.capability.name.clone(), entry);
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Provider Registry
// ============================================================================

/// Live provider registry.
pub struct ProviderRegistry {
    /// Shared state.
    state: RwLock<RegistryState>,
    /// Time source.
    clock: Arc<dyn Clock>,
    /// Liveness thresholds.
    policy: LivenessPolicy,
}

impl ProviderRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, policy: LivenessPolicy) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            clock,
            policy,
        }
    }

    /// Registers a provider under `provider_id`.
    ///
    /// Capabilities already cataloged must match exactly or carry a strictly
    /// higher version, which supersedes the cataloged definition.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] on duplicates or invalid descriptors.
    pub fn register(
        &self,
        provider_id: impl Into<ProviderId>,
        handler: Arc<dyn ContextProvider>,
        capabilities: Vec<Capability>,
        tier: TrustTier,
    ) -> Result<ProviderId, RegistryError> {
        let provider_id = provider_id.into();
        if capabilities.is_empty() || capabilities.len() > MAX_CAPABILITIES_PER_PROVIDER {
            return Err(RegistryError::CapabilityCount);
        }
        let mut declared = BTreeMap::new();
        let mut compiled = Vec::with_capacity(capabilities.len());
        for capability in capabilities {
            capability.validate()?;
            if declared.contains_key(&capability.name) {
                return Err(RegistryError::DuplicateCapability {
                    name: capability.name.clone(),
                    existing: capability.version,
                });
            }
            compiled.push(compile_entry(&capability)?);
            declared.insert(capability.name.clone(), capability);
        }

        let now = self.clock.now();
        let mut state = self.write()?;
        if state.providers.contains_key(&provider_id) {
            return Err(RegistryError::DuplicateProvider(provider_id));
        }
        for entry in &compiled {
            if let Some(existing) = state.catalog.get(&entry.capability.name) {
                let same = existing.capability == entry.capability;
                if !same && entry.capability.version <= existing.capability.version {
                    return Err(RegistryError::DuplicateCapability {
                        name: entry.capability.name.clone(),
                        existing: existing.capability.version,
                    });
                }
            }
        }
        for entry in compiled {
            let supersedes = state
                .catalog
                .get(&entry.capability.name)
                .is_none_or(|existing| existing.capability.version < entry.capability.version);
            if supersedes {
                state.catalog.insert(entry.capability.name.clone(), entry);
            }
        }
        state.providers.insert(
            provider_id.clone(),
            ProviderRecord {
                handler,
                tier,
                capabilities: declared,
                registered_at: now,
                last_heartbeat: now,
                last_healthy: now,
                liveness: Liveness::Active,
                enabled: true,
                consecutive_failures: 0,
                success_count: 0,
                failure_count: 0,
            },
        );
        drop(state);
        info!(provider_id = %provider_id, tier = tier.as_str(), "provider registered");
        Ok(provider_id)
    }

    /// Removes a provider; capabilities no one else offers leave the catalog
    /// and superseded ones fall back to the highest version still offered.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownProvider`] when the id is not registered.
    pub fn deregister(&self, provider_id: &ProviderId) -> Result<(), RegistryError> {
        let mut state = self.write()?;
        if state.providers.remove(provider_id).is_none() {
            return Err(RegistryError::UnknownProvider(provider_id.clone()));
        }
        state.reconcile_catalog()?;
        drop(state);
        info!(provider_id = %provider_id, "provider deregistered");
        Ok(())
    }

    /// Returns eligible providers for `name` in priority order.
    ///
    /// Order: trust tier, then most recently healthy, then provider id.
    /// Disabled, unreachable, and stale-version providers are excluded.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Poisoned`] when the lock is poisoned.
    pub fn resolve(&self, name: &CapabilityName) -> Result<Vec<Candidate>, RegistryError> {
        let now = self.clock.now();
        let state = self.read()?;
        let Some(entry) = state.catalog.get(name) else {
            return Ok(Vec::new());
        };
        let current_version = entry.capability.version;
        let mut ranked: Vec<(TrustTier, Timestamp, &ProviderId, &ProviderRecord, Liveness)> = state
            .providers
            .iter()
            .filter(|(_, record)| record.enabled)
            .filter(|(_, record)| {
                record.capabilities.get(name).is_some_and(|cap| cap.version == current_version)
            })
            .filter_map(|(id, record)| {
                let liveness = self.policy.derive(record, now);
                (liveness != Liveness::Unreachable)
                    .then_some((record.tier, record.last_healthy, id, record, liveness))
            })
            .collect();
        ranked.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| b.1.cmp(&a.1)).then_with(|| a.2.cmp(b.2)));
        Ok(ranked
            .into_iter()
            .map(|(tier, _, id, record, liveness)| Candidate {
                provider_id: id.clone(),
                tier,
                liveness,
                handler: Arc::clone(&record.handler),
            })
            .collect())
    }

    /// Records a heartbeat.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownProvider`] when the id is not registered.
    pub fn heartbeat(&self, provider_id: &ProviderId) -> Result<(), RegistryError> {
        let now = self.clock.now();
        let mut state = self.write()?;
        let record = state
            .providers
            .get_mut(provider_id)
            .ok_or_else(|| RegistryError::UnknownProvider(provider_id.clone()))?;
        record.last_heartbeat = now;
        record.last_healthy = now;
        record.liveness = self.policy.derive(record, now);
        Ok(())
    }

    /// Records a successful invocation.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownProvider`] when the id is not registered.
    pub fn report_success(&self, provider_id: &ProviderId) -> Result<(), RegistryError> {
        let now = self.clock.now();
        let mut state = self.write()?;
        let record = state
            .providers
            .get_mut(provider_id)
            .ok_or_else(|| RegistryError::UnknownProvider(provider_id.clone()))?;
        record.consecutive_failures = 0;
        record.success_count += 1;
        record.last_healthy = now;
        record.liveness = self.policy.derive(record, now);
        Ok(())
    }

    /// Records a failed invocation.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownProvider`] when the id is not registered.
    pub fn report_failure(&self, provider_id: &ProviderId) -> Result<(), RegistryError> {
        let now = self.clock.now();
        let mut state = self.write()?;
        let record = state
            .providers
            .get_mut(provider_id)
            .ok_or_else(|| RegistryError::UnknownProvider(provider_id.clone()))?;
        record.consecutive_failures = record.consecutive_failures.saturating_add(1);
        record.failure_count += 1;
        let before = record.liveness;
        record.liveness = self.policy.derive(record, now);
        if before != record.liveness {
            warn!(
                provider_id = %provider_id,
                failures = record.consecutive_failures,
                "provider degraded after failures"
            );
        }
        Ok(())
    }

    /// Enables or disables a provider without removing it.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownProvider`] when the id is not registered.
    pub fn set_enabled(
        &self,
        provider_id: &ProviderId,
        enabled: bool,
    ) -> Result<(), RegistryError> {
        let mut state = self.write()?;
        let record = state
            .providers
            .get_mut(provider_id)
            .ok_or_else(|| RegistryError::UnknownProvider(provider_id.clone()))?;
        record.enabled = enabled;
        drop(state);
        info!(provider_id = %provider_id, enabled, "provider enablement changed");
        Ok(())
    }

    /// Persists derived liveness and evicts long-unreachable providers.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Poisoned`] when the lock is poisoned.
    pub fn sweep(&self) -> Result<SweepReport, RegistryError> {
        let now = self.clock.now();
        let mut report = SweepReport::default();
        let mut state = self.write()?;
        for (id, record) in &mut state.providers {
            if self.policy.missed(record.last_heartbeat, now)
                >= u64::from(self.policy.evict_after_missed)
            {
                report.evicted.push(id.clone());
                continue;
            }
            let derived = self.policy.derive(record, now);
            if derived != record.liveness {
                record.liveness = derived;
                report.transitioned.push((id.clone(), derived));
            }
        }
        for id in &report.evicted {
            state.providers.remove(id);
        }
        if !report.evicted.is_empty() {
            state.reconcile_catalog()?;
        }
        drop(state);
        for id in &report.evicted {
            warn!(provider_id = %id, "provider evicted after missed heartbeats");
        }
        for (id, liveness) in &report.transitioned {
            debug!(provider_id = %id, liveness = ?liveness, "provider liveness changed");
        }
        Ok(report)
    }

    /// Asks every provider for its health and records heartbeats for live ones.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Poisoned`] when the lock is poisoned.
    pub async fn probe(&self) -> Result<usize, RegistryError> {
        let handlers: Vec<(ProviderId, Arc<dyn ContextProvider>)> = self
            .read()?
            .providers
            .iter()
            .map(|(id, record)| (id.clone(), Arc::clone(&record.handler)))
            .collect();
        let mut alive = 0;
        for (id, handler) in handlers {
            if handler.health().await == Liveness::Unreachable {
                continue;
            }
            match self.heartbeat(&id) {
                Ok(()) => alive += 1,
                Err(RegistryError::UnknownProvider(_)) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(alive)
    }

    /// Returns a status snapshot for every provider.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Poisoned`] when the lock is poisoned.
    pub fn status(&self) -> Result<Vec<ProviderStatus>, RegistryError> {
        let now = self.clock.now();
        let state = self.read()?;
        Ok(state.providers.iter().map(|(id, record)| self.snapshot(id, record, now)).collect())
    }

    /// Returns a status snapshot for one provider.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownProvider`] when the id is not registered.
    pub fn provider_status(
        &self,
        provider_id: &ProviderId,
    ) -> Result<ProviderStatus, RegistryError> {
        let now = self.clock.now();
        let state = self.read()?;
        state
            .providers
            .get(provider_id)
            .map(|record| self.snapshot(provider_id, record, now))
            .ok_or_else(|| RegistryError::UnknownProvider(provider_id.clone()))
    }

    /// Returns the cataloged definition of a capability.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Poisoned`] when the lock is poisoned.
    pub fn capability(&self, name: &CapabilityName) -> Result<Option<Capability>, RegistryError> {
        Ok(self.read()?.catalog.get(name).map(|entry| entry.capability.clone()))
    }

    /// Returns every cataloged capability.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Poisoned`] when the lock is poisoned.
    pub fn capabilities(&self) -> Result<Vec<Capability>, RegistryError> {
        Ok(self.read()?.catalog.values().map(|entry| entry.capability.clone()).collect())
    }

    /// Validates parameters against the capability input shape.
    ///
    /// # Errors
    ///
    /// Returns `Ok(Err(_))` with the violation when the shape rejects `params`.
    pub fn validate_input(
        &self,
        name: &CapabilityName,
        params: &Value,
    ) -> Result<Result<(), ShapeViolation>, RegistryError> {
        let state = self.read()?;
        let Some(entry) = state.catalog.get(name) else {
            return Ok(Ok(()));
        };
        Ok(check_shape(entry.input.as_deref(), entry.capability.input_shape.as_ref(), params))
    }

    /// Validates a provider payload against the capability output shape.
    ///
    /// # Errors
    ///
    /// Returns `Ok(Err(_))` with the violation when the shape rejects `payload`.
    pub fn validate_output(
        &self,
        name: &CapabilityName,
        payload: &Value,
    ) -> Result<Result<(), ShapeViolation>, RegistryError> {
        let state = self.read()?;
        let Some(entry) = state.catalog.get(name) else {
            return Ok(Ok(()));
        };
        Ok(check_shape(entry.output.as_deref(), entry.capability.output_shape.as_ref(), payload))
    }

    /// Builds a status snapshot.
    fn snapshot(&self, id: &ProviderId, record: &ProviderRecord, now: Timestamp) -> ProviderStatus {
        ProviderStatus {
            provider_id: id.clone(),
            tier: record.tier,
            liveness: self.policy.derive(record, now),
            enabled: record.enabled,
            registered_at: record.registered_at,
            last_heartbeat: record.last_heartbeat,
            consecutive_failures: record.consecutive_failures,
            success_count: record.success_count,
            failure_count: record.failure_count,
            capabilities: record.capabilities.values().cloned().collect(),
        }
    }

    /// Acquires the read lock.
    fn read(&self) -> Result<RwLockReadGuard<'_, RegistryState>, RegistryError> {
        self.state.read().map_err(|_| RegistryError::Poisoned)
    }

    /// Acquires the write lock.
    fn write(&self) -> Result<RwLockWriteGuard<'_, RegistryState>, RegistryError> {
        self.state.write().map_err(|_| RegistryError::Poisoned)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Compiles shape validators for a capability.
fn compile_entry(capability: &Capability) -> Result<CatalogEntry, RegistryError> {
    Ok(CatalogEntry {
        capability: capability.clone(),
        input: compile_shape(&capability.name, capability.input_shape.as_ref())?,
        output: compile_shape(&capability.name, capability.output_shape.as_ref())?,
    })
}

/// Compiles one optional shape.
fn compile_shape(
    name: &CapabilityName,
    shape: Option<&DataShape>,
) -> Result<Option<Arc<Validator>>, RegistryError> {
    let Some(shape) = shape else {
        return Ok(None);
    };
    jsonschema::validator_for(&shape.schema).map(|validator| Some(Arc::new(validator))).map_err(
        |err| RegistryError::InvalidShape {
            name: name.clone(),
            shape_id: shape.id.clone(),
            message: err.to_string(),
        },
    )
}

/// Checks a value against an optional compiled shape.
fn check_shape(
    validator: Option<&Validator>,
    shape: Option<&DataShape>,
    value: &Value,
) -> Result<(), ShapeViolation> {
    let (Some(validator), Some(shape)) = (validator, shape) else {
        return Ok(());
    };
    if validator.is_valid(value) {
        return Ok(());
    }
    Err(ShapeViolation {
        shape_id: shape.id.clone(),
        violations: validator
            .iter_errors(value)
            .take(MAX_REPORTED_VIOLATIONS)
            .map(|err| err.to_string())
            .collect(),
    })
}
