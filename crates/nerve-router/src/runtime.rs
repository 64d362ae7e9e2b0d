// crates/nerve-router/src/runtime.rs
// ============================================================================
// Module: Runtime Assembly
// Description: Wires registry, sessions, guard, audit, router, and bridge.
// Purpose: Build a ready-to-serve host from validated configuration.
// Dependencies: nerve-config, nerve-core, nerve-providers, tokio, tracing
// ============================================================================

//! ## Overview
//! [`NerveRuntime::from_config`] is the single place components are
//! constructed. Nothing is global: every component is owned here and handed
//! to its collaborators explicitly. Built-in providers register at the core
//! tier. A configured audit file is resumed from its last entry so the hash
//! chain continues across restarts.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use nerve_config::ConfigError;
use nerve_config::NerveConfig;
use nerve_config::PolicyReloadError;
use nerve_config::PolicySnapshot;
use nerve_config::PolicyStore;
use nerve_config::PolicyTableConfig;
use nerve_core::Clock;
use nerve_core::ProviderError;
use nerve_core::SystemClock;
use nerve_core::TrustTier;
use nerve_providers::BridgeError;
use nerve_providers::ExternalBridge;
use nerve_providers::FilesystemProvider;
use nerve_providers::LivenessPolicy;
use nerve_providers::ProviderRegistry;
use nerve_providers::RegistryError;
use nerve_providers::SystemProvider;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::audit::AuditError;
use crate::audit::AuditLog;
use crate::audit::FileAuditSink;
use crate::audit::StderrAuditSink;
use crate::audit::read_chain_tail;
use crate::guard::PermissionGuard;
use crate::intent::IntentEngine;
use crate::router::ContextRouter;
use crate::router::RouterSettings;
use crate::session::SessionManager;
use crate::session::SessionSettings;
use crate::telemetry::CountingMetrics;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Provider id of the built-in filesystem reader.
pub const FILESYSTEM_PROVIDER_ID: &str = "builtin.filesystem";
/// Provider id of the built-in system information reader.
pub const SYSTEM_PROVIDER_ID: &str = "builtin.system";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Runtime assembly errors.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Configuration invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Audit file could not be resumed or opened.
    #[error(transparent)]
    Audit(#[from] AuditError),
    /// Bridge key material invalid.
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    /// Built-in provider registration failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// Built-in provider descriptor invalid.
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl RuntimeError {
    /// Stable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Config(err) => err.code(),
            Self::Audit(err) => err.code(),
            Self::Bridge(err) => err.code(),
            Self::Registry(err) => err.code(),
            Self::Provider(err) => err.code(),
        }
    }
}

// ============================================================================
// SECTION: Runtime
// ============================================================================

/// Fully wired Context Nerve host.
pub struct NerveRuntime {
    /// Validated configuration.
    config: NerveConfig,
    /// Provider registry.
    registry: Arc<ProviderRegistry>,
    /// Session manager.
    sessions: SessionManager,
    /// Live policy store.
    policy: Arc<PolicyStore>,
    /// Audit log.
    audit: Arc<AuditLog>,
    /// Router.
    router: Arc<ContextRouter>,
    /// Plan executor.
    intent: Arc<IntentEngine>,
    /// External bridge.
    bridge: ExternalBridge,
    /// Router counters.
    metrics: Arc<CountingMetrics>,
}

impl NerveRuntime {
    /// Builds a runtime on the wall clock.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError`] when any component fails to initialize.
    pub fn from_config(config: NerveConfig) -> Result<Self, RuntimeError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Builds a runtime on `clock`.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError`] when any component fails to initialize.
    pub fn with_clock(config: NerveConfig, clock: Arc<dyn Clock>) -> Result<Self, RuntimeError> {
        config.validate()?;
        let registry = Arc::new(ProviderRegistry::new(
            Arc::clone(&clock),
            LivenessPolicy::from_config(&config.registry),
        ));
        register_builtins(&registry, &config)?;
        let sessions =
            SessionManager::new(Arc::clone(&clock), SessionSettings::from_config(&config.sessions));
        let policy = Arc::new(PolicyStore::new(PolicySnapshot::from_config(&config.policy)?));
        let audit = Arc::new(build_audit(&config)?);
        let metrics = Arc::new(CountingMetrics::default());
        let router = Arc::new(
            ContextRouter::new(
                Arc::clone(&registry),
                sessions.clone(),
                PermissionGuard::new(Arc::clone(&policy)),
                Arc::clone(&audit),
                clock,
                RouterSettings::from_config(&config.router),
            )
            .with_metrics(metrics.clone()),
        );
        let intent = Arc::new(IntentEngine::new(Arc::clone(&router)));
        let bridge = ExternalBridge::from_config(Arc::clone(&registry), &config.bridge)?;
        info!(
            policy_version = policy.snapshot().version(),
            providers = registry.status()?.len(),
            "context nerve runtime ready"
        );
        Ok(Self {
            config,
            registry,
            sessions,
            policy,
            audit,
            router,
            intent,
            bridge,
            metrics,
        })
    }

    /// Validated configuration.
    #[must_use]
    pub const fn config(&self) -> &NerveConfig {
        &self.config
    }

    /// Provider registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Session manager.
    #[must_use]
    pub const fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Audit log.
    #[must_use]
    pub const fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    /// Router.
    #[must_use]
    pub const fn router(&self) -> &Arc<ContextRouter> {
        &self.router
    }

    /// Plan executor.
    #[must_use]
    pub const fn intent(&self) -> &Arc<IntentEngine> {
        &self.intent
    }

    /// External bridge for adopting third-party endpoints.
    #[must_use]
    pub const fn bridge(&self) -> &ExternalBridge {
        &self.bridge
    }

    /// Router counters.
    #[must_use]
    pub const fn metrics(&self) -> &Arc<CountingMetrics> {
        &self.metrics
    }

    /// Current policy version.
    #[must_use]
    pub fn policy_version(&self) -> u64 {
        self.policy.snapshot().version()
    }

    /// Swaps in a new policy table; in-flight decisions keep their snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyReloadError`] when the table is invalid or not newer.
    pub fn reload_policy(&self, table: &PolicyTableConfig) -> Result<u64, PolicyReloadError> {
        let version = self.policy.reload(table)?;
        info!(policy_version = version, "policy reloaded");
        Ok(version)
    }

    /// Spawns the session sweeper and the registry liveness loop.
    #[must_use]
    pub fn spawn_maintenance(&self) -> Vec<JoinHandle<()>> {
        let sweeper = self
            .sessions
            .spawn_sweeper(Duration::from_millis(self.config.sessions.sweep_interval_ms));
        let registry = Arc::clone(&self.registry);
        let interval = Duration::from_millis(self.config.registry.sweep_interval_ms);
        let liveness = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match registry.probe().await {
                    Ok(alive) => debug!(alive, "provider probe finished"),
                    Err(err) => warn!(error = %err, "provider probe failed"),
                }
                if let Err(err) = registry.sweep() {
                    warn!(error = %err, "provider sweep failed");
                }
            }
        });
        vec![sweeper, liveness]
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Registers enabled built-in providers at the core tier.
fn register_builtins(
    registry: &ProviderRegistry,
    config: &NerveConfig,
) -> Result<(), RuntimeError> {
    if let Some(root) = &config.providers.filesystem_root {
        let provider = FilesystemProvider::new(root.trim(), config.providers.max_file_bytes);
        registry.register(
            FILESYSTEM_PROVIDER_ID,
            Arc::new(provider),
            FilesystemProvider::capabilities()?,
            TrustTier::Core,
        )?;
    }
    if config.providers.system_info {
        registry.register(
            SYSTEM_PROVIDER_ID,
            Arc::new(SystemProvider::default()),
            SystemProvider::capabilities()?,
            TrustTier::Core,
        )?;
    }
    Ok(())
}

/// Builds the audit log, resuming and mirroring to the configured file.
fn build_audit(config: &NerveConfig) -> Result<AuditLog, RuntimeError> {
    let mut audit = AuditLog::new(config.audit.retention);
    if let Some(file) = &config.audit.file {
        let path = Path::new(file.trim());
        let tail = read_chain_tail(path)?;
        if let Some(tail) = &tail {
            info!(sequence = tail.sequence, path = %path.display(), "audit chain resumed");
        }
        let sink = FileAuditSink::new(path)
            .map_err(|err| AuditError::Io(format!("{}: {err}", path.display())))?;
        audit = audit.with_tail(tail).with_sink(Arc::new(sink));
    }
    if config.audit.stderr {
        audit = audit.with_sink(Arc::new(StderrAuditSink));
    }
    Ok(audit)
}

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test-only assertions are permitted."
    )]

    use nerve_config::PolicyEffect;
    use nerve_core::AuditOutcome;
    use nerve_core::CapabilityName;
    use nerve_core::Request;
    use nerve_core::Requestor;
    use nerve_core::RequestorClass;
    use serde_json::json;

    use super::*;
    use crate::audit::verify_audit_file;

    #[test]
    fn builtins_follow_provider_settings() {
        let mut config = NerveConfig::default();
        config.providers.system_info = false;
        let runtime = NerveRuntime::from_config(config).unwrap();
        assert!(runtime.registry().status().unwrap().is_empty());

        let dir = tempfile::tempdir().unwrap();
        let mut config = NerveConfig::default();
        config.providers.filesystem_root = Some(dir.path().display().to_string());
        let runtime = NerveRuntime::from_config(config).unwrap();
        let ids: Vec<String> = runtime
            .registry()
            .status()
            .unwrap()
            .into_iter()
            .map(|status| status.provider_id.as_str().to_string())
            .collect();
        assert_eq!(ids, vec![FILESYSTEM_PROVIDER_ID, SYSTEM_PROVIDER_ID]);
        let read_file = CapabilityName::parse("read.file").unwrap();
        assert!(runtime.registry().capability(&read_file).unwrap().is_some());
    }

    #[test]
    fn policy_reload_requires_newer_version() {
        let runtime = NerveRuntime::from_config(NerveConfig::default()).unwrap();
        let current = runtime.policy_version();
        let mut table = PolicyTableConfig {
            version: current,
            default: PolicyEffect::Allow,
            rules: Vec::new(),
        };
        let err = runtime.reload_policy(&table).unwrap_err();
        assert_eq!(err.code(), "policy_version_stale");
        table.version = current + 1;
        assert_eq!(runtime.reload_policy(&table).unwrap(), current + 1);
        assert_eq!(runtime.policy_version(), current + 1);
    }

    #[test]
    fn audit_file_chain_resumes_across_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let mut config = NerveConfig::default();
        config.audit.file = Some(path.display().to_string());
        let executor = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();

        for expected in 1..=2 {
            let host = NerveRuntime::from_config(config.clone()).unwrap();
            let session =
                host.sessions().open(Requestor::new("ops", RequestorClass::User)).unwrap();
            let request = Request::new(
                session.session_id,
                CapabilityName::parse("read.system.info").unwrap(),
                json!({}),
                1_000,
            );
            let response = executor.block_on(host.router().dispatch(request)).unwrap();
            assert_eq!(response.status, AuditOutcome::Denied);
            assert_eq!(response.audit_sequence, expected);
        }
        assert_eq!(verify_audit_file(&path).unwrap(), 2);
    }
}
