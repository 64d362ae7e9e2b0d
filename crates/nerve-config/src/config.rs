// crates/nerve-config/src/config.rs
// ============================================================================
// Module: Context Nerve Configuration
// Description: Configuration loading and validation for nerve.toml.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: base64, nerve-core, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits.
//! Every timeout is range-checked and every violation names the dotted field
//! that caused it. Missing sections take safe defaults; unknown fields are
//! rejected.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use nerve_core::CapabilityName;
use nerve_core::CapabilityKind;
use nerve_core::SideEffect;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::policy::PolicyTableConfig;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
pub const DEFAULT_CONFIG_NAME: &str = "nerve.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "NERVE_CONFIG";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
pub(crate) const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
pub(crate) const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Minimum request deadline in milliseconds.
pub(crate) const MIN_DEADLINE_MS: u64 = 10;
/// Maximum request deadline in milliseconds.
pub(crate) const MAX_DEADLINE_MS: u64 = 600_000;
/// Maximum cancellation grace in milliseconds.
pub(crate) const MAX_CANCEL_GRACE_MS: u64 = 5_000;
/// Maximum request parameter size in bytes.
pub(crate) const MAX_PARAMS_BYTES: usize = 4 * 1024 * 1024;
/// Minimum session idle timeout in milliseconds.
pub(crate) const MIN_IDLE_TIMEOUT_MS: u64 = 1_000;
/// Maximum session idle timeout in milliseconds.
pub(crate) const MAX_IDLE_TIMEOUT_MS: u64 = 7 * 24 * 3_600_000;
/// Minimum background sweep interval in milliseconds.
pub(crate) const MIN_SWEEP_INTERVAL_MS: u64 = 100;
/// Maximum background sweep interval in milliseconds.
pub(crate) const MAX_SWEEP_INTERVAL_MS: u64 = 3_600_000;
/// Minimum heartbeat interval in milliseconds.
pub(crate) const MIN_HEARTBEAT_INTERVAL_MS: u64 = 100;
/// Maximum heartbeat interval in milliseconds.
pub(crate) const MAX_HEARTBEAT_INTERVAL_MS: u64 = 600_000;
/// Maximum number of bridge admin keys.
pub(crate) const MAX_ADMIN_KEYS: usize = 32;
/// Maximum number of bridge allowlist entries.
pub(crate) const MAX_ALLOWLIST_ENTRIES: usize = 1024;
/// Length of a raw ed25519 public key.
pub(crate) const ED25519_PUBLIC_KEY_LEN: usize = 32;
/// Length of a raw ed25519 signature.
pub(crate) const ED25519_SIGNATURE_LEN: usize = 64;

// ============================================================================
// SECTION: Root Config
// ============================================================================

/// Root configuration for a Context Nerve host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NerveConfig {
    /// Router timing and limits.
    #[serde(default)]
    pub router: RouterConfig,
    /// Session lifetimes.
    #[serde(default)]
    pub sessions: SessionsConfig,
    /// Provider liveness thresholds.
    #[serde(default)]
    pub registry: RegistryConfig,
    /// Audit retention and mirrors.
    #[serde(default)]
    pub audit: AuditConfig,
    /// External bridge sandbox and allowlist.
    #[serde(default)]
    pub bridge: BridgeConfig,
    /// Built-in providers.
    #[serde(default)]
    pub providers: BuiltinProvidersConfig,
    /// Fallback policy table.
    #[serde(default)]
    pub policy: PolicyTableConfig,
}

impl NerveConfig {
    /// Loads configuration from disk using the default resolution rules.
    ///
    /// Resolution order: explicit path, `NERVE_CONFIG`, then `nerve.toml`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        validate_path(&resolved)?;
        let bytes = fs::read(&resolved)
            .map_err(|err| ConfigError::Io(format!("{}: {err}", resolved.display())))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        Self::from_toml_str(content)
    }

    /// Parses and validates configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when parsing or validation fails.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        if content.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.router.validate()?;
        self.sessions.validate()?;
        self.registry.validate()?;
        self.audit.validate()?;
        self.bridge.validate()?;
        self.providers.validate()?;
        self.policy.validate()?;
        Ok(())
    }
}

// ============================================================================
// SECTION: Router
// ============================================================================

/// Router timing and request limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouterConfig {
    /// Deadline applied when a request does not carry one.
    #[serde(default = "default_deadline_ms")]
    pub default_deadline_ms: u64,
    /// Largest deadline a request may ask for.
    #[serde(default = "default_max_deadline_ms")]
    pub max_deadline_ms: u64,
    /// Upper bound for a single provider attempt.
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
    /// Time a cancelled provider gets to wind down before it is abandoned.
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,
    /// Maximum serialized size of request parameters.
    #[serde(default = "default_max_params_bytes")]
    pub max_params_bytes: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_deadline_ms: default_deadline_ms(),
            max_deadline_ms: default_max_deadline_ms(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
            cancel_grace_ms: default_cancel_grace_ms(),
            max_params_bytes: default_max_params_bytes(),
        }
    }
}

impl RouterConfig {
    /// Validates router settings.
    fn validate(&self) -> Result<(), ConfigError> {
        validate_timeout_range(
            "router.max_deadline_ms",
            self.max_deadline_ms,
            MIN_DEADLINE_MS,
            MAX_DEADLINE_MS,
        )?;
        validate_timeout_range(
            "router.default_deadline_ms",
            self.default_deadline_ms,
            MIN_DEADLINE_MS,
            self.max_deadline_ms,
        )?;
        validate_timeout_range(
            "router.attempt_timeout_ms",
            self.attempt_timeout_ms,
            MIN_DEADLINE_MS,
            self.max_deadline_ms,
        )?;
        validate_timeout_range(
            "router.cancel_grace_ms",
            self.cancel_grace_ms,
            0,
            MAX_CANCEL_GRACE_MS,
        )?;
        if self.max_params_bytes == 0 || self.max_params_bytes > MAX_PARAMS_BYTES {
            return Err(ConfigError::Invalid(format!(
                "router.max_params_bytes must be between 1 and {MAX_PARAMS_BYTES}"
            )));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Sessions
// ============================================================================

/// Session lifetime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionsConfig {
    /// Inactivity timeout after which a session expires.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    /// Interval of the background expiry sweep.
    #[serde(default = "default_session_sweep_ms")]
    pub sweep_interval_ms: u64,
    /// Longest lifetime an elevated grant may request.
    #[serde(default = "default_max_grant_ttl_ms")]
    pub max_grant_ttl_ms: u64,
    /// Maximum concurrently open sessions.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Maximum grants held by one session.
    #[serde(default = "default_max_grants")]
    pub max_grants_per_session: usize,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: default_idle_timeout_ms(),
            sweep_interval_ms: default_session_sweep_ms(),
            max_grant_ttl_ms: default_max_grant_ttl_ms(),
            max_sessions: default_max_sessions(),
            max_grants_per_session: default_max_grants(),
        }
    }
}

impl SessionsConfig {
    /// Validates session settings.
    fn validate(&self) -> Result<(), ConfigError> {
        validate_timeout_range(
            "sessions.idle_timeout_ms",
            self.idle_timeout_ms,
            MIN_IDLE_TIMEOUT_MS,
            MAX_IDLE_TIMEOUT_MS,
        )?;
        validate_timeout_range(
            "sessions.sweep_interval_ms",
            self.sweep_interval_ms,
            MIN_SWEEP_INTERVAL_MS,
            MAX_SWEEP_INTERVAL_MS,
        )?;
        validate_timeout_range(
            "sessions.max_grant_ttl_ms",
            self.max_grant_ttl_ms,
            MIN_IDLE_TIMEOUT_MS,
            MAX_IDLE_TIMEOUT_MS,
        )?;
        if self.max_sessions == 0 {
            return Err(ConfigError::Invalid(
                "sessions.max_sessions must be greater than zero".to_string(),
            ));
        }
        if self.max_grants_per_session == 0 {
            return Err(ConfigError::Invalid(
                "sessions.max_grants_per_session must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Registry
// ============================================================================

/// Provider liveness thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryConfig {
    /// Expected heartbeat interval.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Missed heartbeats before a provider is degraded.
    #[serde(default = "default_degraded_after_missed")]
    pub degraded_after_missed: u32,
    /// Missed heartbeats before a provider is unreachable.
    #[serde(default = "default_unreachable_after_missed")]
    pub unreachable_after_missed: u32,
    /// Missed heartbeats before an unreachable provider is evicted.
    #[serde(default = "default_evict_after_missed")]
    pub evict_after_missed: u32,
    /// Consecutive failures before a provider is degraded.
    #[serde(default = "default_degraded_after_failures")]
    pub degraded_after_failures: u32,
    /// Interval of the liveness sweep.
    #[serde(default = "default_registry_sweep_ms")]
    pub sweep_interval_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            degraded_after_missed: default_degraded_after_missed(),
            unreachable_after_missed: default_unreachable_after_missed(),
            evict_after_missed: default_evict_after_missed(),
            degraded_after_failures: default_degraded_after_failures(),
            sweep_interval_ms: default_registry_sweep_ms(),
        }
    }
}

impl RegistryConfig {
    /// Validates liveness thresholds.
    fn validate(&self) -> Result<(), ConfigError> {
        validate_timeout_range(
            "registry.heartbeat_interval_ms",
            self.heartbeat_interval_ms,
            MIN_HEARTBEAT_INTERVAL_MS,
            MAX_HEARTBEAT_INTERVAL_MS,
        )?;
        validate_timeout_range(
            "registry.sweep_interval_ms",
            self.sweep_interval_ms,
            MIN_SWEEP_INTERVAL_MS,
            MAX_SWEEP_INTERVAL_MS,
        )?;
        if self.degraded_after_missed == 0 {
            return Err(ConfigError::Invalid(
                "registry.degraded_after_missed must be greater than zero".to_string(),
            ));
        }
        if self.unreachable_after_missed <= self.degraded_after_missed {
            return Err(ConfigError::Invalid(
                "registry.unreachable_after_missed must exceed degraded_after_missed".to_string(),
            ));
        }
        if self.evict_after_missed <= self.unreachable_after_missed {
            return Err(ConfigError::Invalid(
                "registry.evict_after_missed must exceed unreachable_after_missed".to_string(),
            ));
        }
        if self.degraded_after_failures == 0 {
            return Err(ConfigError::Invalid(
                "registry.degraded_after_failures must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Audit
// ============================================================================

/// Audit retention and mirrors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditConfig {
    /// Entries retained in memory; older entries are dropped from queries.
    #[serde(default = "default_audit_retention")]
    pub retention: usize,
    /// Optional JSON-lines file mirror.
    #[serde(default)]
    pub file: Option<String>,
    /// Mirror entries to stderr as JSON lines.
    #[serde(default)]
    pub stderr: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            retention: default_audit_retention(),
            file: None,
            stderr: false,
        }
    }
}

impl AuditConfig {
    /// Validates audit settings.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.retention == 0 {
            return Err(ConfigError::Invalid(
                "audit.retention must be greater than zero".to_string(),
            ));
        }
        if let Some(path) = &self.file {
            validate_path_string("audit.file", path)?;
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Bridge
// ============================================================================

/// Administrator public key used to verify allowlist entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdminKeyConfig {
    /// Key identifier referenced by allowlist entries.
    pub key_id: String,
    /// Base64-encoded raw ed25519 public key.
    pub public_key: String,
}

/// Administrator-signed admission of one irreversible capability for one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AllowlistEntryConfig {
    /// External endpoint label.
    pub endpoint: String,
    /// Admitted capability.
    pub capability: CapabilityName,
    /// Signing key identifier.
    pub key_id: String,
    /// Base64-encoded ed25519 signature over the canonical entry payload.
    pub signature: String,
}

/// Sandbox profile applied to adopted endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SandboxProfileConfig {
    /// Capability kinds an external endpoint may register.
    #[serde(default = "default_sandbox_kinds")]
    pub allowed_kinds: Vec<CapabilityKind>,
    /// Side-effect classes admitted without an allowlist entry.
    #[serde(default = "default_sandbox_side_effects")]
    pub allowed_side_effects: Vec<SideEffect>,
    /// Maximum capabilities one endpoint may declare.
    #[serde(default = "default_sandbox_max_capabilities")]
    pub max_capabilities: usize,
    /// Maximum serialized response size.
    #[serde(default = "default_sandbox_max_response_bytes")]
    pub max_response_bytes: usize,
}

impl Default for SandboxProfileConfig {
    fn default() -> Self {
        Self {
            allowed_kinds: default_sandbox_kinds(),
            allowed_side_effects: default_sandbox_side_effects(),
            max_capabilities: default_sandbox_max_capabilities(),
            max_response_bytes: default_sandbox_max_response_bytes(),
        }
    }
}

/// External bridge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    /// Sandbox profile.
    #[serde(default)]
    pub sandbox: SandboxProfileConfig,
    /// Administrator keys.
    #[serde(default)]
    pub admin_keys: Vec<AdminKeyConfig>,
    /// Signed allowlist.
    #[serde(default)]
    pub allowlist: Vec<AllowlistEntryConfig>,
}

impl BridgeConfig {
    /// Validates bridge settings and key encodings.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.sandbox.allowed_side_effects.contains(&SideEffect::Irreversible) {
            return Err(ConfigError::Invalid(
                "bridge.sandbox.allowed_side_effects must not include irreversible".to_string(),
            ));
        }
        if self.sandbox.max_capabilities == 0 || self.sandbox.max_response_bytes == 0 {
            return Err(ConfigError::Invalid(
                "bridge.sandbox limits must be greater than zero".to_string(),
            ));
        }
        if self.admin_keys.len() > MAX_ADMIN_KEYS {
            return Err(ConfigError::Invalid(format!(
                "bridge.admin_keys exceeds {MAX_ADMIN_KEYS} entries"
            )));
        }
        if self.allowlist.len() > MAX_ALLOWLIST_ENTRIES {
            return Err(ConfigError::Invalid(format!(
                "bridge.allowlist exceeds {MAX_ALLOWLIST_ENTRIES} entries"
            )));
        }
        for (idx, key) in self.admin_keys.iter().enumerate() {
            if key.key_id.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "bridge.admin_keys[{idx}].key_id must be set"
                )));
            }
            decode_fixed(
                &format!("bridge.admin_keys[{idx}].public_key"),
                &key.public_key,
                ED25519_PUBLIC_KEY_LEN,
            )?;
        }
        for (idx, entry) in self.allowlist.iter().enumerate() {
            if entry.endpoint.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "bridge.allowlist[{idx}].endpoint must be set"
                )));
            }
            if !self.admin_keys.iter().any(|key| key.key_id == entry.key_id) {
                return Err(ConfigError::Invalid(format!(
                    "bridge.allowlist[{idx}].key_id references unknown key {}",
                    entry.key_id
                )));
            }
            decode_fixed(
                &format!("bridge.allowlist[{idx}].signature"),
                &entry.signature,
                ED25519_SIGNATURE_LEN,
            )?;
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Built-in Providers
// ============================================================================

/// Built-in provider toggles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuiltinProvidersConfig {
    /// Root directory served by the filesystem provider; disabled when unset.
    #[serde(default)]
    pub filesystem_root: Option<String>,
    /// Maximum file size the filesystem provider returns.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    /// Enable the system information provider.
    #[serde(default = "default_true")]
    pub system_info: bool,
}

impl Default for BuiltinProvidersConfig {
    fn default() -> Self {
        Self {
            filesystem_root: None,
            max_file_bytes: default_max_file_bytes(),
            system_info: true,
        }
    }
}

impl BuiltinProvidersConfig {
    /// Validates built-in provider settings.
    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(root) = &self.filesystem_root {
            validate_path_string("providers.filesystem_root", root)?;
            if !Path::new(root.trim()).is_absolute() {
                return Err(ConfigError::Invalid(
                    "providers.filesystem_root must be absolute".to_string(),
                ));
            }
        }
        if self.max_file_bytes == 0 {
            return Err(ConfigError::Invalid(
                "providers.max_file_bytes must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// Stable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Io(_) => "config_io",
            Self::Parse(_) => "config_parse",
            Self::Invalid(_) => "config_invalid",
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves the config path from an explicit path or environment defaults.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates the resolved path against length limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    if path.as_os_str().len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    if path.components().any(|c| c.as_os_str().len() > MAX_PATH_COMPONENT_LENGTH) {
        return Err(ConfigError::Invalid("config path component too long".to_string()));
    }
    Ok(())
}

/// Validates a configured path string.
fn validate_path_string(field: &str, value: &str) -> Result<(), ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
    }
    if trimmed.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid(format!("{field} exceeds max length")));
    }
    if Path::new(trimmed).components().any(|c| c.as_os_str().len() > MAX_PATH_COMPONENT_LENGTH) {
        return Err(ConfigError::Invalid(format!("{field} path component too long")));
    }
    Ok(())
}

/// Validates that a millisecond value lies within `[min_ms, max_ms]`.
fn validate_timeout_range(
    field: &str,
    value_ms: u64,
    min_ms: u64,
    max_ms: u64,
) -> Result<(), ConfigError> {
    if value_ms < min_ms || value_ms > max_ms {
        return Err(ConfigError::Invalid(format!(
            "{field} must be between {min_ms} and {max_ms} milliseconds",
        )));
    }
    Ok(())
}

/// Decodes base64 and checks the decoded length.
fn decode_fixed(field: &str, value: &str, expected: usize) -> Result<(), ConfigError> {
    let bytes = STANDARD
        .decode(value.trim())
        .map_err(|_| ConfigError::Invalid(format!("{field} must be base64")))?;
    if bytes.len() != expected {
        return Err(ConfigError::Invalid(format!("{field} must decode to {expected} bytes")));
    }
    Ok(())
}

/// Default request deadline.
const fn default_deadline_ms() -> u64 {
    5_000
}

/// Default maximum request deadline.
const fn default_max_deadline_ms() -> u64 {
    60_000
}

/// Default per-attempt timeout.
const fn default_attempt_timeout_ms() -> u64 {
    10_000
}

/// Default cancellation grace.
const fn default_cancel_grace_ms() -> u64 {
    100
}

/// Default parameter size limit.
const fn default_max_params_bytes() -> usize {
    64 * 1024
}

/// Default session idle timeout (15 minutes).
const fn default_idle_timeout_ms() -> u64 {
    900_000
}

/// Default session sweep interval.
const fn default_session_sweep_ms() -> u64 {
    30_000
}

/// Default maximum grant lifetime (1 hour).
const fn default_max_grant_ttl_ms() -> u64 {
    3_600_000
}

/// Default maximum open sessions.
const fn default_max_sessions() -> usize {
    4_096
}

/// Default maximum grants per session.
const fn default_max_grants() -> usize {
    256
}

/// Default heartbeat interval.
const fn default_heartbeat_interval_ms() -> u64 {
    5_000
}

/// Default missed heartbeats before degradation.
const fn default_degraded_after_missed() -> u32 {
    1
}

/// Default missed heartbeats before unreachability.
const fn default_unreachable_after_missed() -> u32 {
    3
}

/// Default missed heartbeats before eviction.
const fn default_evict_after_missed() -> u32 {
    12
}

/// Default consecutive failures before degradation.
const fn default_degraded_after_failures() -> u32 {
    3
}

/// Default registry sweep interval.
const fn default_registry_sweep_ms() -> u64 {
    5_000
}

/// Default in-memory audit retention.
const fn default_audit_retention() -> usize {
    100_000
}

/// Default sandbox capability kinds.
fn default_sandbox_kinds() -> Vec<CapabilityKind> {
    vec![CapabilityKind::Read, CapabilityKind::Action]
}

/// Default sandbox side effects admitted without an allowlist entry.
fn default_sandbox_side_effects() -> Vec<SideEffect> {
    vec![SideEffect::None, SideEffect::Reversible]
}

/// Default sandbox capability limit.
const fn default_sandbox_max_capabilities() -> usize {
    64
}

/// Default sandbox response limit.
const fn default_sandbox_max_response_bytes() -> usize {
    1024 * 1024
}

/// Default filesystem provider file limit.
const fn default_max_file_bytes() -> u64 {
    1024 * 1024
}

/// Serde helper returning true.
const fn default_true() -> bool {
    true
}
