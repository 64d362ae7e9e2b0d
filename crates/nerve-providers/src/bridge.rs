// crates/nerve-providers/src/bridge.rs
// ============================================================================
// Module: External Bridge
// Description: Adoption of third-party endpoints under a sandbox profile.
// Purpose: Admit external providers at the external tier with signed exceptions.
// Dependencies: base64, ed25519-dalek, nerve-core, nerve-config, serde_json
// ============================================================================

//! ## Overview
//! External endpoints are always registered at [`TrustTier::External`]. The
//! sandbox profile limits which capability kinds and side-effect classes they
//! may declare. Irreversible capabilities are never admitted by the profile;
//! each one needs an allowlist entry naming the endpoint and capability,
//! signed by a configured administrator key.
//!
//! Adopted handlers are wrapped in a [`SandboxedProvider`] which refuses
//! undeclared capabilities and oversized responses. Requests to adopted
//! providers still go through the normal guard and router path.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as Base64;
use ed25519_dalek::Signature;
use ed25519_dalek::VerifyingKey;
use nerve_config::AllowlistEntryConfig;
use nerve_config::BridgeConfig;
use nerve_config::SandboxProfileConfig;
use nerve_core::Capability;
use nerve_core::CapabilityName;
use nerve_core::ContextProvider;
use nerve_core::HashError;
use nerve_core::InvocationContext;
use nerve_core::Liveness;
use nerve_core::ProviderError;
use nerve_core::ProviderId;
use nerve_core::SideEffect;
use nerve_core::TrustTier;
use nerve_core::canonical_json_bytes;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;
use tracing::info;
use tracing::warn;

use crate::registry::ProviderRegistry;
use crate::registry::RegistryError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Prefix applied to provider ids of adopted endpoints.
pub const EXTERNAL_ID_PREFIX: &str = "ext:";
/// Maximum endpoint label length.
const MAX_ENDPOINT_LENGTH: usize = 128;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// External bridge errors.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Endpoint label was empty, too long, or contained control characters.
    #[error("invalid endpoint label: {0}")]
    InvalidEndpoint(String),
    /// Endpoint declared more capabilities than the sandbox allows.
    #[error("endpoint declares {declared} capabilities; sandbox limit is {limit}")]
    TooManyCapabilities {
        /// Declared count.
        declared: usize,
        /// Sandbox limit.
        limit: usize,
    },
    /// Capability kind or side effect is outside the sandbox profile.
    #[error("capability {capability} rejected by sandbox: {reason}")]
    SandboxViolation {
        /// Capability name.
        capability: CapabilityName,
        /// Violation detail.
        reason: String,
    },
    /// Irreversible capability lacks a valid signed allowlist entry.
    #[error("irreversible capability {capability} is not allowlisted for {endpoint}")]
    NotAllowlisted {
        /// Endpoint label.
        endpoint: String,
        /// Capability name.
        capability: CapabilityName,
    },
    /// Administrator key material was invalid.
    #[error("invalid admin key {key_id}")]
    InvalidKey {
        /// Key identifier.
        key_id: String,
    },
    /// Allowlist payload could not be canonicalized.
    #[error(transparent)]
    Hash(#[from] HashError),
    /// Registration failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl BridgeError {
    /// Stable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidEndpoint(_) => "invalid_endpoint",
            Self::TooManyCapabilities {
                ..
            } => "too_many_capabilities",
            Self::SandboxViolation {
                ..
            } => "sandbox_violation",
            Self::NotAllowlisted {
                ..
            } => "not_allowlisted",
            Self::InvalidKey {
                ..
            } => "invalid_admin_key",
            Self::Hash(_) => "hash_failed",
            Self::Registry(err) => err.code(),
        }
    }
}

// ============================================================================
// SECTION: Allowlist Payloads
// ============================================================================

/// Returns the canonical bytes an administrator signs to allowlist a capability.
///
/// # Errors
///
/// Returns [`HashError`] when canonicalization fails.
pub fn allowlist_message(
    endpoint: &str,
    capability: &CapabilityName,
) -> Result<Vec<u8>, HashError> {
    canonical_json_bytes(&json!({
        "capability": capability.as_str(),
        "endpoint": endpoint,
        "purpose": "nerve.bridge.allowlist",
    }))
}

/// Returns the provider id assigned to an adopted endpoint.
#[must_use]
pub fn external_provider_id(endpoint: &str) -> ProviderId {
    ProviderId::new(format!("{EXTERNAL_ID_PREFIX}{endpoint}"))
}

// ============================================================================
// SECTION: Bridge
// ============================================================================

/// Adopts external endpoints into the registry.
pub struct ExternalBridge {
    /// Target registry.
    registry: Arc<ProviderRegistry>,
    /// Sandbox profile.
    profile: SandboxProfileConfig,
    /// Administrator keys by id.
    admin_keys: BTreeMap<String, VerifyingKey>,
    /// Signed allowlist entries.
    allowlist: Vec<AllowlistEntryConfig>,
}

impl ExternalBridge {
    /// Builds a bridge from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidKey`] when a key does not decode.
    pub fn from_config(
        registry: Arc<ProviderRegistry>,
        config: &BridgeConfig,
    ) -> Result<Self, BridgeError> {
        let mut admin_keys = BTreeMap::new();
        for key in &config.admin_keys {
            admin_keys.insert(key.key_id.clone(), decode_public_key(&key.key_id, &key.public_key)?);
        }
        Ok(Self {
            registry,
            profile: config.sandbox.clone(),
            admin_keys,
            allowlist: config.allowlist.clone(),
        })
    }

    /// Adopts an endpoint and registers it at the external tier.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError`] when the endpoint or any capability falls
    /// outside the sandbox, or registration fails.
    pub fn adopt(
        &self,
        endpoint: &str,
        handler: Arc<dyn ContextProvider>,
        declared: Vec<Capability>,
    ) -> Result<ProviderId, BridgeError> {
        validate_endpoint(endpoint)?;
        if declared.len() > self.profile.max_capabilities {
            return Err(BridgeError::TooManyCapabilities {
                declared: declared.len(),
                limit: self.profile.max_capabilities,
            });
        }
        for capability in &declared {
            self.admit(endpoint, capability)?;
        }
        let names = declared.iter().map(|cap| cap.name.clone()).collect();
        let sandboxed = SandboxedProvider::new(handler, names, self.profile.max_response_bytes);
        let provider_id = self.registry.register(
            external_provider_id(endpoint),
            Arc::new(sandboxed),
            declared,
            TrustTier::External,
        )?;
        info!(provider_id = %provider_id, endpoint, "external endpoint adopted");
        Ok(provider_id)
    }

    /// Checks one capability against the sandbox profile and allowlist.
    fn admit(&self, endpoint: &str, capability: &Capability) -> Result<(), BridgeError> {
        if !self.profile.allowed_kinds.contains(&capability.kind) {
            return Err(BridgeError::SandboxViolation {
                capability: capability.name.clone(),
                reason: "capability kind not permitted".to_string(),
            });
        }
        if capability.side_effect == SideEffect::Irreversible {
            if self.is_allowlisted(endpoint, &capability.name) {
                return Ok(());
            }
            warn!(endpoint, capability = %capability.name, "irreversible capability refused");
            return Err(BridgeError::NotAllowlisted {
                endpoint: endpoint.to_string(),
                capability: capability.name.clone(),
            });
        }
        if !self.profile.allowed_side_effects.contains(&capability.side_effect) {
            return Err(BridgeError::SandboxViolation {
                capability: capability.name.clone(),
                reason: format!("side effect {} not permitted", capability.side_effect.as_str()),
            });
        }
        Ok(())
    }

    /// Returns true when a signed entry admits `capability` for `endpoint`.
    fn is_allowlisted(&self, endpoint: &str, capability: &CapabilityName) -> bool {
        let Ok(message) = allowlist_message(endpoint, capability) else {
            return false;
        };
        self.allowlist
            .iter()
            .filter(|entry| entry.endpoint == endpoint && &entry.capability == capability)
            .any(|entry| {
                let Some(key) = self.admin_keys.get(&entry.key_id) else {
                    return false;
                };
                let Ok(bytes) = Base64.decode(entry.signature.trim()) else {
                    return false;
                };
                let Ok(signature) = Signature::try_from(bytes.as_slice()) else {
                    return false;
                };
                key.verify_strict(&message, &signature).is_ok()
            })
    }
}

// ============================================================================
// SECTION: Sandboxed Provider
// ============================================================================

/// Wrapper enforcing declared capabilities and response size on an external handler.
pub struct SandboxedProvider {
    /// Wrapped handler.
    inner: Arc<dyn ContextProvider>,
    /// Declared capability names.
    declared: BTreeSet<CapabilityName>,
    /// Maximum serialized response size.
    max_response_bytes: usize,
}

impl SandboxedProvider {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(
        inner: Arc<dyn ContextProvider>,
        declared: BTreeSet<CapabilityName>,
        max_response_bytes: usize,
    ) -> Self {
        Self {
            inner,
            declared,
            max_response_bytes,
        }
    }
}

#[async_trait]
impl ContextProvider for SandboxedProvider {
    async fn invoke(
        &self,
        capability: &CapabilityName,
        params: &Value,
        ctx: &InvocationContext,
    ) -> Result<Value, ProviderError> {
        if !self.declared.contains(capability) {
            return Err(ProviderError::Unsupported(capability.clone()));
        }
        let payload = self.inner.invoke(capability, params, ctx).await?;
        let size = serde_json::to_vec(&payload)
            .map_err(|err| ProviderError::Failed(format!("unserializable response: {err}")))?
            .len();
        if size > self.max_response_bytes {
            return Err(ProviderError::Failed(format!(
                "response of {size} bytes exceeds sandbox limit {}",
                self.max_response_bytes
            )));
        }
        Ok(payload)
    }

    async fn health(&self) -> Liveness {
        self.inner.health().await
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Validates an endpoint label.
fn validate_endpoint(endpoint: &str) -> Result<(), BridgeError> {
    let trimmed = endpoint.trim();
    if trimmed.is_empty()
        || trimmed != endpoint
        || endpoint.len() > MAX_ENDPOINT_LENGTH
        || endpoint.chars().any(char::is_control)
    {
        return Err(BridgeError::InvalidEndpoint(endpoint.to_string()));
    }
    Ok(())
}

/// Decodes a base64 ed25519 public key.
fn decode_public_key(key_id: &str, encoded: &str) -> Result<VerifyingKey, BridgeError> {
    let invalid = || BridgeError::InvalidKey {
        key_id: key_id.to_string(),
    };
    let bytes = Base64.decode(encoded.trim()).map_err(|_| invalid())?;
    let bytes: [u8; 32] = bytes.as_slice().try_into().map_err(|_| invalid())?;
    VerifyingKey::from_bytes(&bytes).map_err(|_| invalid())
}

#[cfg(test)]
mod tests;
