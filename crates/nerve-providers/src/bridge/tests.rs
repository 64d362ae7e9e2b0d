// crates/nerve-providers/src/bridge/tests.rs
// ============================================================================
// Module: External Bridge Tests
// Description: Unit tests for sandbox admission and allowlist verification.
// Purpose: Pin the external tier and signed irreversible admission.
// Dependencies: ed25519-dalek, nerve-core, serde_json, tokio
// ============================================================================

//! ## Overview
//! Uses a fixed ed25519 seed so signatures are deterministic.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    reason = "Test-only panic-based assertions are permitted."
)]

use ed25519_dalek::Signer;
use ed25519_dalek::SigningKey;
use nerve_config::AdminKeyConfig;
use nerve_core::CancelSignal;
use nerve_core::CapabilityKind;
use nerve_core::ManualClock;
use nerve_core::RequestId;
use nerve_core::Requestor;
use nerve_core::RequestorClass;
use nerve_core::SessionId;
use nerve_core::Timestamp;

use super::*;
use crate::registry::LivenessPolicy;

struct Echo;

#[async_trait]
impl ContextProvider for Echo {
    async fn invoke(
        &self,
        _capability: &CapabilityName,
        params: &Value,
        _ctx: &InvocationContext,
    ) -> Result<Value, ProviderError> {
        Ok(params.clone())
    }
}

fn name(raw: &str) -> CapabilityName {
    CapabilityName::parse(raw).unwrap()
}

fn signing_key() -> SigningKey {
    SigningKey::from_bytes(&[7u8; 32])
}

fn registry() -> Arc<ProviderRegistry> {
    let clock = Arc::new(ManualClock::new(Timestamp::from_unix_millis(0)));
    Arc::new(ProviderRegistry::new(clock, LivenessPolicy::default()))
}

fn config(allowlist: Vec<AllowlistEntryConfig>) -> BridgeConfig {
    BridgeConfig {
        sandbox: SandboxProfileConfig::default(),
        admin_keys: vec![AdminKeyConfig {
            key_id: "ops".to_string(),
            public_key: Base64.encode(signing_key().verifying_key().to_bytes()),
        }],
        allowlist,
    }
}

fn signed_entry(endpoint: &str, capability: &str, key: &SigningKey) -> AllowlistEntryConfig {
    let message = allowlist_message(endpoint, &name(capability)).unwrap();
    AllowlistEntryConfig {
        endpoint: endpoint.to_string(),
        capability: name(capability),
        key_id: "ops".to_string(),
        signature: Base64.encode(key.sign(&message).to_bytes()),
    }
}

fn ctx() -> InvocationContext {
    InvocationContext {
        request_id: RequestId::new("r-1"),
        session_id: SessionId::new("s-1"),
        requestor: Requestor::new("agent", RequestorClass::User),
        deadline_ms: 1_000,
        cancel: CancelSignal::never(),
    }
}

#[test]
fn adopted_endpoints_register_at_external_tier() {
    let registry = registry();
    let bridge = ExternalBridge::from_config(Arc::clone(&registry), &config(Vec::new())).unwrap();
    let id = bridge
        .adopt("weather", Arc::new(Echo), vec![Capability::read(name("read.weather"))])
        .unwrap();
    assert_eq!(id.as_str(), "ext:weather");
    assert_eq!(registry.provider_status(&id).unwrap().tier, TrustTier::External);
}

#[test]
fn irreversible_capability_requires_allowlist() {
    let registry = registry();
    let bridge = ExternalBridge::from_config(Arc::clone(&registry), &config(Vec::new())).unwrap();
    let cap = Capability::action(name("action.mail.send"), SideEffect::Irreversible);
    let err = bridge.adopt("mailer", Arc::new(Echo), vec![cap]).unwrap_err();
    assert_eq!(err.code(), "not_allowlisted");
    assert!(registry.capabilities().unwrap().is_empty());
}

#[test]
fn signed_allowlist_entry_admits_irreversible_capability() {
    let registry = registry();
    let entry = signed_entry("mailer", "action.mail.send", &signing_key());
    let bridge = ExternalBridge::from_config(Arc::clone(&registry), &config(vec![entry])).unwrap();
    let cap = Capability::action(name("action.mail.send"), SideEffect::Irreversible);
    bridge.adopt("mailer", Arc::new(Echo), vec![cap]).unwrap();
    assert!(registry.capability(&name("action.mail.send")).unwrap().is_some());
}

#[test]
fn allowlist_entry_is_bound_to_its_endpoint() {
    let entry = signed_entry("mailer", "action.mail.send", &signing_key());
    let bridge = ExternalBridge::from_config(registry(), &config(vec![entry])).unwrap();
    let cap = Capability::action(name("action.mail.send"), SideEffect::Irreversible);
    let err = bridge.adopt("other", Arc::new(Echo), vec![cap]).unwrap_err();
    assert_eq!(err.code(), "not_allowlisted");
}

#[test]
fn signature_from_unknown_key_is_rejected() {
    let forged = signed_entry("mailer", "action.mail.send", &SigningKey::from_bytes(&[9u8; 32]));
    let bridge = ExternalBridge::from_config(registry(), &config(vec![forged])).unwrap();
    let cap = Capability::action(name("action.mail.send"), SideEffect::Irreversible);
    assert!(bridge.adopt("mailer", Arc::new(Echo), vec![cap]).is_err());
}

#[test]
fn sandbox_kind_restriction_is_enforced() {
    let mut config = config(Vec::new());
    config.sandbox.allowed_kinds = vec![CapabilityKind::Read];
    let bridge = ExternalBridge::from_config(registry(), &config).unwrap();
    let cap = Capability::action(name("action.note.write"), SideEffect::Reversible);
    let err = bridge.adopt("notes", Arc::new(Echo), vec![cap]).unwrap_err();
    assert_eq!(err.code(), "sandbox_violation");
}

#[test]
fn endpoint_labels_are_validated() {
    let bridge = ExternalBridge::from_config(registry(), &config(Vec::new())).unwrap();
    let cap = Capability::read(name("read.weather"));
    assert_eq!(
        bridge.adopt(" padded", Arc::new(Echo), vec![cap]).unwrap_err().code(),
        "invalid_endpoint"
    );
}

#[tokio::test]
async fn sandboxed_provider_rejects_undeclared_and_oversized() {
    let declared = BTreeSet::from([name("read.weather")]);
    let provider = SandboxedProvider::new(Arc::new(Echo), declared, 32);
    let err = provider.invoke(&name("read.other"), &json!({}), &ctx()).await.unwrap_err();
    assert_eq!(err.code(), "unsupported_capability");
    let small = provider.invoke(&name("read.weather"), &json!({"c": 1}), &ctx()).await.unwrap();
    assert_eq!(small, json!({"c": 1}));
    let large = json!({"text": "x".repeat(64)});
    let err = provider.invoke(&name("read.weather"), &large, &ctx()).await.unwrap_err();
    assert_eq!(err.code(), "provider_failed");
}
