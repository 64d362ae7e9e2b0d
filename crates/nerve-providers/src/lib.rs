// crates/nerve-providers/src/lib.rs
// ============================================================================
// Module: Context Nerve Providers
// Description: Provider registry, external bridge, and built-in providers.
// Purpose: Own provider records and admit external endpoints under a sandbox.
// Dependencies: nerve-core, nerve-config, jsonschema, ed25519-dalek, tokio
// ============================================================================

//! ## Overview
//! The [`ProviderRegistry`] exclusively owns provider records and the
//! capability catalog. It is a live view: registrations, heartbeats, and
//! failure reports are visible to the router on its next lookup.
//!
//! The [`ExternalBridge`] adopts third-party endpoints at the `external` trust
//! tier and refuses irreversible capabilities unless an administrator has
//! signed an allowlist entry for that endpoint and capability.
//!
//! Built-in providers serve filesystem reads below a configured root and
//! host/process information.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod bridge;
pub mod filesystem;
pub mod registry;
pub mod system;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use bridge::BridgeError;
pub use bridge::ExternalBridge;
pub use bridge::SandboxedProvider;
pub use bridge::allowlist_message;
pub use bridge::external_provider_id;
pub use filesystem::FilesystemProvider;
pub use registry::Candidate;
pub use registry::LivenessPolicy;
pub use registry::ProviderRegistry;
pub use registry::RegistryError;
pub use registry::ShapeViolation;
pub use registry::SweepReport;
pub use system::SystemProvider;
