// crates/nerve-core/src/model/provider.rs
// ============================================================================
// Module: Context Nerve Provider Model
// Description: Trust tiers, liveness, and provider status snapshots.
// Purpose: Shared vocabulary for provider selection and health reporting.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Trust tiers order provider candidates: `core` before `verified` before
//! `external`. Liveness is derived from heartbeats and failure reports and is
//! never assumed from registration alone.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::model::capability::Capability;
use crate::model::identifiers::ProviderId;
use crate::model::timestamp::Timestamp;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Provider trust tier; lower ordinal is preferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustTier {
    /// Shipped with the host.
    Core,
    /// Vetted third-party provider.
    Verified,
    /// Adopted through the external bridge.
    External,
}

impl TrustTier {
    /// Stable label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Core => "core",
            Self::Verified => "verified",
            Self::External => "external",
        }
    }
}

/// Provider liveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Liveness {
    /// Healthy and eligible.
    Active,
    /// Eligible but missed a heartbeat or reported failures.
    Degraded,
    /// Not eligible for routing.
    Unreachable,
}

/// Point-in-time view of a registered provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderStatus {
    /// Provider identifier.
    pub provider_id: ProviderId,
    /// Trust tier.
    pub tier: TrustTier,
    /// Current liveness.
    pub liveness: Liveness,
    /// Whether an operator has enabled the provider.
    pub enabled: bool,
    /// Registration time.
    pub registered_at: Timestamp,
    /// Most recent heartbeat.
    pub last_heartbeat: Timestamp,
    /// Consecutive failures since the last success.
    pub consecutive_failures: u32,
    /// Total successful invocations.
    pub success_count: u64,
    /// Total failed invocations.
    pub failure_count: u64,
    /// Declared capabilities.
    pub capabilities: Vec<Capability>,
}
