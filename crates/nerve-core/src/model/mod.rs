// crates/nerve-core/src/model/mod.rs
// ============================================================================
// Module: Context Nerve Data Model
// Description: Shared types for capabilities, sessions, requests, audit, and plans.
// Purpose: Group the data model and re-export its public surface.
// Dependencies: crate::model::*
// ============================================================================

//! ## Overview
//! Pure data types with no runtime state. Every type is serializable so it can
//! cross the stdio server boundary and land in audit exports unchanged.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod audit;
pub mod capability;
pub mod decision;
pub mod hashing;
pub mod identifiers;
pub mod plan;
pub mod provider;
pub mod request;
pub mod session;
pub mod timestamp;

#[cfg(test)]
mod tests;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use audit::AttemptOutcome;
pub use audit::AttemptRecord;
pub use audit::AuditEntry;
pub use audit::AuditFilter;
pub use audit::AuditOutcome;
pub use audit::AuditRecord;
pub use capability::Capability;
pub use capability::CapabilityError;
pub use capability::CapabilityKind;
pub use capability::CapabilityPattern;
pub use capability::DataShape;
pub use capability::PatternError;
pub use capability::SideEffect;
pub use decision::Decision;
pub use decision::DenyReason;
pub use decision::Verdict;
pub use hashing::HashAlgorithm;
pub use hashing::HashDigest;
pub use hashing::HashError;
pub use hashing::canonical_json_bytes;
pub use hashing::chain_digest;
pub use hashing::hash_canonical_json;
pub use identifiers::CapabilityName;
pub use identifiers::IdentifierError;
pub use identifiers::PlanId;
pub use identifiers::ProviderId;
pub use identifiers::RequestId;
pub use identifiers::RequestorId;
pub use identifiers::SessionId;
pub use identifiers::StepId;
pub use plan::Compensation;
pub use plan::Plan;
pub use plan::PlanOutcome;
pub use plan::PlanResult;
pub use plan::PlanStep;
pub use plan::StepCheck;
pub use plan::StepFailure;
pub use provider::Liveness;
pub use provider::ProviderStatus;
pub use provider::TrustTier;
pub use request::PlanLink;
pub use request::PlanRole;
pub use request::Request;
pub use request::Response;
pub use session::Grant;
pub use session::Requestor;
pub use session::RequestorClass;
pub use session::Scope;
pub use session::Session;
pub use session::SessionState;
pub use session::normalize_path;
pub use timestamp::Timestamp;
