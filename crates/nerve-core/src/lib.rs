// crates/nerve-core/src/lib.rs
// ============================================================================
// Module: Context Nerve Core Library
// Description: Public API surface for the Context Nerve data model.
// Purpose: Expose capability, session, request, audit, and plan types plus provider interfaces.
// Dependencies: crate::{model, interfaces}
// ============================================================================

//! ## Overview
//! Context Nerve core holds the shared vocabulary of the nervous system:
//! capabilities and their side-effect classes, sessions and grants, requests,
//! authorization decisions, audit entries, and intent plans. It also defines
//! the [`ContextProvider`] seam that every provider implements and the
//! [`Clock`] seam used for deterministic time in tests.
//!
//! The crate performs no I/O. Routing, authorization, and audit storage live
//! in `nerve-router`; provider bookkeeping lives in `nerve-providers`.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod interfaces;
pub mod model;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use interfaces::CancelHandle;
pub use interfaces::CancelSignal;
pub use interfaces::Clock;
pub use interfaces::ContextProvider;
pub use interfaces::InvocationContext;
pub use interfaces::ManualClock;
pub use interfaces::ProviderError;
pub use interfaces::SystemClock;
pub use interfaces::cancel_pair;
pub use model::*;
