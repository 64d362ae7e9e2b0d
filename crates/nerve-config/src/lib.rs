// crates/nerve-config/src/lib.rs
// ============================================================================
// Module: Context Nerve Config Library
// Description: Canonical config model, validation, and policy table.
// Purpose: Single source of truth for nerve.toml semantics.
// Dependencies: nerve-core, serde, toml
// ============================================================================

//! ## Overview
//! `nerve-config` defines the `nerve.toml` model with strict, fail-closed
//! validation, and the versioned policy table the permission guard falls back
//! to when a session holds no grant. Policy snapshots are immutable; reloads
//! swap a whole snapshot through [`PolicyStore`].

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;
pub mod policy;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;
pub use policy::*;
