// crates/nerve-router/src/lib.rs
// ============================================================================
// Module: Context Nerve Router
// Description: Sessions, permission guard, audit log, router, and plans.
// Purpose: Mediate every capability request between requestors and providers.
// Dependencies: nerve-config, nerve-core, nerve-providers, tokio, tracing
// ============================================================================

//! ## Overview
//! Every request follows one path: the [`SessionManager`] admits it in
//! submission order, the [`PermissionGuard`] decides against grants and the
//! policy table, the [`ContextRouter`] invokes a resolved provider under a
//! deadline with at most one retry, and the [`AuditLog`] records exactly one
//! hash-chained entry for the outcome.
//!
//! The [`IntentEngine`] runs multi-step plans through the same router and
//! compensates committed steps on failure. [`NerveRuntime`] wires the
//! components from configuration and [`ControlServer`] exposes them over
//! newline-delimited JSON-RPC.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod audit;
pub mod guard;
pub mod intent;
pub mod router;
pub mod runtime;
pub mod server;
pub mod session;
pub mod telemetry;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use audit::AuditCursor;
pub use audit::AuditError;
pub use audit::AuditLog;
pub use audit::AuditSink;
pub use audit::ChainTail;
pub use audit::FileAuditSink;
pub use audit::NoopAuditSink;
pub use audit::StderrAuditSink;
pub use audit::read_audit_file;
pub use audit::read_chain_tail;
pub use audit::verify_audit_file;
pub use audit::verify_chain;
pub use guard::Authorization;
pub use guard::AuthorizationToken;
pub use guard::PermissionGuard;
pub use intent::IntentEngine;
pub use intent::PlanError;
pub use router::ContextRouter;
pub use router::DispatchError;
pub use router::PreparedDispatch;
pub use router::RouterSettings;
pub use runtime::NerveRuntime;
pub use runtime::RuntimeError;
pub use server::ControlServer;
pub use server::ServerError;
pub use session::SessionError;
pub use session::SessionLease;
pub use session::SessionManager;
pub use session::SessionSettings;
pub use telemetry::CountingMetrics;
pub use telemetry::MetricsSnapshot;
pub use telemetry::NoopMetrics;
pub use telemetry::RouterMetrics;
