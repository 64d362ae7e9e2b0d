// crates/nerve-providers/tests/common/mod.rs
// =============================================================================
// Module: Provider Test Helpers
// Description: Shared fixtures for nerve-providers integration tests.
// Purpose: Build invocation contexts and capability names.
// =============================================================================

#![allow(dead_code, reason = "Shared helpers are not used by every test binary.")]

use nerve_core::CancelSignal;
use nerve_core::CapabilityName;
use nerve_core::InvocationContext;
use nerve_core::RequestId;
use nerve_core::Requestor;
use nerve_core::RequestorClass;
use nerve_core::SessionId;

/// Result type used by provider tests.
pub type TestResult = Result<(), String>;

/// Parses a capability name, mapping failures to strings.
pub fn name(raw: &str) -> Result<CapabilityName, String> {
    CapabilityName::parse(raw).map_err(|err| err.to_string())
}

/// Returns an invocation context that is never cancelled.
pub fn ctx() -> InvocationContext {
    InvocationContext {
        request_id: RequestId::new("req-test"),
        session_id: SessionId::new("sess-test"),
        requestor: Requestor::new("tester", RequestorClass::User),
        deadline_ms: 1_000,
        cancel: CancelSignal::never(),
    }
}
