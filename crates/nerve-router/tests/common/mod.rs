// crates/nerve-router/tests/common/mod.rs
// =============================================================================
// Module: Router Test Helpers
// Description: Shared fixtures for nerve-router integration tests.
// Purpose: Build runtimes on a manual clock and script provider behavior.
// =============================================================================

#![allow(dead_code, reason = "Shared helpers are not used by every test binary.")]

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use nerve_config::NerveConfig;
use nerve_core::CapabilityName;
use nerve_core::CapabilityPattern;
use nerve_core::ContextProvider;
use nerve_core::Grant;
use nerve_core::InvocationContext;
use nerve_core::ManualClock;
use nerve_core::ProviderError;
use nerve_core::Request;
use nerve_core::Requestor;
use nerve_core::RequestorClass;
use nerve_core::SessionId;
use nerve_core::Timestamp;
use nerve_router::NerveRuntime;
use serde_json::Value;

/// Result type used by router tests.
pub type TestResult = Result<(), String>;

/// Start of the manual clock.
pub const START_MS: i64 = 1_700_000_000_000;

/// Parses a capability name, mapping failures to strings.
pub fn name(raw: &str) -> Result<CapabilityName, String> {
    CapabilityName::parse(raw).map_err(|err| err.to_string())
}

/// Parses a capability pattern, mapping failures to strings.
pub fn pattern(raw: &str) -> Result<CapabilityPattern, String> {
    CapabilityPattern::parse(raw).map_err(|err| err.to_string())
}

/// Returns a config with no built-in providers and no stderr audit mirror.
pub fn quiet_config() -> NerveConfig {
    let mut config = NerveConfig::default();
    config.providers.system_info = false;
    config.audit.stderr = false;
    config
}

/// Builds a runtime on a manual clock.
pub fn host(config: NerveConfig) -> Result<(NerveRuntime, Arc<ManualClock>), String> {
    let clock = Arc::new(ManualClock::new(Timestamp::from_unix_millis(START_MS)));
    let runtime = NerveRuntime::with_clock(config, clock.clone()).map_err(|err| err.to_string())?;
    Ok((runtime, clock))
}

/// Opens a session and attaches `grants`.
pub fn open(
    runtime: &NerveRuntime,
    class: RequestorClass,
    grants: Vec<Grant>,
) -> Result<SessionId, String> {
    let session = runtime
        .sessions()
        .open(Requestor::new("agent", class))
        .map_err(|err| err.to_string())?;
    for grant in grants {
        runtime.sessions().grant(&session.session_id, grant).map_err(|err| err.to_string())?;
    }
    Ok(session.session_id)
}

/// Builds a request with a one second deadline.
pub fn request(session_id: &SessionId, capability: &str, params: Value) -> Result<Request, String> {
    Ok(Request::new(session_id.clone(), name(capability)?, params, 1_000))
}

/// Scripted provider behavior.
#[derive(Clone)]
pub enum Behavior {
    /// Returns the value.
    Reply(Value),
    /// Fails with a provider error.
    Fail,
    /// Waits for cancellation.
    Hang,
}

/// Provider that follows a script and counts invocations.
pub struct Scripted {
    /// Script.
    behavior: Behavior,
    /// Invocation counter.
    calls: Arc<AtomicUsize>,
}

impl Scripted {
    /// Creates a provider and returns its invocation counter.
    pub fn new(behavior: Behavior) -> (Arc<Self>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = Arc::new(Self {
            behavior,
            calls: Arc::clone(&calls),
        });
        (provider, calls)
    }
}

#[async_trait]
impl ContextProvider for Scripted {
    async fn invoke(
        &self,
        _capability: &CapabilityName,
        _params: &Value,
        ctx: &InvocationContext,
    ) -> Result<Value, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::Reply(value) => Ok(value.clone()),
            Behavior::Fail => Err(ProviderError::Failed("scripted failure".to_string())),
            Behavior::Hang => {
                ctx.cancel.cancelled().await;
                Err(ProviderError::Cancelled)
            }
        }
    }
}

/// Reads an invocation counter.
pub fn count(calls: &AtomicUsize) -> usize {
    calls.load(Ordering::SeqCst)
}
