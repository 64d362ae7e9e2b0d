// crates/nerve-core/src/interfaces/mod.rs
// ============================================================================
// Module: Context Nerve Interfaces
// Description: Provider, cancellation, and clock seams.
// Purpose: Define the contracts that providers and time sources implement.
// Dependencies: async-trait, serde_json, thiserror, tokio
// ============================================================================

//! ## Overview
//! Anything that implements [`ContextProvider`] can be registered as a
//! provider: host subsystems, built-in readers, or external endpoints adopted
//! through the bridge. Providers receive an [`InvocationContext`] carrying the
//! deadline budget and a [`CancelSignal`]; cancellation is cooperative.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;

use crate::model::CapabilityName;
use crate::model::Liveness;
use crate::model::RequestId;
use crate::model::Requestor;
use crate::model::SessionId;
use crate::model::Timestamp;

// ============================================================================
// SECTION: Cancellation
// ============================================================================

/// Sender half of a cancellation pair.
#[derive(Debug)]
pub struct CancelHandle {
    /// Watch sender flipped to `true` on cancel.
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Signals cancellation; repeated calls are no-ops.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Returns true once cancellation has been signalled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Receiver half of a cancellation pair.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    /// Watch receiver observing the cancel flag.
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// Returns true once cancellation has been signalled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when cancellation is signalled or the handle is dropped.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Returns a signal that never fires.
    #[must_use]
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        std::mem::drop(tx);
        Self {
            rx,
        }
    }
}

/// Creates a linked cancellation handle and signal.
#[must_use]
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (
        CancelHandle {
            tx,
        },
        CancelSignal {
            rx,
        },
    )
}

// ============================================================================
// SECTION: Providers
// ============================================================================

/// Context passed to a provider for one invocation.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    /// Request identifier.
    pub request_id: RequestId,
    /// Session identifier.
    pub session_id: SessionId,
    /// Requestor the call is made for.
    pub requestor: Requestor,
    /// Time bound for this attempt.
    pub deadline_ms: u64,
    /// Cooperative cancellation signal.
    pub cancel: CancelSignal,
}

/// Provider-side invocation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Provider does not serve the capability.
    #[error("capability not supported: {0}")]
    Unsupported(CapabilityName),
    /// Parameters were rejected by the provider.
    #[error("invalid params: {0}")]
    InvalidParams(String),
    /// Provider is temporarily unavailable.
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    /// Provider observed cancellation and stopped.
    #[error("invocation cancelled")]
    Cancelled,
    /// Provider failed.
    #[error("provider failed: {0}")]
    Failed(String),
}

impl ProviderError {
    /// Stable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Unsupported(_) => "unsupported_capability",
            Self::InvalidParams(_) => "invalid_params",
            Self::Unavailable(_) => "provider_unavailable",
            Self::Cancelled => "cancelled",
            Self::Failed(_) => "provider_failed",
        }
    }
}

/// A source of context or executor of actions.
///
/// # Invariants
/// - `invoke` is only called for capabilities the provider declared.
/// - Implementations should return promptly once `ctx.cancel` fires.
#[async_trait]
pub trait ContextProvider: Send + Sync {
    /// Invokes one capability.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when the provider cannot produce a result.
    async fn invoke(
        &self,
        capability: &CapabilityName,
        params: &Value,
        ctx: &InvocationContext,
    ) -> Result<Value, ProviderError>;

    /// Reports self-assessed liveness.
    async fn health(&self) -> Liveness {
        Liveness::Active
    }
}

// ============================================================================
// SECTION: Clocks
// ============================================================================

/// Time source for expiry, liveness, and audit timestamps.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> Timestamp;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX));
        Timestamp::from_unix_millis(millis)
    }
}

/// Manually advanced clock for deterministic tests and replays.
#[derive(Debug, Default)]
pub struct ManualClock {
    /// Current time in unix millis.
    millis: AtomicI64,
}

impl ManualClock {
    /// Creates a clock at `start`.
    #[must_use]
    pub const fn new(start: Timestamp) -> Self {
        Self {
            millis: AtomicI64::new(start.as_unix_millis()),
        }
    }

    /// Advances the clock by `millis`.
    pub fn advance(&self, millis: u64) {
        let delta = i64::try_from(millis).unwrap_or(i64::MAX);
        self.millis.fetch_add(delta, Ordering::SeqCst);
    }

    /// Sets the clock to `at`.
    pub fn set(&self, at: Timestamp) {
        self.millis.store(at.as_unix_millis(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_unix_millis(self.millis.load(Ordering::SeqCst))
    }
}
