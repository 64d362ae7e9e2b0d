// crates/nerve-router/src/telemetry.rs
// ============================================================================
// Module: Router Telemetry
// Description: Metric hooks for dispatch outcomes and latency.
// Purpose: Count requests and latencies without a metrics backend dependency.
// Dependencies: nerve-core
// ============================================================================

//! ## Overview
//! The router reports every terminal outcome through [`RouterMetrics`].
//! Deployments can adapt the trait to a metrics backend; [`CountingMetrics`]
//! keeps in-process counters and a fixed-bucket latency histogram.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use nerve_core::AuditOutcome;
use nerve_core::CapabilityName;
use nerve_core::RequestorClass;
use serde::Serialize;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Latency bucket upper bounds in milliseconds.
pub const DISPATCH_LATENCY_BUCKETS_MS: &[u64] =
    &[1, 2, 5, 10, 25, 50, 100, 250, 500, 1_000, 2_500, 5_000, 10_000, 30_000];

// ============================================================================
// SECTION: Events
// ============================================================================

/// Dispatch metric event payload.
#[derive(Debug, Clone)]
pub struct DispatchMetricEvent {
    /// Requested capability.
    pub capability: CapabilityName,
    /// Requestor class, when the session was resolvable.
    pub requestor_class: Option<RequestorClass>,
    /// Terminal outcome.
    pub outcome: AuditOutcome,
    /// Provider attempts made.
    pub attempts: usize,
}

// ============================================================================
// SECTION: Trait
// ============================================================================

/// Metrics sink for routed requests.
pub trait RouterMetrics: Send + Sync {
    /// Records one terminal outcome with its end-to-end latency.
    fn record_dispatch(&self, event: &DispatchMetricEvent, latency: Duration);
}

/// No-op metrics sink.
pub struct NoopMetrics;

impl RouterMetrics for NoopMetrics {
    fn record_dispatch(&self, _event: &DispatchMetricEvent, _latency: Duration) {}
}

// ============================================================================
// SECTION: Counting Metrics
// ============================================================================

/// Point-in-time copy of [`CountingMetrics`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// All terminal outcomes.
    pub total: u64,
    /// Successful requests.
    pub successful: u64,
    /// Denied requests.
    pub denied: u64,
    /// Requests that failed after authorization.
    pub failed: u64,
    /// Mean latency in milliseconds.
    pub average_latency_ms: u64,
    /// Counts per latency bucket; the final slot counts overflow.
    pub latency_buckets: Vec<u64>,
}

/// In-process counters.
pub struct CountingMetrics {
    /// All outcomes.
    total: AtomicU64,
    /// Successes.
    successful: AtomicU64,
    /// Denials.
    denied: AtomicU64,
    /// Post-authorization failures.
    failed: AtomicU64,
    /// Sum of latencies.
    latency_sum_ms: AtomicU64,
    /// Histogram slots, one per bucket plus overflow.
    buckets: Vec<AtomicU64>,
}

impl Default for CountingMetrics {
    fn default() -> Self {
        Self {
            total: AtomicU64::new(0),
            successful: AtomicU64::new(0),
            denied: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            latency_sum_ms: AtomicU64::new(0),
            buckets: (0..=DISPATCH_LATENCY_BUCKETS_MS.len()).map(|_| AtomicU64::new(0)).collect(),
        }
    }
}

impl CountingMetrics {
    /// Returns current counter values.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let total = self.total.load(Ordering::Relaxed);
        let sum = self.latency_sum_ms.load(Ordering::Relaxed);
        MetricsSnapshot {
            total,
            successful: self.successful.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            average_latency_ms: sum.checked_div(total).unwrap_or(0),
            latency_buckets: self.buckets.iter().map(|b| b.load(Ordering::Relaxed)).collect(),
        }
    }
}

impl RouterMetrics for CountingMetrics {
    fn record_dispatch(&self, event: &DispatchMetricEvent, latency: Duration) {
        self.total.fetch_add(1, Ordering::Relaxed);
        let counter = match event.outcome {
            AuditOutcome::Success => &self.successful,
            AuditOutcome::Denied => &self.denied,
            AuditOutcome::NoProvider | AuditOutcome::Timeout | AuditOutcome::ProviderError => {
                &self.failed
            }
        };
        counter.fetch_add(1, Ordering::Relaxed);
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_sum_ms.fetch_add(millis, Ordering::Relaxed);
        let slot = DISPATCH_LATENCY_BUCKETS_MS
            .iter()
            .position(|bound| millis <= *bound)
            .unwrap_or(DISPATCH_LATENCY_BUCKETS_MS.len());
        if let Some(bucket) = self.buckets.get(slot) {
            bucket.fetch_add(1, Ordering::Relaxed);
        }
    }
}
