//! Dispatch metrics for observability

use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics for the fan-out loop
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    /// Raw messages pulled from the source
    received: AtomicU64,
    /// Messages dropped because the extractor failed
    decode_failures: AtomicU64,
    /// Decoded events handed to the worker pool
    fanned_out: AtomicU64,
    /// Consumer dispatches that returned an error
    dispatch_failures: AtomicU64,
    /// Consumer dispatches cut off by the dispatch timeout
    timeouts: AtomicU64,
}

impl DispatchMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn inc_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::Relaxed)
    }

    pub fn inc_decode_failures(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fanned_out(&self) -> u64 {
        self.fanned_out.load(Ordering::Relaxed)
    }

    pub fn inc_fanned_out(&self) {
        self.fanned_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dispatch_failures(&self) -> u64 {
        self.dispatch_failures.load(Ordering::Relaxed)
    }

    pub fn inc_dispatch_failures(&self) {
        self.dispatch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    pub fn inc_timeouts(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> DispatchSnapshot {
        DispatchSnapshot {
            received: self.received(),
            decode_failures: self.decode_failures(),
            fanned_out: self.fanned_out(),
            dispatch_failures: self.dispatch_failures(),
            timeouts: self.timeouts(),
        }
    }
}

/// Snapshot of fan-out metrics (for reporting)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSnapshot {
    pub received: u64,
    pub decode_failures: u64,
    pub fanned_out: u64,
    pub dispatch_failures: u64,
    pub timeouts: u64,
}

/// Metrics for a single consumer
#[derive(Debug, Default)]
pub struct ConsumerMetrics {
    /// Responses sent to the session
    delivered: AtomicU64,
    /// Events dropped by the status gate
    gated: AtomicU64,
    /// Dispatches that returned an error
    failures: AtomicU64,
    /// Accepted status switches
    status_changes: AtomicU64,
}

impl ConsumerMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn inc_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn gated(&self) -> u64 {
        self.gated.load(Ordering::Relaxed)
    }

    pub fn inc_gated(&self) {
        self.gated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn inc_failures(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn status_changes(&self) -> u64 {
        self.status_changes.load(Ordering::Relaxed)
    }

    pub fn inc_status_changes(&self) {
        self.status_changes.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> ConsumerSnapshot {
        ConsumerSnapshot {
            delivered: self.delivered(),
            gated: self.gated(),
            failures: self.failures(),
            status_changes: self.status_changes(),
        }
    }
}

/// Snapshot of consumer metrics (for reporting)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerSnapshot {
    pub delivered: u64,
    pub gated: u64,
    pub failures: u64,
    pub status_changes: u64,
}

impl ConsumerSnapshot {
    /// Events that reached this consumer, whatever the outcome
    pub fn dispatched(&self) -> u64 {
        self.delivered + self.gated + self.failures
    }
}
