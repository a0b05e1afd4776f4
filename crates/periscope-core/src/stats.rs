//! Supportability counters for the agent itself.
//!
//! Lock-free and cheap enough to bump on every wrapped call.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Counters describing what the instrumentation core has done.
#[derive(Debug, Clone, Default)]
pub struct AgentStats {
    inner: Arc<StatsInner>,
}

#[derive(Debug, Default)]
struct StatsInner {
    transactions_started: AtomicU64,
    transactions_finished: AtomicU64,
    segments_created: AtomicU64,
    segments_dropped: AtomicU64,
    misuse_events: AtomicU64,
    instrumentation_failures: AtomicU64,
}

/// Point-in-time copy of [`AgentStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Transactions started.
    pub transactions_started: u64,
    /// Transactions ended.
    pub transactions_finished: u64,
    /// Segments created.
    pub segments_created: u64,
    /// Segments refused because the transaction was full.
    pub segments_dropped: u64,
    /// Misuse diagnostics.
    pub misuse_events: u64,
    /// Instrumentation failure diagnostics.
    pub instrumentation_failures: u64,
}

impl AgentStats {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_transaction_started(&self) {
        self.inner.transactions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transaction_finished(&self) {
        self.inner
            .transactions_finished
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_segment_created(&self) {
        self.inner.segments_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_segment_dropped(&self) {
        self.inner.segments_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_misuse(&self) {
        self.inner.misuse_events.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_instrumentation_failure(&self) {
        self.inner
            .instrumentation_failures
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of transactions currently open.
    #[must_use]
    pub fn transactions_open(&self) -> u64 {
        let snapshot = self.snapshot();
        snapshot
            .transactions_started
            .saturating_sub(snapshot.transactions_finished)
    }

    /// Returns a consistent-enough copy of all counters.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            transactions_started: self.inner.transactions_started.load(Ordering::Relaxed),
            transactions_finished: self.inner.transactions_finished.load(Ordering::Relaxed),
            segments_created: self.inner.segments_created.load(Ordering::Relaxed),
            segments_dropped: self.inner.segments_dropped.load(Ordering::Relaxed),
            misuse_events: self.inner.misuse_events.load(Ordering::Relaxed),
            instrumentation_failures: self
                .inner
                .instrumentation_failures
                .load(Ordering::Relaxed),
        }
    }
}
