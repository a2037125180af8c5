//! Scheduler statistics.
//!
//! Counters are atomic so admission and dispatch update them without taking the scheduler lock.
//! Values that live under the lock (pending count, stored results) are filled in by the caller
//! when a snapshot is taken.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Cumulative counters for one scheduler instance.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    /// Requests admitted since creation
    total_requests: AtomicU64,
    /// Batches handed to the dispatcher, in either mode
    total_batches: AtomicU64,
    /// Batches served through the per-request fallback
    individual_batches: AtomicU64,
    /// Requests across all dispatched batches
    dispatched_requests: AtomicU64,
    /// Estimated upstream tokens saved by combining requests
    estimated_savings: AtomicU64,
}

impl SchedulerStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_submit(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a combined dispatch. Every request beyond the first saves one upstream call worth
    /// `savings_per_request`.
    pub fn record_combined_batch(&self, size: usize, savings_per_request: u64) {
        self.record_batch(size);
        let saved = (size.saturating_sub(1) as u64).saturating_mul(savings_per_request);
        self.estimated_savings.fetch_add(saved, Ordering::Relaxed);
    }

    pub fn record_individual_batch(&self, size: usize) {
        self.record_batch(size);
        self.individual_batches.fetch_add(1, Ordering::Relaxed);
    }

    fn record_batch(&self, size: usize) {
        self.total_batches.fetch_add(1, Ordering::Relaxed);
        self.dispatched_requests
            .fetch_add(size as u64, Ordering::Relaxed);
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn total_batches(&self) -> u64 {
        self.total_batches.load(Ordering::Relaxed)
    }

    pub fn snapshot(
        &self,
        pending_count: usize,
        stored_results: usize,
        is_running: bool,
    ) -> StatsSnapshot {
        let total_batches = self.total_batches();
        let dispatched = self.dispatched_requests.load(Ordering::Relaxed);
        let average_batch_size = if total_batches == 0 {
            0.0
        } else {
            dispatched as f64 / total_batches as f64
        };

        StatsSnapshot {
            total_requests: self.total_requests(),
            total_batches,
            pending_count,
            estimated_savings: self.estimated_savings.load(Ordering::Relaxed),
            stored_results,
            individual_batches: self.individual_batches.load(Ordering::Relaxed),
            average_batch_size,
            is_running,
        }
    }
}

/// Point-in-time view of scheduler statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub total_requests: u64,
    pub total_batches: u64,
    pub pending_count: usize,
    pub estimated_savings: u64,
    pub stored_results: usize,
    pub individual_batches: u64,
    pub average_batch_size: f64,
    pub is_running: bool,
}
