//! Pending buffer of admitted-but-unbatched requests and the flush policy evaluated on each tick.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::request::Request;

/// Thresholds deciding when the pending buffer is flushed into a batch.
///
/// A flush happens when any of these holds:
/// - the oldest buffered request has waited `buffer_time_budget`
/// - `max_batch_size` requests are buffered
/// - at least two requests are buffered and the oldest has waited `secondary_threshold`
#[derive(Debug, Clone, Copy)]
pub struct FlushPolicy {
    pub buffer_time_budget: Duration,
    pub secondary_threshold: Duration,
    pub max_batch_size: usize,
}

impl FlushPolicy {
    pub fn should_flush(&self, buffered: usize, elapsed: Duration) -> bool {
        if buffered == 0 {
            return false;
        }
        elapsed >= self.buffer_time_budget
            || buffered >= self.max_batch_size
            || (buffered >= 2 && elapsed >= self.secondary_threshold)
    }
}

/// Requests waiting to be claimed by a batch, oldest first.
///
/// `oldest_timestamp` is the `created_at` of the head request and is unset exactly when the buffer
/// is empty. Only admission appends and only the trigger drains.
#[derive(Debug, Default)]
pub struct PendingBuffer {
    requests: VecDeque<Request>,
    oldest_timestamp: Option<Instant>,
}

impl PendingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn oldest_timestamp(&self) -> Option<Instant> {
        self.oldest_timestamp
    }

    /// Append an admitted request. The first request into an empty buffer starts its clock.
    pub fn push(&mut self, request: Request) {
        if self.requests.is_empty() {
            self.oldest_timestamp = Some(request.created_at);
        }
        self.requests.push_back(request);
    }

    /// Time the oldest buffered request has been waiting, or zero when empty.
    pub fn elapsed(&self, now: Instant) -> Duration {
        self.oldest_timestamp
            .map(|oldest| now.saturating_duration_since(oldest))
            .unwrap_or(Duration::ZERO)
    }

    /// Drain up to `policy.max_batch_size` requests if the policy says the buffer is due.
    pub fn take_due_batch(&mut self, policy: &FlushPolicy, now: Instant) -> Option<Vec<Request>> {
        if !policy.should_flush(self.len(), self.elapsed(now)) {
            return None;
        }
        Some(self.drain_front(policy.max_batch_size))
    }

    /// Remove up to `max` requests from the head and re-derive the oldest timestamp.
    pub fn drain_front(&mut self, max: usize) -> Vec<Request> {
        let take = max.min(self.requests.len());
        let batch: Vec<Request> = self.requests.drain(..take).collect();
        self.oldest_timestamp = self.requests.front().map(|r| r.created_at);
        batch
    }

    pub fn iter(&self) -> impl Iterator<Item = &Request> {
        self.requests.iter()
    }
}
