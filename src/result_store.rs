//! In-memory result records keyed by request id.
//!
//! The store is plain data; callers hold the scheduler lock around every method. It enforces the
//! forward-only status lifecycle: a terminal record is never rewritten, and `Processing` is only
//! entered from `Pending`.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::outcome::{RequestResult, RequestStatus, Resolution};
use crate::request::RequestId;

#[derive(Debug, Default)]
pub struct ResultStore {
    results: HashMap<RequestId, RequestResult>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn get(&self, id: &RequestId) -> Option<&RequestResult> {
        self.results.get(id)
    }

    /// Register a fresh `Pending` record.
    pub fn insert_pending(&mut self, id: RequestId) {
        self.results.insert(id, RequestResult::pending(id));
    }

    /// Move a `Pending` record to `Processing`. Returns false when the record is missing or has
    /// already left `Pending`, in which case the request should not be sent upstream.
    pub fn mark_processing(&mut self, id: &RequestId) -> bool {
        match self.results.get_mut(id) {
            Some(result) if result.status == RequestStatus::Pending => {
                result.status = RequestStatus::Processing;
                true
            }
            _ => false,
        }
    }

    /// Apply a terminal outcome. Returns the updated record, or `None` when the record is missing
    /// or already terminal.
    pub fn resolve(
        &mut self,
        id: &RequestId,
        resolution: Resolution,
        now: Instant,
    ) -> Option<&RequestResult> {
        let result = self.results.get_mut(id)?;
        if result.is_terminal() {
            return None;
        }
        result.resolve(resolution, now);
        Some(result)
    }

    /// Remove terminal records completed more than `max_age` before `now`. Records without a
    /// completion time are kept regardless of age.
    pub fn evict_older_than(&mut self, max_age: Duration, now: Instant) -> usize {
        let before = self.results.len();
        self.results.retain(|_, result| match result.completed_at {
            Some(done) => now.saturating_duration_since(done) <= max_age,
            None => true,
        });
        before - self.results.len()
    }
}
