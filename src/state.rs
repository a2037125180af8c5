//! State shared between the scheduler handle, its background loops, and the dispatcher.
//!
//! The pending buffer and the result store sit behind one `std::sync::Mutex`. Every method here
//! takes and releases the lock synchronously, so no guard ever lives across an `.await`. Event
//! publication and metrics happen after the guard is dropped.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{broadcast, Notify};
use tokio::time::Instant;
use tracing::debug;

use crate::keyweights::KeyWeights;
use crate::metrics::Metrics;
use crate::outcome::{FailureKind, RequestResult, Resolution, ResultError, ResultEvent};
use crate::pending::{FlushPolicy, PendingBuffer};
use crate::request::{Request, RequestId};
use crate::result_store::ResultStore;
use crate::settings::SchedulerConfig;
use crate::stats::SchedulerStats;

pub(crate) const TIMEOUT_MESSAGE: &str = "processing timed out";

#[derive(Debug, Default)]
struct SchedulerState {
    pending: PendingBuffer,
    results: ResultStore,
}

pub(crate) struct Shared {
    state: Mutex<SchedulerState>,
    pub(crate) config: SchedulerConfig,
    pub(crate) policy: FlushPolicy,
    pub(crate) stats: SchedulerStats,
    pub(crate) metrics: Option<Metrics>,
    events: broadcast::Sender<ResultEvent>,
    running: AtomicBool,
    /// Bumped on every start so loops from an earlier start never outlive it
    epoch: AtomicU64,
    pub(crate) shutdown: Notify,
}

impl Shared {
    pub(crate) fn new(config: SchedulerConfig, metrics: Option<Metrics>) -> Self {
        let (events, _) = broadcast::channel(config.event_channel_capacity);
        Self {
            state: Mutex::new(SchedulerState::default()),
            policy: config.flush_policy(),
            config,
            stats: SchedulerStats::new(),
            metrics,
            events,
            running: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            shutdown: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Build a request, append it and register its pending result in one lock scope. Returns the
    /// new id and pending count.
    ///
    /// `created_at` is stamped under the lock so buffer order always matches creation order.
    pub(crate) fn admit(
        &self,
        subject: Option<String>,
        payload: KeyWeights,
        max_results: usize,
    ) -> (RequestId, usize) {
        let mut state = self.lock();
        let request = Request::new(subject, payload, max_results, Instant::now());
        let id = request.id;
        state.results.insert_pending(id);
        state.pending.push(request);
        (id, state.pending.len())
    }

    /// Drain the next batch if the flush policy says the buffer is due.
    pub(crate) fn take_due_batch(&self, now: Instant) -> Option<Vec<Request>> {
        let (batch, remaining) = {
            let mut state = self.lock();
            let batch = state.pending.take_due_batch(&self.policy, now)?;
            (batch, state.pending.len())
        };
        if let Some(metrics) = &self.metrics {
            metrics.set_pending_requests(remaining);
        }
        Some(batch)
    }

    /// Move every request of a batch to `Processing`, dropping the ones whose result was already
    /// resolved or evicted while they waited.
    pub(crate) fn claim_for_processing(&self, batch: Vec<Request>) -> Vec<Request> {
        let mut state = self.lock();
        batch
            .into_iter()
            .filter(|request| {
                let claimed = state.results.mark_processing(&request.id);
                if !claimed {
                    debug!(request_id = %request.id, "skipping request resolved before dispatch");
                }
                claimed
            })
            .collect()
    }

    pub(crate) fn resolve(&self, id: RequestId, resolution: Resolution) -> bool {
        self.resolve_many(vec![(id, resolution)]) == 1
    }

    /// Apply terminal outcomes in one lock scope, then publish them. Outcomes for results that
    /// are missing or already terminal are discarded. Returns how many were applied.
    pub(crate) fn resolve_many(&self, outcomes: Vec<(RequestId, Resolution)>) -> usize {
        let now = Instant::now();
        let applied: Vec<RequestResult> = {
            let mut state = self.lock();
            outcomes
                .into_iter()
                .filter_map(|(id, resolution)| {
                    let applied = state.results.resolve(&id, resolution, now).cloned();
                    if applied.is_none() {
                        debug!(request_id = %id, "discarding late outcome");
                    }
                    applied
                })
                .collect()
        };

        for result in &applied {
            self.publish(result);
        }
        applied.len()
    }

    /// Fail a result that a waiter gave up on. A result that became terminal in the meantime is
    /// returned unchanged. `None` means the id is unknown.
    pub(crate) fn fail_on_timeout(&self, id: &RequestId) -> Option<RequestResult> {
        let (result, newly_failed) = {
            let mut state = self.lock();
            let existing = state.results.get(id)?;
            if existing.is_terminal() {
                (existing.clone(), false)
            } else {
                let failed = Resolution::Failed(ResultError::new(
                    FailureKind::Timeout,
                    TIMEOUT_MESSAGE,
                ));
                let result = state.results.resolve(id, failed, Instant::now())?.clone();
                (result, true)
            }
        };

        if newly_failed {
            self.publish(&result);
        }
        Some(result)
    }

    pub(crate) fn get(&self, id: &RequestId) -> Option<RequestResult> {
        self.lock().results.get(id).cloned()
    }

    pub(crate) fn cleanup(&self, max_age: Duration) -> usize {
        self.lock().results.evict_older_than(max_age, Instant::now())
    }

    /// Pending count and stored result count, read together.
    pub(crate) fn counts(&self) -> (usize, usize) {
        let state = self.lock();
        (state.pending.len(), state.results.len())
    }

    pub(crate) fn oldest_pending(&self) -> Option<Instant> {
        self.lock().pending.oldest_timestamp()
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<ResultEvent> {
        self.events.subscribe()
    }

    fn publish(&self, result: &RequestResult) {
        if let Some(metrics) = &self.metrics {
            metrics.record_result(result);
        }
        // No subscribers is fine.
        let _ = self.events.send(ResultEvent::from(result));
    }

    /// Mark running and return the epoch the new loops belong to, or `None` if already running.
    pub(crate) fn begin_run(&self) -> Option<u64> {
        if self.running.swap(true, Ordering::SeqCst) {
            return None;
        }
        Some(self.epoch.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub(crate) fn end_run(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_waiters();
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Whether a loop started in `epoch` should keep going.
    pub(crate) fn is_current(&self, epoch: u64) -> bool {
        self.is_running() && self.epoch.load(Ordering::SeqCst) == epoch
    }
}
