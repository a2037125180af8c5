//! Batch dispatch: one combined upstream call per batch, or per-request calls when the upstream
//! cannot take combined work.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::metrics::{MODE_COMBINED, MODE_INDIVIDUAL};
use crate::outcome::{FailureKind, Resolution, ResultError};
use crate::prompt::PromptBuilder;
use crate::reconcile::{self, ReconcileError};
use crate::request::{Request, RequestId};
use crate::state::Shared;
use crate::upstream::{Upstream, UpstreamError};

pub(crate) struct Dispatcher {
    upstream: Arc<dyn Upstream>,
    prompt: PromptBuilder,
    shared: Arc<Shared>,
}

impl Dispatcher {
    pub(crate) fn new(
        upstream: Arc<dyn Upstream>,
        prompt: PromptBuilder,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            upstream,
            prompt,
            shared,
        }
    }

    /// Evaluate the flush policy once and dispatch the due batch, if any. Returns how many
    /// requests were taken from the pending buffer.
    pub(crate) async fn flush_if_due(&self) -> usize {
        match self.shared.take_due_batch(Instant::now()) {
            Some(batch) => {
                let taken = batch.len();
                self.dispatch(batch).await;
                taken
            }
            None => 0,
        }
    }

    /// Drive a batch to terminal results. Never panics: a panic anywhere in the upstream call or
    /// reconciliation fails every request of the batch that is still unresolved.
    pub(crate) async fn dispatch(&self, batch: Vec<Request>) {
        let claimed = self.shared.claim_for_processing(batch);
        if claimed.is_empty() {
            return;
        }

        let outcome = AssertUnwindSafe(self.run(&claimed)).catch_unwind().await;
        if let Err(panic) = outcome {
            let message = panic_message(panic.as_ref());
            warn!(batch_size = claimed.len(), error = %message, "batch dispatch panicked");
            let error = ResultError::new(FailureKind::Internal, message);
            self.fail_all(&claimed, error);
        }
    }

    async fn run(&self, batch: &[Request]) {
        if self.upstream.is_available() {
            self.dispatch_combined(batch).await;
        } else {
            self.dispatch_individually(batch).await;
        }
    }

    async fn dispatch_combined(&self, batch: &[Request]) {
        let payload = self.prompt.batch(batch);
        let savings = self.shared.config.savings_per_coalesced_request;
        self.shared.stats.record_combined_batch(batch.len(), savings);
        if let Some(metrics) = &self.shared.metrics {
            metrics.record_batch(MODE_COMBINED, batch.len());
        }
        info!(batch_size = batch.len(), "dispatching combined batch");

        let started = Instant::now();
        let response = self.upstream.invoke_batch(&payload).await;
        self.observe_call(MODE_COMBINED, started);

        let text = match response {
            Ok(text) => text,
            Err(e) => {
                warn!(batch_size = batch.len(), error = %e, "combined upstream call failed");
                self.fail_all(batch, upstream_failure(&e));
                return;
            }
        };

        let mut by_position = reconcile::parse_batch_response(&text);
        let outcomes: Vec<(RequestId, Resolution)> = batch
            .iter()
            .enumerate()
            .map(|(index, request)| {
                let resolution = match by_position.remove(&index) {
                    Some(labels) => reconcile_request(&labels, request),
                    None => {
                        debug!(
                            request_id = %request.id,
                            position = index + 1,
                            "missing position in combined response"
                        );
                        Resolution::Failed(ReconcileError::MissingPosition(index + 1).into())
                    }
                };
                (request.id, resolution)
            })
            .collect();

        let completed = outcomes
            .iter()
            .filter(|(_, r)| matches!(r, Resolution::Completed(_)))
            .count();
        self.shared.resolve_many(outcomes);
        info!(
            batch_size = batch.len(),
            completed,
            failed = batch.len() - completed,
            "combined batch reconciled"
        );
    }

    async fn dispatch_individually(&self, batch: &[Request]) {
        self.shared.stats.record_individual_batch(batch.len());
        if let Some(metrics) = &self.shared.metrics {
            metrics.record_batch(MODE_INDIVIDUAL, batch.len());
        }
        info!(
            batch_size = batch.len(),
            "upstream unavailable for combined work, falling back to individual calls"
        );

        for request in batch {
            let payload = self.prompt.single(request);
            let started = Instant::now();
            let response = self.upstream.invoke_single(&payload).await;
            self.observe_call(MODE_INDIVIDUAL, started);

            let resolution = match response {
                Ok(text) => {
                    let labels = reconcile::parse_single_response(&text);
                    reconcile_request(&labels, request)
                }
                Err(e) => {
                    debug!(request_id = %request.id, error = %e, "individual upstream call failed");
                    Resolution::Failed(upstream_failure(&e))
                }
            };
            self.shared.resolve(request.id, resolution);
        }
    }

    fn fail_all(&self, batch: &[Request], error: ResultError) {
        let outcomes = batch
            .iter()
            .map(|r| (r.id, Resolution::Failed(error.clone())))
            .collect();
        self.shared.resolve_many(outcomes);
    }

    fn observe_call(&self, mode: &str, started: Instant) {
        if let Some(metrics) = &self.shared.metrics {
            metrics.record_upstream_duration(mode, started.elapsed().as_secs_f64());
        }
    }
}

fn reconcile_request(labels: &[String], request: &Request) -> Resolution {
    match reconcile::reconcile(labels, &request.payload, request.max_results) {
        Ok(reconciled) => Resolution::Completed(reconciled),
        Err(e) => {
            debug!(request_id = %request.id, error = %e, "reconciliation miss");
            Resolution::Failed(e.into())
        }
    }
}

fn upstream_failure(e: &UpstreamError) -> ResultError {
    ResultError::new(FailureKind::Upstream, e.to_string())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "dispatch panicked".to_string()
    }
}
