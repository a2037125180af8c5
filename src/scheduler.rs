//! The batch scheduler handle.
//!
//! Callers submit requests and receive an id immediately. A background loop evaluates the flush
//! policy on a fixed tick and hands due batches to the dispatcher; results are read back by id,
//! awaited with a bounded poll, or observed on the event stream.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::dispatch::Dispatcher;
use crate::keyweights::KeyWeights;
use crate::metrics::Metrics;
use crate::outcome::{RequestResult, ResultEvent};
use crate::prompt::PromptBuilder;
use crate::request::RequestId;
use crate::settings::{CleanupConfig, PromptConfig, SchedulerConfig};
use crate::state::Shared;
use crate::stats::StatsSnapshot;
use crate::upstream::Upstream;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("no result for request {0}")]
    NotFound(RequestId),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub struct BatchScheduler {
    shared: Arc<Shared>,
    dispatcher: Arc<Dispatcher>,
    cleanup: CleanupConfig,
}

impl BatchScheduler {
    pub fn new(
        config: SchedulerConfig,
        prompt: &PromptConfig,
        upstream: Arc<dyn Upstream>,
        metrics: Option<Metrics>,
    ) -> Result<Self, SchedulerError> {
        config.validate()?;
        let prompt = PromptBuilder::new(prompt, config.max_candidates);
        let shared = Arc::new(Shared::new(config, metrics));
        let dispatcher = Arc::new(Dispatcher::new(upstream, prompt, Arc::clone(&shared)));
        Ok(Self {
            shared,
            dispatcher,
            cleanup: CleanupConfig {
                result_ttl_secs: None,
                ..CleanupConfig::default()
            },
        })
    }

    /// Enable the periodic sweep of old results while the scheduler runs.
    pub fn with_cleanup(mut self, cleanup: CleanupConfig) -> Self {
        self.cleanup = cleanup;
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Admit a request. Returns as soon as the request is buffered.
    pub fn submit(
        &self,
        payload: KeyWeights,
        max_results: usize,
    ) -> Result<RequestId, SchedulerError> {
        self.admit(None, payload, max_results)
    }

    /// Admit a request with a display label rendered next to it in combined payloads.
    pub fn submit_with_subject(
        &self,
        subject: impl Into<String>,
        payload: KeyWeights,
        max_results: usize,
    ) -> Result<RequestId, SchedulerError> {
        self.admit(Some(subject.into()), payload, max_results)
    }

    fn admit(
        &self,
        subject: Option<String>,
        payload: KeyWeights,
        max_results: usize,
    ) -> Result<RequestId, SchedulerError> {
        if payload.is_empty() {
            return Err(SchedulerError::InvalidRequest("payload is empty".to_string()));
        }
        if max_results == 0 {
            return Err(SchedulerError::InvalidRequest(
                "max_results must be positive".to_string(),
            ));
        }

        let candidates = payload.len();
        let (id, pending) = self.shared.admit(subject, payload, max_results);

        self.shared.stats.record_submit();
        if let Some(metrics) = &self.shared.metrics {
            metrics.record_submit(pending);
        }
        debug!(request_id = %id, candidates, pending, "request admitted");
        Ok(id)
    }

    pub fn get_result(&self, id: &RequestId) -> Result<RequestResult, SchedulerError> {
        self.shared.get(id).ok_or(SchedulerError::NotFound(*id))
    }

    /// Poll until the result is terminal or `timeout` passes. On timeout the result is failed
    /// (unless it finished in the meantime) and returned.
    pub async fn await_result(
        &self,
        id: &RequestId,
        timeout: Duration,
    ) -> Result<RequestResult, SchedulerError> {
        let deadline = Instant::now() + timeout;
        let poll_interval = self.shared.config.poll_interval();

        loop {
            let result = self.get_result(id)?;
            if result.is_terminal() {
                return Ok(result);
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(poll_interval.min(deadline - now)).await;
        }

        let result = self
            .shared
            .fail_on_timeout(id)
            .ok_or(SchedulerError::NotFound(*id))?;
        debug!(
            request_id = %id,
            status = result.status.as_str(),
            "wait for result ended by timeout"
        );
        Ok(result)
    }

    /// `await_result` with the configured default timeout.
    pub async fn await_result_default(
        &self,
        id: &RequestId,
    ) -> Result<RequestResult, SchedulerError> {
        self.await_result(id, self.shared.config.default_wait_timeout()).await
    }

    pub fn stats(&self) -> StatsSnapshot {
        let (pending, stored) = self.shared.counts();
        self.shared.stats.snapshot(pending, stored, self.shared.is_running())
    }

    /// Remove results that completed more than `max_age` ago. Returns how many were removed.
    pub fn cleanup(&self, max_age: Duration) -> usize {
        let removed = self.shared.cleanup(max_age);
        if removed > 0 {
            info!(removed, max_age_secs = max_age.as_secs(), "evicted old results");
        }
        removed
    }

    /// Receive an event every time a result becomes terminal.
    pub fn subscribe(&self) -> broadcast::Receiver<ResultEvent> {
        self.shared.subscribe()
    }

    /// Creation time of the oldest request still waiting for a batch.
    pub fn oldest_pending(&self) -> Option<Instant> {
        self.shared.oldest_pending()
    }

    /// Run one flush-policy evaluation now, dispatching a due batch to completion. Returns how
    /// many requests were flushed.
    pub async fn flush_if_due(&self) -> usize {
        self.dispatcher.flush_if_due().await
    }

    /// Start the trigger loop (and the cleanup sweep when configured). Must be called within a
    /// tokio runtime. Starting a running scheduler does nothing.
    pub fn start(&self) {
        let Some(epoch) = self.shared.begin_run() else {
            return;
        };

        let tick = self.shared.config.tick_interval();
        info!(tick_ms = tick.as_millis() as u64, "batch scheduler started");

        let shared = Arc::clone(&self.shared);
        let dispatcher = Arc::clone(&self.dispatcher);
        tokio::spawn(async move {
            while shared.is_current(epoch) {
                let delay = tokio::time::sleep(tick);
                tokio::pin!(delay);
                tokio::select! {
                    _ = &mut delay => {},
                    _ = shared.shutdown.notified() => {}
                }
                if !shared.is_current(epoch) {
                    break;
                }
                dispatcher.flush_if_due().await;
            }
            debug!("trigger loop exited");
        });

        if let Some(ttl) = self.cleanup.result_ttl() {
            let interval = self.cleanup.interval();
            let shared = Arc::clone(&self.shared);
            tokio::spawn(async move {
                while shared.is_current(epoch) {
                    let delay = tokio::time::sleep(interval);
                    tokio::pin!(delay);
                    tokio::select! {
                        _ = &mut delay => {},
                        _ = shared.shutdown.notified() => {}
                    }
                    if !shared.is_current(epoch) {
                        break;
                    }
                    let removed = shared.cleanup(ttl);
                    if removed > 0 {
                        info!(
                            removed,
                            ttl_secs = ttl.as_secs(),
                            "periodic cleanup evicted results"
                        );
                    }
                }
                debug!("cleanup loop exited");
            });
        }
    }

    /// Signal the background loops to exit. A batch already being dispatched runs to completion.
    pub fn stop(&self) {
        if self.shared.is_running() {
            info!("batch scheduler stopping");
        }
        self.shared.end_run();
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }
}

impl Drop for BatchScheduler {
    fn drop(&mut self) {
        self.shared.end_run();
    }
}
