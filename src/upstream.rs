//! Upstream processor contract.
//!
//! The scheduler talks to its expensive collaborator only through [`Upstream`]. A combined call
//! answers a whole batch; a single call answers one request and is used when the upstream reports
//! itself unavailable for combined work.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::prompt::offered_keys;

/// Error types for upstream invocations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("upstream unavailable")]
    Unavailable,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("quota exhausted: {0}")]
    Quota(String),

    #[error("upstream rejected request: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait Upstream: Send + Sync {
    /// Whether combined invocation is currently possible. When false the dispatcher falls back to
    /// per-request `invoke_single` calls.
    fn is_available(&self) -> bool;

    /// Answer a combined payload with one `"<n>. label, label"` line per position.
    async fn invoke_batch(&self, payload: &str) -> Result<String, UpstreamError>;

    /// Answer a single-request payload with a comma-separated label list.
    async fn invoke_single(&self, payload: &str) -> Result<String, UpstreamError>;
}

/// An upstream that is never available and fails every call - used when nothing is configured
pub struct NullUpstream;

impl NullUpstream {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl Default for NullUpstream {
    fn default() -> Self {
        Self
    }
}

#[async_trait]
impl Upstream for NullUpstream {
    fn is_available(&self) -> bool {
        false
    }

    async fn invoke_batch(&self, _payload: &str) -> Result<String, UpstreamError> {
        Err(UpstreamError::Unavailable)
    }

    async fn invoke_single(&self, _payload: &str) -> Result<String, UpstreamError> {
        Err(UpstreamError::Unavailable)
    }
}

pub type Responder = Arc<dyn Fn(&str) -> Result<String, UpstreamError> + Send + Sync>;

/// Scriptable upstream for tests and simulation.
///
/// Without a scripted responder it echoes back every candidate it was offered, which always
/// reconciles to the request's full (truncated) payload.
pub struct MockUpstream {
    available: AtomicBool,
    latency: Mutex<Duration>,
    batch_responder: Mutex<Option<Responder>>,
    single_responder: Mutex<Option<Responder>>,
    batch_calls: AtomicUsize,
    single_calls: AtomicUsize,
    batch_payloads: Mutex<Vec<String>>,
    single_payloads: Mutex<Vec<String>>,
}

impl Default for MockUpstream {
    fn default() -> Self {
        Self::new()
    }
}

impl MockUpstream {
    pub fn new() -> Self {
        Self {
            available: AtomicBool::new(true),
            latency: Mutex::new(Duration::ZERO),
            batch_responder: Mutex::new(None),
            single_responder: Mutex::new(None),
            batch_calls: AtomicUsize::new(0),
            single_calls: AtomicUsize::new(0),
            batch_payloads: Mutex::new(Vec::new()),
            single_payloads: Mutex::new(Vec::new()),
        }
    }

    /// Create a new mock upstream wrapped in Arc
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Delay applied to every call before answering.
    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.latency) = latency;
    }

    pub fn respond_to_batch<F>(&self, f: F)
    where
        F: Fn(&str) -> Result<String, UpstreamError> + Send + Sync + 'static,
    {
        *lock(&self.batch_responder) = Some(Arc::new(f));
    }

    pub fn respond_to_single<F>(&self, f: F)
    where
        F: Fn(&str) -> Result<String, UpstreamError> + Send + Sync + 'static,
    {
        *lock(&self.single_responder) = Some(Arc::new(f));
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    pub fn single_calls(&self) -> usize {
        self.single_calls.load(Ordering::SeqCst)
    }

    pub fn batch_payloads(&self) -> Vec<String> {
        lock(&self.batch_payloads).clone()
    }

    pub fn single_payloads(&self) -> Vec<String> {
        lock(&self.single_payloads).clone()
    }

    async fn delay(&self) {
        let latency = *lock(&self.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

/// Numbered echo of every offered candidate list.
pub fn echo_batch(payload: &str) -> String {
    offered_keys(payload)
        .iter()
        .enumerate()
        .map(|(i, keys)| format!("{}. {}", i + 1, keys.join(", ")))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Comma-separated echo of the first offered candidate list.
pub fn echo_single(payload: &str) -> String {
    offered_keys(payload)
        .into_iter()
        .next()
        .map(|keys| keys.join(", "))
        .unwrap_or_default()
}

#[async_trait]
impl Upstream for MockUpstream {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn invoke_batch(&self, payload: &str) -> Result<String, UpstreamError> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.batch_payloads).push(payload.to_string());
        self.delay().await;

        let responder = lock(&self.batch_responder).clone();
        match responder {
            Some(f) => f(payload),
            None => Ok(echo_batch(payload)),
        }
    }

    async fn invoke_single(&self, payload: &str) -> Result<String, UpstreamError> {
        self.single_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.single_payloads).push(payload.to_string());
        self.delay().await;

        let responder = lock(&self.single_responder).clone();
        match responder {
            Some(f) => f(payload),
            None => Ok(echo_single(payload)),
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_batch_numbers_each_offered_list() {
        let payload = "intro\n\n1. a:\nkeys: alpha, beta\n\n2. b:\nkeys: gamma\n\nformat";
        assert_eq!(echo_batch(payload), "1. alpha, beta\n2. gamma");
        assert_eq!(echo_single(payload), "alpha, beta");
    }

    #[tokio::test]
    async fn null_upstream_is_unavailable() {
        let upstream = NullUpstream::new();
        assert!(!upstream.is_available());
        assert_eq!(
            upstream.invoke_single("x").await,
            Err(UpstreamError::Unavailable)
        );
    }

    #[tokio::test]
    async fn mock_records_calls_and_uses_responders() {
        let upstream = MockUpstream::new();
        upstream.respond_to_batch(|_| Err(UpstreamError::Quota("daily limit".into())));

        let err = upstream.invoke_batch("payload").await.unwrap_err();
        assert_eq!(err.to_string(), "quota exhausted: daily limit");
        assert_eq!(upstream.batch_calls(), 1);
        assert_eq!(upstream.batch_payloads(), vec!["payload".to_string()]);
        assert_eq!(upstream.single_calls(), 0);

        upstream.set_available(false);
        assert!(!upstream.is_available());
    }
}
