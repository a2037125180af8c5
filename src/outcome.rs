//! Per-request outcome records.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::keyweights::KeyWeights;
use crate::request::RequestId;

/// Lifecycle status of a request's result.
///
/// Transitions only move forward: `Pending -> Processing -> {Completed | Failed}`, or straight to
/// `Failed` when a waiter gives up on a request that never finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Processing => "processing",
            RequestStatus::Completed => "completed",
            RequestStatus::Failed => "failed",
        }
    }
}

/// Category of a stored failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The upstream call (combined or individual) returned an error.
    Upstream,
    /// The upstream answered but this request's slice could not be matched.
    ReconciliationMiss,
    /// A waiter gave up before the request finished.
    Timeout,
    /// Dispatch panicked; the whole batch was failed.
    Internal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Upstream => "upstream",
            FailureKind::ReconciliationMiss => "reconciliation_miss",
            FailureKind::Timeout => "timeout",
            FailureKind::Internal => "internal",
        }
    }
}

/// Failure detail attached to a `Failed` result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultError {
    pub kind: FailureKind,
    pub message: String,
}

impl ResultError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ResultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

/// Reconciled output for one request: weights sorted descending and truncated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    pub output: KeyWeights,
    pub top_keys: Vec<String>,
}

/// Terminal outcome applied to a result record.
#[derive(Debug, Clone)]
pub enum Resolution {
    Completed(Reconciled),
    Failed(ResultError),
}

/// The outcome record kept for every admitted request until eviction.
#[derive(Debug, Clone)]
pub struct RequestResult {
    pub request_id: RequestId,
    pub status: RequestStatus,
    pub output: Option<KeyWeights>,
    pub top_keys: Option<Vec<String>>,
    pub error: Option<ResultError>,
    pub completed_at: Option<Instant>,
}

impl RequestResult {
    pub(crate) fn pending(request_id: RequestId) -> Self {
        Self {
            request_id,
            status: RequestStatus::Pending,
            output: None,
            top_keys: None,
            error: None,
            completed_at: None,
        }
    }

    pub(crate) fn resolve(&mut self, resolution: Resolution, now: Instant) {
        match resolution {
            Resolution::Completed(reconciled) => {
                self.status = RequestStatus::Completed;
                self.output = Some(reconciled.output);
                self.top_keys = Some(reconciled.top_keys);
                self.error = None;
            }
            Resolution::Failed(error) => {
                self.status = RequestStatus::Failed;
                self.output = None;
                self.top_keys = None;
                self.error = Some(error);
            }
        }
        self.completed_at = Some(now);
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Published on the scheduler's event channel whenever a result becomes terminal.
#[derive(Debug, Clone)]
pub struct ResultEvent {
    pub request_id: RequestId,
    pub status: RequestStatus,
    pub result: RequestResult,
}

impl From<&RequestResult> for ResultEvent {
    fn from(result: &RequestResult) -> Self {
        Self {
            request_id: result.request_id,
            status: result.status,
            result: result.clone(),
        }
    }
}
