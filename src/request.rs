use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use crate::keyweights::KeyWeights;

/// Opaque unique identifier handed back by admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for RequestId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// An admitted unit of work. Immutable once it enters the pending buffer.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    /// Optional display label rendered next to the request's position in upstream payloads.
    pub subject: Option<String>,
    pub payload: KeyWeights,
    pub max_results: usize,
    pub created_at: Instant,
}

impl Request {
    pub(crate) fn new(
        subject: Option<String>,
        payload: KeyWeights,
        max_results: usize,
        created_at: Instant,
    ) -> Self {
        Self {
            id: RequestId::new(),
            subject,
            payload,
            max_results,
            created_at,
        }
    }
}
