//! Request-coalescing batch scheduler for an expensive upstream processor.
//!
//! Independent requests are buffered briefly, combined into one upstream invocation, and the
//! combined answer is reconciled back into per-request results.

mod dispatch;
pub mod keyweights;
pub mod metrics;
pub mod outcome;
pub mod pending;
pub mod prompt;
pub mod reconcile;
pub mod request;
pub mod result_store;
pub mod scheduler;
pub mod settings;
mod state;
pub mod stats;
pub mod trace;
pub mod upstream;

pub use coalescer_macros::test;

pub use keyweights::KeyWeights;
pub use outcome::{FailureKind, RequestResult, RequestStatus, ResultError, ResultEvent};
pub use request::RequestId;
pub use scheduler::{BatchScheduler, SchedulerError};
pub use stats::StatsSnapshot;
pub use upstream::{MockUpstream, NullUpstream, Upstream, UpstreamError};
