#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use coalescer::settings::{PromptConfig, SchedulerConfig};
use coalescer::{BatchScheduler, KeyWeights, MockUpstream};

// Helper: enforce a tight timeout for async tests likely to hang
#[macro_export]
macro_rules! with_timeout {
    ($ms:expr, $body:block) => {{
        tokio::time::timeout(std::time::Duration::from_millis($ms), async move { $body })
            .await
            .expect("test timed out")
    }};
}

/// Default thresholds with a fast tick and poll so running-loop tests settle quickly.
pub fn test_config() -> SchedulerConfig {
    SchedulerConfig {
        tick_interval_ms: 100,
        poll_interval_ms: 10,
        ..SchedulerConfig::default()
    }
}

pub fn scheduler_with(upstream: Arc<MockUpstream>, config: SchedulerConfig) -> BatchScheduler {
    BatchScheduler::new(config, &PromptConfig::default(), upstream, None).expect("valid config")
}

/// A scheduler over a fresh echoing mock upstream.
pub fn echo_scheduler() -> (Arc<MockUpstream>, BatchScheduler) {
    let upstream = MockUpstream::new_arc();
    let scheduler = scheduler_with(upstream.clone(), test_config());
    (upstream, scheduler)
}

pub fn kw(pairs: &[(&str, i64)]) -> KeyWeights {
    pairs.iter().copied().collect()
}

/// Move paused time forward by `ms` milliseconds.
pub async fn advance_ms(ms: u64) {
    tokio::time::advance(Duration::from_millis(ms)).await;
}
