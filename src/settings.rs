use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::pending::FlushPolicy;
use crate::scheduler::SchedulerError;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub cleanup: CleanupConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SchedulerConfig {
    /// How often the trigger loop evaluates the flush policy
    pub tick_interval_ms: u64,
    /// A lone request is flushed once it has waited this long
    pub buffer_time_budget_ms: u64,
    /// Two or more buffered requests are flushed once the oldest has waited this long
    pub secondary_threshold_ms: u64,
    pub max_batch_size: usize,
    /// Candidate keys offered upstream per request
    pub max_candidates: usize,
    pub poll_interval_ms: u64,
    pub default_wait_timeout_ms: u64,
    /// Estimated upstream tokens saved for every request beyond the first in a combined batch
    pub savings_per_coalesced_request: u64,
    pub event_channel_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 3000,
            buffer_time_budget_ms: 2000,
            secondary_threshold_ms: 1000,
            max_batch_size: 10,
            max_candidates: 50,
            poll_interval_ms: 100,
            default_wait_timeout_ms: 30_000,
            savings_per_coalesced_request: 500,
            event_channel_capacity: 1024,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<(), SchedulerError> {
        let invalid = |msg: &str| Err(SchedulerError::InvalidConfig(msg.to_string()));
        if self.max_batch_size == 0 {
            return invalid("max_batch_size must be at least 1");
        }
        if self.max_candidates == 0 {
            return invalid("max_candidates must be at least 1");
        }
        if self.tick_interval_ms == 0 {
            return invalid("tick_interval_ms must be positive");
        }
        if self.poll_interval_ms == 0 {
            return invalid("poll_interval_ms must be positive");
        }
        if self.event_channel_capacity == 0 {
            return invalid("event_channel_capacity must be at least 1");
        }
        if self.secondary_threshold_ms > self.buffer_time_budget_ms {
            return invalid("secondary_threshold_ms must not exceed buffer_time_budget_ms");
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn default_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.default_wait_timeout_ms)
    }

    pub fn flush_policy(&self) -> FlushPolicy {
        FlushPolicy {
            buffer_time_budget: Duration::from_millis(self.buffer_time_budget_ms),
            secondary_threshold: Duration::from_millis(self.secondary_threshold_ms),
            max_batch_size: self.max_batch_size,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CleanupConfig {
    /// Completed results older than this are swept periodically. Leaving it out of a `[cleanup]`
    /// section disables the sweep; a config without the section keeps the 24h default.
    #[serde(default)]
    pub result_ttl_secs: Option<u64>,
    #[serde(default = "default_cleanup_interval_secs")]
    pub interval_secs: u64,
}

fn default_result_ttl_secs() -> Option<u64> {
    Some(24 * 60 * 60)
}

fn default_cleanup_interval_secs() -> u64 {
    600
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            result_ttl_secs: default_result_ttl_secs(),
            interval_secs: default_cleanup_interval_secs(),
        }
    }
}

impl CleanupConfig {
    pub fn result_ttl(&self) -> Option<Duration> {
        self.result_ttl_secs.map(Duration::from_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PromptConfig {
    pub batch_instructions: String,
    pub single_instructions: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            batch_instructions: "For each numbered entry below, select only the keys that are \
                relevant to its subject."
                .to_string(),
            single_instructions: "Select only the keys below that are relevant to the subject."
                .to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl AppConfig {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let cfg = match path {
            Some(p) => {
                let data = fs::read_to_string(p)?;
                let cfg: Self = toml::from_str(&data)?;
                cfg
            }
            None => Self::default(),
        };
        cfg.scheduler.validate()?;
        Ok(cfg)
    }
}
