use std::time::Duration;

use crate::config::DurableConfig;

/// Fixed-interval retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval,
        }
    }
}

/// Timeout and retry budget for one workflow step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepOptions {
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl StepOptions {
    pub fn new(timeout: Duration, retry: RetryPolicy) -> Self {
        Self { timeout, retry }
    }

    fn with_timeout(config: &DurableConfig, seconds: u64) -> Self {
        Self::new(
            Duration::from_secs(seconds),
            RetryPolicy::new(config.max_activity_retries, config.retry_interval()),
        )
    }

    pub fn fetch_definition(config: &DurableConfig) -> Self {
        Self::with_timeout(config, config.fetch_definition_timeout_seconds)
    }

    pub fn evaluate_condition(config: &DurableConfig) -> Self {
        Self::with_timeout(config, config.evaluate_condition_timeout_seconds)
    }

    pub fn perform_action(config: &DurableConfig) -> Self {
        Self::with_timeout(config, config.perform_action_timeout_seconds)
    }

    /// The ledger step is the durability checkpoint and gets two extra attempts.
    pub fn log_activity(config: &DurableConfig) -> Self {
        Self::new(
            Duration::from_secs(config.log_activity_timeout_seconds),
            RetryPolicy::new(
                config.max_activity_retries.saturating_add(2),
                config.retry_interval(),
            ),
        )
    }
}
