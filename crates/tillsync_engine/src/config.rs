//! Configuration for the sync engine.

use std::sync::Arc;
use std::time::Duration;
use tillsync_protocol::{ConflictResolver, ConflictStrategy, DeviceId, DevicePriority};

/// Configuration for sync passes.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// This device.
    pub device_id: DeviceId,
    /// Identity the remote authority writes under.
    pub server_device_id: DeviceId,
    /// Tie-break ordering shared with the remote authority.
    pub device_priority: DevicePriority,
    /// Time between scheduled passes.
    pub sync_interval: Duration,
    /// Maximum records per push request.
    pub push_batch_size: u32,
    /// Maximum records per pull page.
    pub pull_batch_size: u32,
    /// Upper bound on a single network call.
    pub timeout: Duration,
    /// Retry behaviour for transient failures.
    pub retry: RetryConfig,
    /// Conflict strategy applied to unsynced local edits.
    pub strategy: ConflictStrategy,
}

impl SyncConfig {
    /// Creates a configuration where the remote authority wins timestamp
    /// ties.
    pub fn new(device_id: impl Into<String>, server_device_id: impl Into<String>) -> Self {
        let server_device_id = DeviceId::new(server_device_id);
        Self {
            device_id: DeviceId::new(device_id),
            device_priority: DevicePriority::authority_first(server_device_id.clone()),
            server_device_id,
            sync_interval: Duration::from_secs(30),
            push_batch_size: 100,
            pull_batch_size: 100,
            timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
            strategy: ConflictStrategy::default(),
        }
    }

    /// Sets the push batch size.
    ///
    /// The remote may cap pushes lower than this. It then answers a prefix
    /// of each request and the pass sends the rest in follow-up requests.
    pub fn with_push_batch_size(mut self, size: u32) -> Self {
        self.push_batch_size = size;
        self
    }

    /// Sets the pull batch size.
    pub fn with_pull_batch_size(mut self, size: u32) -> Self {
        self.pull_batch_size = size;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the interval between scheduled passes.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Sets the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the conflict strategy.
    pub fn with_strategy(mut self, strategy: ConflictStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Replaces the tie-break ordering. It must match the one the remote
    /// authority uses or the two sides can disagree on ties.
    pub fn with_device_priority(mut self, priority: DevicePriority) -> Self {
        self.device_priority = priority;
        self
    }

    /// Builds the resolver for the configured strategy.
    pub fn resolver(&self) -> Arc<dyn ConflictResolver> {
        self.strategy.into_resolver(self.device_priority.clone())
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts per call, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% random jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a configuration with the given attempt ceiling.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Calculates the delay before a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let delay_secs = base.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            let jitter = delay_secs * 0.25 * rand::random::<f64>();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}
