use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Runtime configuration for a bridge instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Number of events buffered before a drain (default: 50). `None` dispatches directly.
    pub batch_capacity: Option<usize>,
    /// Upper bound on sink calls in flight at once.
    pub max_concurrent_dispatches: usize,
    /// Upper bound on scheduled sink calls, running or waiting for a permit.
    /// Events beyond it are dropped and counted. `None` never drops.
    pub max_pending_dispatches: Option<usize>,
    /// HTTP request timeout for webhook deliveries.
    pub webhook_timeout: Duration,
    /// Records buffered by the stream sink before a flush.
    pub stream_buffer_size: usize,
    /// Maximum time a record waits in the stream sink buffer.
    pub stream_flush_interval: Duration,
    /// Interval between listener health probes.
    pub health_poll_interval: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            batch_capacity: Some(50),
            max_concurrent_dispatches: 64,
            max_pending_dispatches: None,
            webhook_timeout: Duration::from_secs(10),
            stream_buffer_size: 500,
            stream_flush_interval: Duration::from_secs(1),
            health_poll_interval: Duration::from_secs(5),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl BridgeConfig {
    /// A capacity of 0 or 1 turns batching off.
    pub fn with_batch_capacity(mut self, capacity: usize) -> Self {
        self.batch_capacity = if capacity > 1 { Some(capacity) } else { None };
        self
    }

    pub fn with_max_concurrent_dispatches(mut self, max: usize) -> Self {
        self.max_concurrent_dispatches = max.max(1);
        self
    }

    /// A bound of 0 is raised to 1.
    pub fn with_max_pending_dispatches(mut self, max: Option<usize>) -> Self {
        self.max_pending_dispatches = max.map(|m| m.max(1));
        self
    }

    pub fn with_webhook_timeout_ms(mut self, ms: u64) -> Self {
        self.webhook_timeout = Duration::from_millis(ms);
        self
    }

    pub fn with_stream_buffer_size(mut self, size: usize) -> Self {
        self.stream_buffer_size = size.max(1);
        self
    }

    pub fn with_stream_flush_interval_ms(mut self, ms: u64) -> Self {
        self.stream_flush_interval = Duration::from_millis(ms.max(1));
        self
    }

    pub fn with_health_poll_interval_ms(mut self, ms: u64) -> Self {
        self.health_poll_interval = Duration::from_millis(ms.max(1));
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }
}

/// Bounded exponential backoff used when the notification source drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    pub min_backoff: Duration,
    pub max_backoff: Duration,
    /// Consecutive failed attempts before the listener gives up.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            min_backoff: Duration::from_secs(10),
            max_backoff: Duration::from_secs(60),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    pub fn new(min_backoff: Duration, max_backoff: Duration, max_attempts: u32) -> Self {
        Self {
            min_backoff,
            max_backoff: max_backoff.max(min_backoff),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Delay before the given attempt (1-based), doubling from `min_backoff`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.min_backoff
            .saturating_mul(2u32.saturating_pow(exp))
            .min(self.max_backoff)
    }
}
