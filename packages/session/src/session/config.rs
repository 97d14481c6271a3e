//! Session tuning knobs.

use std::time::Duration;

use rand::Rng;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);
const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(8);
const DEFAULT_MAX_QUEUED_SENDS: usize = 64;
const DEFAULT_TYPING_IDLE: Duration = Duration::from_secs(1);
const DEFAULT_TYPING_TTL: Duration = Duration::from_secs(3);
const DEFAULT_TIMELINE_CAPACITY: usize = 100;
const DEFAULT_DEDUP_CAPACITY: usize = 256;

/// Reconnect backoff: exponential, capped, with symmetric jitter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    base: Duration,
    factor: u32,
    max_delay: Duration,
    jitter: f64,
    max_attempts: u32,
}

impl BackoffPolicy {
    /// `jitter` is a ratio (0.2 = ±20%), clamped to `0.0..=1.0`
    pub fn new(base: Duration, factor: u32, max_delay: Duration, jitter: f64, max_attempts: u32) -> Self {
        Self {
            base,
            factor: factor.max(1),
            max_delay,
            jitter: jitter.clamp(0.0, 1.0),
            max_attempts,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Un-jittered delay before retry number `attempt` (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let multiplier = u64::from(self.factor).saturating_pow(exponent);
        let base_ms = self.base.as_millis() as u64;
        let calculated = base_ms.saturating_mul(multiplier);
        let bounded = calculated.min(self.max_delay.as_millis() as u64);
        Duration::from_millis(bounded)
    }

    /// Scale `delay` by `1 + unit * jitter`, `unit` in `-1.0..=1.0`
    pub fn apply_jitter(&self, delay: Duration, unit: f64) -> Duration {
        let scale = 1.0 + unit.clamp(-1.0, 1.0) * self.jitter;
        delay.mul_f64(scale.max(0.0))
    }

    /// Jittered delay before retry number `attempt`
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        if self.jitter == 0.0 {
            return delay;
        }
        let unit = rand::rng().random_range(-1.0..=1.0);
        self.apply_jitter(delay, unit)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), 2, Duration::from_secs(5), 0.2, 5)
    }
}

/// Configuration for a [`ChatClient`](crate::ChatClient) and its components.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use chatlink_session::SessionConfig;
///
/// let config = SessionConfig::default()
///     .with_ack_timeout(Duration::from_secs(5))
///     .with_max_queued_sends(16);
/// assert_eq!(config.max_queued_sends, 16);
/// ```
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Bound on a single connect attempt and on `connect()` itself
    pub connect_timeout: Duration,
    /// Time a sent message may wait for its `message_ack`
    pub ack_timeout: Duration,
    /// Sends held while the link is coming up; beyond this they are rejected
    pub max_queued_sends: usize,
    /// Quiet period after which local typing is reported as stopped
    pub typing_idle: Duration,
    /// Lifetime of a remote typing signal
    pub typing_ttl: Duration,
    /// Messages kept per room
    pub timeline_capacity: usize,
    /// Resolved local ids remembered per room for echo suppression
    pub dedup_capacity: usize,
    /// Reconnect backoff
    pub backoff: BackoffPolicy,
}

impl SessionConfig {
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_max_queued_sends(mut self, max: usize) -> Self {
        self.max_queued_sends = max;
        self
    }

    #[must_use]
    pub fn with_typing_idle(mut self, idle: Duration) -> Self {
        self.typing_idle = idle;
        self
    }

    #[must_use]
    pub fn with_typing_ttl(mut self, ttl: Duration) -> Self {
        self.typing_ttl = ttl;
        self
    }

    /// Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_timeline_capacity(mut self, capacity: usize) -> Self {
        self.timeline_capacity = capacity.max(1);
        self
    }

    #[must_use]
    pub fn with_dedup_capacity(mut self, capacity: usize) -> Self {
        self.dedup_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            max_queued_sends: DEFAULT_MAX_QUEUED_SENDS,
            typing_idle: DEFAULT_TYPING_IDLE,
            typing_ttl: DEFAULT_TYPING_TTL,
            timeline_capacity: DEFAULT_TIMELINE_CAPACITY,
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
            backoff: BackoffPolicy::default(),
        }
    }
}
