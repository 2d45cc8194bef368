use std::time::Duration;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);
const DEFAULT_MAX_RETRIES: u32 = 2;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Scheduling rules for the poll loop.
///
/// A failed poll is retried up to `max_retries` times, `retry_delay` apart,
/// before the error reaches observers. `timeout` bounds the whole polling
/// phase, measured from the moment submission succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub timeout: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            timeout: None,
        }
    }
}

impl PollPolicy {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Total poll attempts made for one tick before giving up.
    pub fn attempts_per_poll(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}
