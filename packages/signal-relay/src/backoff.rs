use std::time::Duration;

/// First reconnect delay, and the delay restored after a successful connect
pub const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Reconnect delays never grow beyond this
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Doubling reconnect delay with a ceiling
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    initial: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new() -> Self {
        Self::with_bounds(INITIAL_BACKOFF, MAX_BACKOFF)
    }

    pub fn with_bounds(initial: Duration, max: Duration) -> Self {
        Self {
            current: initial,
            initial,
            max,
        }
    }

    /// Delay the next retry will wait
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Return the delay to wait now and double the one after it
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}
