//! Backoff policies consulted between acquisition attempts.

use std::time::Duration;

use rand::Rng;

/// Decides how long to wait before the next acquisition attempt, and whether
/// there should be one at all.
///
/// A strategy is stateful and belongs to exactly one acquisition call; the
/// acquire entry points take it by value so it cannot be shared.
pub trait RetryStrategy: Send {
    /// Called once per failed attempt. `Some(interval)` allows another attempt
    /// after `interval`; `None` stops the acquisition.
    fn next_interval(&mut self) -> Option<Duration>;
}

impl<R: RetryStrategy + ?Sized> RetryStrategy for Box<R> {
    fn next_interval(&mut self) -> Option<Duration> {
        (**self).next_interval()
    }
}

/// Fixed interval, bounded number of retries.
#[derive(Debug, Clone)]
pub struct FixedInterval {
    interval: Duration,
    max_retries: u32,
    attempted: u32,
}

impl FixedInterval {
    pub fn new(interval: Duration, max_retries: u32) -> Self {
        Self {
            interval,
            max_retries,
            attempted: 0,
        }
    }
}

impl RetryStrategy for FixedInterval {
    fn next_interval(&mut self) -> Option<Duration> {
        if self.attempted >= self.max_retries {
            return None;
        }
        self.attempted += 1;
        Some(self.interval)
    }
}

/// Doubling backoff capped at `max_interval`, optionally with full jitter.
///
/// `max_retries = None` retries forever; pair it with a cancellation token.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    current: Duration,
    max_interval: Duration,
    max_retries: Option<u32>,
    attempted: u32,
    jitter: bool,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max_interval: Duration, max_retries: Option<u32>) -> Self {
        Self {
            current: initial,
            max_interval,
            max_retries,
            attempted: 0,
            jitter: false,
        }
    }

    /// Draw each interval uniformly from `[0, backoff]`.
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }
}

impl RetryStrategy for ExponentialBackoff {
    fn next_interval(&mut self) -> Option<Duration> {
        if let Some(max) = self.max_retries {
            if self.attempted >= max {
                return None;
            }
        }
        self.attempted = self.attempted.saturating_add(1);

        let backoff = self.current.min(self.max_interval);
        self.current = self.current.saturating_mul(2).min(self.max_interval);

        if self.jitter && !backoff.is_zero() {
            let millis = backoff.as_millis().min(u64::MAX as u128) as u64;
            Some(Duration::from_millis(rand::thread_rng().gen_range(0..=millis)))
        } else {
            Some(backoff)
        }
    }
}
