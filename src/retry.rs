// Bounded retry policy and the clock used for backoff and polling.
// The orchestrator never calls `std::thread::sleep` directly: all waiting
// goes through a `Clock`, so tests can drive deadlines with `ManualClock`.

use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::Result;

/// Source of time for backoff and poll deadlines.
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Clock that only moves when slept on. Sleeping returns immediately.
#[derive(Debug)]
pub struct ManualClock {
    start: Instant,
    elapsed: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        ManualClock {
            start: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
        }
    }

    /// Total time slept so far.
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        let mut elapsed = self.elapsed.lock().unwrap_or_else(|e| e.into_inner());
        *elapsed += duration;
    }
}

/// Attempt limit and exponential backoff between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_backoff: Duration) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            base_backoff,
        }
    }

    /// Wait before attempt `attempt + 1`, given that `attempt` (1-based) failed.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_backoff.saturating_mul(1 << exponent)
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or the
    /// attempts are used up. Only transient errors are retried.
    pub fn run<T>(&self, clock: &dyn Clock, what: &str, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let mut attempt = 1;
        loop {
            match op() {
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let wait = self.backoff(attempt);
                    tracing::warn!(attempt, ?wait, error = %e, "{} failed, retrying", what);
                    clock.sleep(wait);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UploadError;
    use std::cell::Cell;

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy::new(4, Duration::from_secs(2));
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
        assert_eq!(policy.backoff(3), Duration::from_secs(8));
    }

    #[test]
    fn transient_errors_are_retried_until_success() {
        let clock = ManualClock::new();
        let calls = Cell::new(0);
        let policy = RetryPolicy::new(3, Duration::from_secs(1));

        let value = policy
            .run(&clock, "listing", || {
                calls.set(calls.get() + 1);
                if calls.get() < 3 {
                    Err(UploadError::Transient("503".into()))
                } else {
                    Ok(7)
                }
            })
            .unwrap();

        assert_eq!(value, 7);
        assert_eq!(calls.get(), 3);
        assert_eq!(clock.elapsed(), Duration::from_secs(3));
    }

    #[test]
    fn attempts_are_bounded() {
        let clock = ManualClock::new();
        let calls = Cell::new(0);
        let result: Result<()> = RetryPolicy::new(2, Duration::from_secs(1)).run(&clock, "listing", || {
            calls.set(calls.get() + 1);
            Err(UploadError::Transient("timeout".into()))
        });
        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn non_transient_errors_are_not_retried() {
        let clock = ManualClock::new();
        let calls = Cell::new(0);
        let result: Result<()> = RetryPolicy::new(5, Duration::from_secs(1)).run(&clock, "listing", || {
            calls.set(calls.get() + 1);
            Err(UploadError::Auth {
                status: 401,
                body: String::new(),
            })
        });
        assert!(result.unwrap_err().is_fatal());
        assert_eq!(calls.get(), 1);
        assert_eq!(clock.elapsed(), Duration::ZERO);
    }

    #[test]
    fn manual_clock_advances_only_on_sleep() {
        let clock = ManualClock::new();
        let t0 = clock.now();
        clock.sleep(Duration::from_secs(15));
        assert_eq!(clock.now() - t0, Duration::from_secs(15));
    }
}
