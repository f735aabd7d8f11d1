use std::thread;
use std::time::Duration;

use anyhow::Result;
use tracing::debug;

use crate::error::ProvisionError;

/// Outcome of one readiness probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Poll<T> {
    Ready(T),
    /// Not there yet; try again after the interval.
    Pending,
}

/// Fixed-interval polling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    /// Total attempts including the first. `None` polls until ready.
    pub max_attempts: Option<u32>,
}

impl PollPolicy {
    pub fn new(interval: Duration, max_attempts: Option<u32>) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    pub fn unbounded(interval: Duration) -> Self {
        Self::new(interval, None)
    }
}

/// Blocking delay between attempts. Swapped out in tests.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Sleeps the current thread.
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Poll `probe` until it reports ready.
///
/// - `Ok(Poll::Pending)` sleeps one interval and tries again.
/// - `Err(_)` aborts immediately; hard errors are never retried.
/// - Probing happens before sleeping, so N pending attempts followed by a
///   ready one sleep exactly N intervals.
/// - With `max_attempts = Some(n)`, the n-th pending attempt fails with
///   [`ProvisionError::Exhausted`].
pub fn poll_until<T, F>(
    policy: &PollPolicy,
    sleeper: &dyn Sleeper,
    label: &str,
    mut probe: F,
) -> Result<T>
where
    F: FnMut(u32) -> Result<Poll<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        if let Poll::Ready(val) = probe(attempt)? {
            return Ok(val);
        }

        if let Some(max) = policy.max_attempts
            && attempt >= max
        {
            return Err(ProvisionError::Exhausted {
                label: label.to_string(),
                attempts: attempt,
            }
            .into());
        }

        debug!(
            attempt,
            interval_ms = policy.interval.as_millis() as u64,
            "{} not ready, waiting",
            label,
        );
        sleeper.sleep(policy.interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records requested sleeps instead of blocking.
    #[derive(Default)]
    pub struct RecordingSleeper {
        pub slept: Mutex<Vec<Duration>>,
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, duration: Duration) {
            self.slept.lock().unwrap().push(duration);
        }
    }

    #[test]
    fn test_poll_ready_first_try() {
        let sleeper = RecordingSleeper::default();
        let policy = PollPolicy::unbounded(Duration::from_secs(5));
        let val = poll_until(&policy, &sleeper, "test", |_| Ok(Poll::Ready(42))).unwrap();
        assert_eq!(val, 42);
        assert!(sleeper.slept.lock().unwrap().is_empty());
    }

    #[test]
    fn test_poll_sleeps_once_per_pending_attempt() {
        let sleeper = RecordingSleeper::default();
        let policy = PollPolicy::unbounded(Duration::from_secs(5));
        let val = poll_until(&policy, &sleeper, "test", |attempt| {
            if attempt <= 4 {
                Ok(Poll::Pending)
            } else {
                Ok(Poll::Ready(attempt))
            }
        })
        .unwrap();
        assert_eq!(val, 5);
        let slept = sleeper.slept.lock().unwrap();
        assert_eq!(slept.len(), 4);
        assert_eq!(slept.iter().sum::<Duration>(), Duration::from_secs(20));
    }

    #[test]
    fn test_poll_hard_error_aborts_without_sleeping() {
        let sleeper = RecordingSleeper::default();
        let policy = PollPolicy::unbounded(Duration::from_secs(5));
        let mut calls = 0;
        let result: Result<()> = poll_until(&policy, &sleeper, "test", |_| {
            calls += 1;
            anyhow::bail!("domain not found")
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
        assert!(sleeper.slept.lock().unwrap().is_empty());
    }

    #[test]
    fn test_poll_exhausts_bounded_attempts() {
        let sleeper = RecordingSleeper::default();
        let policy = PollPolicy::new(Duration::from_millis(1), Some(3));
        let result: Result<()> =
            poll_until(&policy, &sleeper, "lease for ocp4-lb", |_| Ok(Poll::Pending));
        let err = result.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProvisionError>(),
            Some(ProvisionError::Exhausted { attempts: 3, .. })
        ));
        // No sleep after the final attempt.
        assert_eq!(sleeper.slept.lock().unwrap().len(), 2);
    }
}
