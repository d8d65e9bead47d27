use std::thread;
use std::time::{Duration, Instant};

use crate::error::{ClientError, Result};

/// Exponential backoff for polling, bounded by an overall deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial_delay: Duration,
    pub factor: u32,
    /// The delay never grows past `initial_delay * max_factor`.
    pub max_factor: u32,
    pub timeout: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            factor: 2,
            max_factor: 100,
            timeout: Duration::from_secs(60),
        }
    }
}

impl Backoff {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn max_delay(&self) -> Duration {
        self.initial_delay.saturating_mul(self.max_factor)
    }

    /// The endless sequence of delays between attempts. A factor below 1 is
    /// treated as 1.
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        let max = self.max_delay();
        let factor = self.factor.max(1);
        std::iter::successors(Some(self.initial_delay), move |delay| {
            Some(delay.saturating_mul(factor).min(max))
        })
    }

    /// Call `attempt` until it reports completion or fails.
    ///
    /// An error from `attempt` ends polling at once. A sleep never runs past
    /// the deadline. A timeout too large to represent means no deadline.
    pub fn poll<F>(&self, mut attempt: F) -> Result<()>
    where
        F: FnMut() -> Result<bool>,
    {
        let deadline = Instant::now().checked_add(self.timeout);
        for delay in self.delays() {
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                break;
            }
            if attempt()? {
                return Ok(());
            }
            let pause = match deadline {
                Some(deadline) => delay.min(deadline.saturating_duration_since(Instant::now())),
                None => delay,
            };
            thread::sleep(pause);
        }
        Err(ClientError::Timeout(self.timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick() -> Backoff {
        Backoff {
            initial_delay: Duration::from_millis(1),
            factor: 2,
            max_factor: 8,
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_default_schedule() {
        let delays: Vec<u64> = Backoff::default()
            .delays()
            .take(5)
            .map(|d| d.as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1600]);
        assert_eq!(Backoff::default().max_delay(), Duration::from_secs(10));
    }

    #[test]
    fn test_delays_are_capped() {
        let backoff = Backoff {
            initial_delay: Duration::from_secs(1),
            factor: 2,
            max_factor: 4,
            timeout: Duration::from_secs(60),
        };
        let delays: Vec<u64> = backoff.delays().take(5).map(|d| d.as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 4, 4]);
    }

    #[test]
    fn test_delays_never_shrink_or_pass_the_cap() {
        let backoff = Backoff {
            initial_delay: Duration::from_millis(30),
            factor: 3,
            max_factor: 50,
            timeout: Duration::from_secs(60),
        };
        let delays: Vec<Duration> = backoff.delays().take(20).collect();

        assert!(delays.windows(2).all(|pair| pair[0] <= pair[1]));
        assert!(delays.iter().all(|d| *d <= backoff.max_delay()));
        assert_eq!(delays.last(), Some(&backoff.max_delay()));
    }

    #[test]
    fn test_zero_factor_holds_the_delay() {
        let backoff = Backoff {
            factor: 0,
            ..quick()
        };
        let delays: Vec<Duration> = backoff.delays().take(4).collect();
        assert_eq!(delays, vec![Duration::from_millis(1); 4]);
    }

    #[test]
    fn test_poll_until_done() {
        for (factor, max_factor) in [(2, 8), (1, 1), (10, 1000)] {
            let backoff = Backoff {
                factor,
                max_factor,
                ..quick()
            };
            let started = Instant::now();
            let mut calls = 0;
            backoff
                .poll(|| {
                    calls += 1;
                    Ok(calls == 3)
                })
                .unwrap();
            assert_eq!(calls, 3);
            assert!(started.elapsed() < backoff.timeout);
        }
    }

    #[test]
    fn test_error_stops_polling() {
        let mut calls = 0;
        let err = quick()
            .poll(|| {
                calls += 1;
                Err(ClientError::JobFailed("boom".to_string()))
            })
            .unwrap_err();
        assert_eq!(calls, 1);
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn test_poll_times_out() {
        let backoff = quick().with_timeout(Duration::from_millis(500));
        let started = Instant::now();
        let mut calls = 0;

        let err = backoff
            .poll(|| {
                calls += 1;
                Ok(false)
            })
            .unwrap_err();

        assert!(matches!(err, ClientError::Timeout(t) if t == Duration::from_millis(500)));
        assert!(started.elapsed() >= Duration::from_millis(500));
        assert!(calls > 1);
    }

    #[test]
    fn test_unbounded_timeout() {
        let backoff = quick().with_timeout(Duration::from_secs(u64::MAX));
        backoff.poll(|| Ok(true)).unwrap();

        let mut calls = 0;
        backoff
            .poll(|| {
                calls += 1;
                Ok(calls == 2)
            })
            .unwrap();
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_last_sleep_stops_at_deadline() {
        let backoff = Backoff {
            initial_delay: Duration::from_millis(40),
            factor: 2,
            max_factor: 100,
            timeout: Duration::from_millis(50),
        };
        let started = Instant::now();
        let mut calls = 0;

        let err = backoff
            .poll(|| {
                calls += 1;
                Ok(false)
            })
            .unwrap_err();

        // One attempt at the start and one after the first delay. The second
        // delay is cut short by the deadline, which ends polling.
        assert!(matches!(err, ClientError::Timeout(_)));
        assert_eq!(calls, 2);
        assert!(started.elapsed() < Duration::from_millis(500));
    }
}
