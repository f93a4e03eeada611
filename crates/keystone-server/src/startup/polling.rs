//! Bounded polling
//!
//! A fixed number of attempts at a fixed interval, no backoff. Used to wait
//! for collaborators that come up on their own schedule. The whole poll also
//! runs against a monotonic deadline, so an attempt that hangs cannot stretch
//! it past [`PollBudget::deadline`].

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

/// Attempt count and spacing for a poll loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBudget {
    /// Total number of attempts, including the first
    pub attempts: u32,
    /// Sleep between consecutive attempts
    pub interval: Duration,
}

impl PollBudget {
    /// Store readiness: 101 probes, 50ms apart (about five seconds)
    pub const STORE: PollBudget = PollBudget {
        attempts: 101,
        interval: Duration::from_millis(50),
    };

    /// Time spent sleeping between attempts
    pub fn total(&self) -> Duration {
        self.interval * self.attempts.saturating_sub(1)
    }

    /// Hard bound on the whole poll: the sleeps plus one interval for the
    /// final attempt to answer
    pub fn deadline(&self) -> Duration {
        self.total() + self.interval
    }
}

/// Every attempt in a budget failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollExhausted {
    /// Attempts made
    pub attempts: u32,
    /// Error from the final attempt
    pub last_error: String,
}

/// Call `poll_fn` until it returns `Ok` or the budget runs out
///
/// `Err` from `poll_fn` means "not ready yet"; the loop sleeps
/// `budget.interval` and tries again. No sleep follows the final attempt.
/// An attempt still pending at the deadline is dropped and ends the poll.
pub async fn poll_until_ready<T, F, Fut>(
    description: &str,
    budget: PollBudget,
    mut poll_fn: F,
) -> Result<T, PollExhausted>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, String>>,
{
    let deadline = Instant::now() + budget.deadline();
    let mut last_error = String::from("no attempts made");
    let mut attempts = 0;

    while attempts < budget.attempts {
        attempts += 1;
        match tokio::time::timeout_at(deadline, poll_fn()).await {
            Ok(Ok(value)) => {
                tracing::debug!(attempt = attempts, "{} ready", description);
                return Ok(value);
            }
            Ok(Err(e)) => {
                tracing::trace!(attempt = attempts, error = %e, "{} not ready", description);
                last_error = e;
            }
            Err(_) => {
                tracing::debug!(attempt = attempts, "{} attempt hit the deadline", description);
                last_error = format!("no answer within {:?}", budget.deadline());
                break;
            }
        }

        if attempts < budget.attempts {
            let wake = (Instant::now() + budget.interval).min(deadline);
            tokio::time::sleep_until(wake).await;
        }
    }

    Err(PollExhausted {
        attempts,
        last_error,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    const FAST: PollBudget = PollBudget {
        attempts: 5,
        interval: Duration::from_millis(1),
    };

    #[test]
    fn store_budget_is_about_five_seconds() {
        assert_eq!(PollBudget::STORE.attempts, 101);
        assert_eq!(PollBudget::STORE.total(), Duration::from_secs(5));
        assert_eq!(PollBudget::STORE.deadline(), Duration::from_millis(5050));
    }

    #[tokio::test]
    async fn returns_first_success() {
        let calls = AtomicU32::new(0);
        let result = poll_until_ready("thing", FAST, || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(format!("attempt {}", n))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_after_budget() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = poll_until_ready("thing", FAST, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("connection refused".to_string()) }
        })
        .await;

        assert_eq!(
            result,
            Err(PollExhausted {
                attempts: 5,
                last_error: "connection refused".to_string(),
            })
        );
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn sleeps_between_attempts_only() {
        let start = tokio::time::Instant::now();
        let budget = PollBudget {
            attempts: 4,
            interval: Duration::from_millis(50),
        };
        let _: Result<(), _> =
            poll_until_ready("thing", budget, || async { Err("down".to_string()) }).await;

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(150));
        assert!(elapsed < Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_attempt_is_cut_off_at_deadline() {
        let start = tokio::time::Instant::now();
        let budget = PollBudget {
            attempts: 5,
            interval: Duration::from_millis(50),
        };
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = poll_until_ready("thing", budget, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Err("never".to_string())
            }
        })
        .await;

        let exhausted = result.unwrap_err();
        assert_eq!(exhausted.attempts, 1);
        assert!(exhausted.last_error.contains("no answer within"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let elapsed = start.elapsed();
        assert!(elapsed >= budget.deadline());
        assert!(elapsed < budget.deadline() + budget.interval);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempts_share_one_deadline() {
        let start = tokio::time::Instant::now();
        let budget = PollBudget {
            attempts: 101,
            interval: Duration::from_millis(50),
        };
        let result: Result<(), _> = poll_until_ready("thing", budget, || async {
            tokio::time::sleep(Duration::from_millis(400)).await;
            Err("timed out".to_string())
        })
        .await;

        assert!(result.is_err());
        assert!(start.elapsed() <= budget.deadline());
    }
}
