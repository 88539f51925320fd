//! Bounded asynchronous polling.
//!
//! Every wait in the deployment (stack deletion, busy stacks, change-set
//! evaluation, stack events) goes through [`RetryPoller`]. A probe is called
//! sequentially until it reports [`Poll::Done`] or [`Poll::Failed`], or until
//! the attempt budget is spent. There is no cancellation beyond the budget.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{DeployError, StackError};

/// Outcome of a single probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Poll<T, E> {
    /// Not there yet; sleep and probe again.
    Continue,
    /// Finished successfully with a value.
    Done(T),
    /// Abort immediately with an error.
    Failed(E),
}

/// Raised when a poller exhausts its attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exhausted {
    /// Label of the wait.
    pub label: String,
    /// Attempts made.
    pub attempts: u32,
}

impl From<Exhausted> for StackError {
    fn from(e: Exhausted) -> Self {
        Self::Timeout {
            label: e.label,
            attempts: e.attempts,
        }
    }
}

impl From<Exhausted> for DeployError {
    fn from(e: Exhausted) -> Self {
        Self::Stack(e.into())
    }
}

/// Bounded poller with a fixed delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPoller {
    /// Maximum number of probes.
    max_attempts: u32,
    /// Delay between two probes.
    delay: Duration,
}

impl RetryPoller {
    /// Creates a poller.
    #[must_use]
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Maximum number of probes.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay between probes.
    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.delay
    }

    /// Runs `probe` until it resolves, fails, or the attempt budget is spent.
    ///
    /// The probe receives the 1-based attempt number.
    ///
    /// # Errors
    ///
    /// Returns the probe's error on [`Poll::Failed`], or an [`Exhausted`]
    /// converted into `E` once `max_attempts` probes returned
    /// [`Poll::Continue`].
    pub async fn wait_for<T, E, F, Fut>(&self, label: &str, mut probe: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Poll<T, E>>,
        E: From<Exhausted>,
    {
        info!("Waiting for {label} (up to {} attempts)", self.max_attempts);

        for attempt in 1..=self.max_attempts {
            debug!(label, attempt, max_attempts = self.max_attempts, "polling");

            match probe(attempt).await {
                Poll::Done(value) => {
                    debug!("{label} finished after {attempt} attempt(s)");
                    return Ok(value);
                }
                Poll::Failed(err) => return Err(err),
                Poll::Continue => {
                    info!("{label}: attempt {attempt}/{}", self.max_attempts);
                    if attempt < self.max_attempts {
                        tokio::time::sleep(self.delay).await;
                    }
                }
            }
        }

        Err(Exhausted {
            label: label.to_string(),
            attempts: self.max_attempts,
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, PartialEq, Eq)]
    enum TestError {
        Aborted(&'static str),
        Exhausted(u32),
    }

    impl From<Exhausted> for TestError {
        fn from(e: Exhausted) -> Self {
            Self::Exhausted(e.attempts)
        }
    }

    fn poller(max_attempts: u32) -> RetryPoller {
        RetryPoller::new(max_attempts, Duration::ZERO)
    }

    #[tokio::test]
    async fn test_resolves_on_third_attempt() {
        let calls = AtomicU32::new(0);
        let calls_ref = &calls;

        let result: Result<u32, TestError> = poller(5)
            .wait_for("counter", |attempt| async move {
                calls_ref.fetch_add(1, Ordering::SeqCst);
                if attempt == 3 {
                    Poll::Done(attempt * 10)
                } else {
                    Poll::Continue
                }
            })
            .await;

        assert_eq!(result, Ok(30));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failed_aborts_immediately() {
        let calls = AtomicU32::new(0);
        let calls_ref = &calls;

        let result: Result<(), TestError> = poller(5)
            .wait_for("abort", |_| async move {
                calls_ref.fetch_add(1, Ordering::SeqCst);
                Poll::Failed(TestError::Aborted("gone"))
            })
            .await;

        assert_eq!(result, Err(TestError::Aborted("gone")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_is_labelled() {
        let result: Result<(), DeployError> = poller(4)
            .wait_for("stack deletion", |_| async { Poll::Continue })
            .await;

        match result {
            Err(DeployError::Stack(StackError::Timeout { label, attempts })) => {
                assert_eq!(label, "stack deletion");
                assert_eq!(attempts, 4);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_zero_attempts_never_probes() {
        let calls = AtomicU32::new(0);
        let calls_ref = &calls;

        let result: Result<(), TestError> = poller(0)
            .wait_for("nothing", |_| async move {
                calls_ref.fetch_add(1, Ordering::SeqCst);
                Poll::Done(())
            })
            .await;

        assert_eq!(result, Err(TestError::Exhausted(0)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
