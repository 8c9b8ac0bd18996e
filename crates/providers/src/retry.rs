//! Bounded retry with a typed outcome.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// How many times to try an operation.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Duration,
}

/// What happened after running an operation under a [`RetryPolicy`].
#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome<T, E> {
    /// An attempt succeeded.
    Success(T),
    /// Every attempt failed with a retryable error.
    Exhausted { attempts: u32, last_error: E },
    /// An attempt failed with an error that retrying cannot fix.
    NonRetryable(E),
}

impl<T, E> RetryOutcome<T, E> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// The value on success, the error otherwise.
    pub fn into_result(self) -> Result<T, E> {
        match self {
            Self::Success(v) => Ok(v),
            Self::Exhausted { last_error, .. } => Err(last_error),
            Self::NonRetryable(e) => Err(e),
        }
    }
}

impl RetryPolicy {
    /// At least one attempt is always made.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Duration::ZERO,
        }
    }

    /// Sleep this long between attempts.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `op` until it succeeds, fails non-retryably, or attempts run out.
    ///
    /// `op` receives the 1-based attempt number.
    pub async fn run<T, E, F, Fut>(
        &self,
        mut op: F,
        is_retryable: impl Fn(&E) -> bool,
    ) -> RetryOutcome<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => {
                    debug!(attempt, "Attempt succeeded");
                    return RetryOutcome::Success(value);
                }
                Err(e) if !is_retryable(&e) => {
                    warn!(attempt, error = %e, "Non-retryable failure");
                    return RetryOutcome::NonRetryable(e);
                }
                Err(e) if attempt >= self.max_attempts => {
                    warn!(attempts = attempt, error = %e, "Retries exhausted");
                    return RetryOutcome::Exhausted {
                        attempts: attempt,
                        last_error: e,
                    };
                }
                Err(e) => {
                    warn!(attempt, max = self.max_attempts, error = %e, "Attempt failed, retrying");
                    if !self.backoff.is_zero() {
                        tokio::time::sleep(self.backoff).await;
                    }
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum TestError {
        Flaky,
        Fatal,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{self:?}")
        }
    }

    fn retryable(e: &TestError) -> bool {
        *e == TestError::Flaky
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = Mutex::new(0);
        let outcome = RetryPolicy::new(3)
            .run(
                |_| {
                    let mut n = calls.lock().unwrap();
                    *n += 1;
                    let result = if *n < 3 { Err(TestError::Flaky) } else { Ok("hello") };
                    async move { result }
                },
                retryable,
            )
            .await;
        assert_eq!(outcome, RetryOutcome::Success("hello"));
        assert_eq!(*calls.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn exhausts_after_max_attempts() {
        let calls = Mutex::new(0);
        let outcome: RetryOutcome<(), _> = RetryPolicy::new(3)
            .run(
                |_| {
                    *calls.lock().unwrap() += 1;
                    async { Err(TestError::Flaky) }
                },
                retryable,
            )
            .await;
        assert_eq!(
            outcome,
            RetryOutcome::Exhausted {
                attempts: 3,
                last_error: TestError::Flaky
            }
        );
        assert_eq!(*calls.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn stops_on_non_retryable() {
        let calls = Mutex::new(0);
        let outcome: RetryOutcome<(), _> = RetryPolicy::new(5)
            .run(
                |_| {
                    *calls.lock().unwrap() += 1;
                    async { Err(TestError::Fatal) }
                },
                retryable,
            )
            .await;
        assert_eq!(outcome, RetryOutcome::NonRetryable(TestError::Fatal));
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn zero_attempts_still_tries_once() {
        let policy = RetryPolicy::new(0);
        assert_eq!(policy.max_attempts(), 1);
        let outcome = policy
            .run(|attempt| async move { Ok::<_, TestError>(attempt) }, retryable)
            .await;
        assert_eq!(outcome.into_result(), Ok(1));
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_sleeps_between_attempts() {
        let start = tokio::time::Instant::now();
        let _: RetryOutcome<(), _> = RetryPolicy::new(3)
            .with_backoff(Duration::from_secs(2))
            .run(|_| async { Err(TestError::Flaky) }, retryable)
            .await;
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }
}
