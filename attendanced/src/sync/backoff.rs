use std::future::Future;
use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffKind {
    /// `base × attempt`
    Linear,
    /// `base × 2^attempt`
    Exponential,
}

#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    kind: BackoffKind,
    base: Duration,
    max: Duration,
    jitter: bool,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter: bool) -> Self {
        Self {
            kind: BackoffKind::Exponential,
            base,
            max,
            jitter,
        }
    }

    pub fn linear(base: Duration) -> Self {
        Self {
            kind: BackoffKind::Linear,
            base,
            max: Duration::from_secs(60),
            jitter: false,
        }
    }

    pub fn kind(&self) -> BackoffKind {
        self.kind
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let mut rng = rand::thread_rng();
        self.delay_with_rng(attempt, &mut rng)
    }

    pub fn delay_with_rng<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base_ms = self.base.as_millis().min(u128::from(u64::MAX)) as u64;
        let max_ms = self.max.as_millis().min(u128::from(u64::MAX)) as u64;
        let raw = match self.kind {
            BackoffKind::Linear => base_ms.saturating_mul(u64::from(attempt)),
            BackoffKind::Exponential => base_ms.saturating_mul(1u64 << attempt.min(16)),
        };
        let capped = raw.min(max_ms);
        let delay_ms = if self.jitter {
            rng.gen_range(0..=capped)
        } else {
            capped
        };
        Duration::from_millis(delay_ms)
    }
}

/// Bounded retry: at most `max_attempts` calls, sleeping `backoff.delay(n)`
/// after the n-th failure.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Opening the local database at startup.
    pub fn startup() -> Self {
        Self::new(
            5,
            Backoff::new(Duration::from_millis(100), Duration::from_secs(2), true),
        )
    }

    pub fn delay_after_failure(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }

    pub async fn run<T, E, F, Fut, R>(&self, operation: F, is_retryable: R) -> RetryOutcome<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: Fn(&E) -> bool,
    {
        self.run_with_hint(operation, is_retryable, |_| None).await
    }

    /// Like [`RetryPolicy::run`], but waits at least as long as the failed
    /// call asked for (a server's `Retry-After`), capped at the backoff maximum.
    pub async fn run_with_hint<T, E, F, Fut, R, H>(
        &self,
        mut operation: F,
        is_retryable: R,
        delay_hint: H,
    ) -> RetryOutcome<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: Fn(&E) -> bool,
        H: Fn(&E) -> Option<Duration>,
    {
        let mut attempt = 1u32;
        loop {
            match operation(attempt).await {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                    };
                }
                Err(err) => {
                    if attempt >= self.max_attempts || !is_retryable(&err) {
                        return RetryOutcome {
                            result: Err(err),
                            attempts: attempt,
                        };
                    }
                    let mut delay = self.delay_after_failure(attempt);
                    if let Some(hint) = delay_hint(&err) {
                        delay = delay.max(hint.min(self.backoff.max));
                    }
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_without_jitter_is_exponential() {
        let backoff = Backoff::new(
            Duration::from_millis(100),
            Duration::from_millis(800),
            false,
        );
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            backoff.delay_with_rng(0, &mut rng),
            Duration::from_millis(100)
        );
        assert_eq!(
            backoff.delay_with_rng(2, &mut rng),
            Duration::from_millis(400)
        );
        assert_eq!(
            backoff.delay_with_rng(4, &mut rng),
            Duration::from_millis(800)
        );
    }

    #[test]
    fn linear_backoff_grows_by_base() {
        let backoff = Backoff::linear(Duration::from_millis(1000));
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(backoff.kind(), BackoffKind::Linear);
        assert_eq!(backoff.delay_with_rng(1, &mut rng), Duration::from_secs(1));
        assert_eq!(backoff.delay_with_rng(2, &mut rng), Duration::from_secs(2));
        assert_eq!(backoff.delay_with_rng(3, &mut rng), Duration::from_secs(3));
    }

    #[test]
    fn backoff_with_jitter_is_capped() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(800), true);
        let mut rng = StdRng::seed_from_u64(42);
        let delay = backoff.delay_with_rng(3, &mut rng);
        assert!(delay <= Duration::from_millis(800));
    }

    #[tokio::test]
    async fn run_stops_after_max_attempts() {
        let policy = RetryPolicy::new(3, Backoff::linear(Duration::from_millis(1)));
        let calls = AtomicU32::new(0);
        let outcome: RetryOutcome<(), &str> = policy
            .run(
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err("boom") }
                },
                |_| true,
            )
            .await;
        assert_eq!(outcome.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(outcome.result.is_err());
    }

    #[tokio::test]
    async fn run_returns_first_success() {
        let policy = RetryPolicy::new(3, Backoff::linear(Duration::from_millis(1)));
        let outcome: RetryOutcome<u32, &str> = policy
            .run(
                |attempt| async move { if attempt < 2 { Err("flaky") } else { Ok(attempt) } },
                |_| true,
            )
            .await;
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.result, Ok(2));
    }

    #[tokio::test]
    async fn run_with_hint_waits_for_requested_delay() {
        let policy = RetryPolicy::new(2, Backoff::linear(Duration::from_millis(1)));
        let started = std::time::Instant::now();
        let outcome: RetryOutcome<u32, &str> = policy
            .run_with_hint(
                |attempt| async move { if attempt < 2 { Err("slow down") } else { Ok(attempt) } },
                |_| true,
                |_| Some(Duration::from_millis(150)),
            )
            .await;
        assert_eq!(outcome.result, Ok(2));
        assert!(started.elapsed() >= Duration::from_millis(150));
    }

    #[tokio::test]
    async fn run_with_hint_is_capped_by_backoff_max() {
        let backoff = Backoff::new(Duration::from_millis(1), Duration::from_millis(20), false);
        let policy = RetryPolicy::new(2, backoff);
        let started = std::time::Instant::now();
        let _: RetryOutcome<(), &str> = policy
            .run_with_hint(
                |_| async { Err("slow down") },
                |_| true,
                |_| Some(Duration::from_secs(3600)),
            )
            .await;
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn run_does_not_retry_permanent_errors() {
        let policy = RetryPolicy::new(3, Backoff::linear(Duration::from_millis(1)));
        let outcome: RetryOutcome<(), &str> = policy
            .run(|_| async { Err("denied") }, |err| *err != "denied")
            .await;
        assert_eq!(outcome.attempts, 1);
    }
}
