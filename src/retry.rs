//! Bounded, backoff-based retry for fallible async operations.
//!
//! The first attempt is not a retry: a policy with `max_retries = 3` allows
//! up to four attempts. Delay before attempt `n + 1` is
//! `min(max_delay_ms, initial_delay_ms * backoff_factor^n)`, optionally
//! jittered by up to ±15% to avoid synchronized retry storms.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::OperationError;
use crate::time::{Sleeper, TokioSleeper};

/// Maximum relative perturbation applied to a computed delay.
const JITTER_FRACTION: f64 = 0.15;

fn default_max_retries() -> u32 {
    3
}
fn default_initial_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_backoff_factor() -> f64 {
    2.0
}
fn default_use_jitter() -> bool {
    true
}

/// Retry behavior, resolved once at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt (default 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay before the first retry (default 500ms).
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Upper bound on any single delay (default 30s).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Exponential growth factor (default 2.0).
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    /// Perturb each delay by up to ±15% (default true).
    #[serde(default = "default_use_jitter")]
    pub use_jitter: bool,
    /// Per-attempt deadline; a slower attempt fails with a timeout error
    /// without aborting the retry loop (default none).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_factor: default_backoff_factor(),
            use_jitter: default_use_jitter(),
            timeout_ms: None,
        }
    }
}

/// Terminal report of a retried operation.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    /// The value on eventual success, or the last error on exhaustion.
    pub result: Result<T, OperationError>,
    /// Attempts taken, counting the first.
    pub attempts: u32,
    /// Wall time across all attempts and sleeps.
    pub total_time: Duration,
    /// True when the operation never succeeded within the retry budget.
    pub max_retries_reached: bool,
}

impl<T> RetryOutcome<T> {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Observability hook invoked once per attempt, success or failure.
pub trait RetryObserver: Send + Sync {
    fn on_attempt(
        &self,
        operation: &str,
        attempt: u32,
        elapsed: Duration,
        error: Option<&OperationError>,
    );
}

/// Default observer: structured log events, warning on failed attempts.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingRetryObserver;

impl RetryObserver for TracingRetryObserver {
    fn on_attempt(
        &self,
        operation: &str,
        attempt: u32,
        elapsed: Duration,
        error: Option<&OperationError>,
    ) {
        match error {
            None => debug!(
                operation,
                attempt,
                elapsed_ms = elapsed.as_millis() as u64,
                "attempt succeeded"
            ),
            Some(err) => warn!(
                operation,
                attempt,
                elapsed_ms = elapsed.as_millis() as u64,
                kind = %err.kind,
                error = %err.message,
                "attempt failed"
            ),
        }
    }
}

/// Runs fallible async operations under a [`RetryPolicy`].
pub struct RetryExecutor {
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    observer: Arc<dyn RetryObserver>,
}

impl RetryExecutor {
    /// Executor with the tokio sleeper and tracing observer.
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_parts(policy, Arc::new(TokioSleeper), Arc::new(TracingRetryObserver))
    }

    /// Executor with injected sleeper and observer, for deterministic tests.
    pub fn with_parts(
        policy: RetryPolicy,
        sleeper: Arc<dyn Sleeper>,
        observer: Arc<dyn RetryObserver>,
    ) -> Self {
        Self {
            policy,
            sleeper,
            observer,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` until it succeeds or the retry budget is spent.
    pub async fn execute<T, F, Fut>(&self, operation: &str, mut op: F) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OperationError>>,
    {
        let started = Instant::now();
        let mut attempt: u32 = 1;

        loop {
            let result = self.run_attempt(&mut op).await;
            let elapsed = started.elapsed();
            self.observer
                .on_attempt(operation, attempt, elapsed, result.as_ref().err());

            match result {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                        total_time: started.elapsed(),
                        max_retries_reached: false,
                    };
                }
                Err(err) if attempt > self.policy.max_retries => {
                    return RetryOutcome {
                        result: Err(err),
                        attempts: attempt,
                        total_time: started.elapsed(),
                        max_retries_reached: true,
                    };
                }
                Err(_) => {
                    let delay = self.delay_before(attempt + 1);
                    debug!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "backing off before retry"
                    );
                    self.sleeper.sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn run_attempt<T, F, Fut>(&self, op: &mut F) -> Result<T, OperationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OperationError>>,
    {
        match self.policy.timeout_ms {
            Some(timeout_ms) => {
                let deadline = Duration::from_millis(timeout_ms);
                match tokio::time::timeout(deadline, op()).await {
                    Ok(result) => result,
                    Err(_) => Err(OperationError::timeout(format!(
                        "attempt exceeded {timeout_ms}ms"
                    ))),
                }
            }
            None => op().await,
        }
    }

    /// Delay before `next_attempt`, i.e. after `next_attempt - 1` failures.
    fn delay_before(&self, next_attempt: u32) -> Duration {
        let failures = next_attempt.saturating_sub(1);
        let raw = self.policy.initial_delay_ms as f64
            * self.policy.backoff_factor.powi(failures as i32);
        let capped = raw.min(self.policy.max_delay_ms as f64);
        let delayed = if self.policy.use_jitter {
            let factor = 1.0 + rand::thread_rng().gen_range(-JITTER_FRACTION..=JITTER_FRACTION);
            capped * factor
        } else {
            capped
        };
        Duration::from_millis(delayed.max(0.0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::time::testing::RecordingSleeper;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Observer that records every attempt it sees.
    #[derive(Default)]
    struct RecordingObserver {
        attempts: Mutex<Vec<(String, u32, Option<FailureKind>)>>,
    }

    impl RetryObserver for RecordingObserver {
        fn on_attempt(
            &self,
            operation: &str,
            attempt: u32,
            _elapsed: Duration,
            error: Option<&OperationError>,
        ) {
            self.attempts
                .lock()
                .push((operation.to_string(), attempt, error.map(|e| e.kind)));
        }
    }

    fn deterministic_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay_ms: 100,
            max_delay_ms: 10_000,
            backoff_factor: 2.0,
            use_jitter: false,
            timeout_ms: None,
        }
    }

    fn executor(policy: RetryPolicy) -> (RetryExecutor, Arc<RecordingSleeper>) {
        let sleeper = Arc::new(RecordingSleeper::default());
        let exec =
            RetryExecutor::with_parts(policy, sleeper.clone(), Arc::new(TracingRetryObserver));
        (exec, sleeper)
    }

    #[tokio::test]
    async fn test_first_attempt_success_never_sleeps() {
        let (exec, sleeper) = executor(deterministic_policy(3));

        let outcome = exec
            .execute("noop", || async { Ok::<_, OperationError>(7) })
            .await;

        assert!(outcome.is_success());
        assert_eq!(outcome.attempts, 1);
        assert!(!outcome.max_retries_reached);
        assert!(sleeper.slept.lock().is_empty());
    }

    #[tokio::test]
    async fn test_fails_twice_then_succeeds() {
        let (exec, sleeper) = executor(deterministic_policy(2));
        let calls = AtomicU32::new(0);

        let outcome = exec
            .execute("flaky", || {
                let n = calls.fetch_add(1, Ordering::Relaxed);
                async move {
                    if n < 2 {
                        Err(OperationError::network("connection reset"))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(outcome.result.unwrap(), 42);
        assert_eq!(outcome.attempts, 3);
        assert!(!outcome.max_retries_reached);
        // Delay before attempt n+1 is initial * factor^n.
        assert_eq!(
            *sleeper.slept.lock(),
            vec![Duration::from_millis(200), Duration::from_millis(400)]
        );
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let (exec, _) = executor(deterministic_policy(2));
        let calls = AtomicU32::new(0);

        let outcome = exec
            .execute("doomed", || {
                let n = calls.fetch_add(1, Ordering::Relaxed) + 1;
                async move { Err::<(), _>(OperationError::database(format!("failure {n}"))) }
            })
            .await;

        assert!(!outcome.is_success());
        assert_eq!(outcome.attempts, 3);
        assert!(outcome.max_retries_reached);
        assert_eq!(outcome.result.unwrap_err().message, "failure 3");
    }

    #[tokio::test]
    async fn test_delay_never_exceeds_max() {
        let policy = RetryPolicy {
            max_retries: 3,
            initial_delay_ms: 100,
            max_delay_ms: 500,
            backoff_factor: 10.0,
            use_jitter: false,
            timeout_ms: None,
        };
        let (exec, sleeper) = executor(policy);

        let _ = exec
            .execute("capped", || async {
                Err::<(), _>(OperationError::network("down"))
            })
            .await;

        for delay in sleeper.slept.lock().iter() {
            assert!(*delay <= Duration::from_millis(500));
        }
    }

    #[tokio::test]
    async fn test_jitter_stays_within_bound() {
        let policy = RetryPolicy {
            max_retries: 5,
            initial_delay_ms: 1_000,
            max_delay_ms: 1_000_000,
            backoff_factor: 1.0,
            use_jitter: true,
            timeout_ms: None,
        };
        let (exec, sleeper) = executor(policy);

        let _ = exec
            .execute("jittered", || async {
                Err::<(), _>(OperationError::network("down"))
            })
            .await;

        // factor^n is 1, so every un-jittered delay would be exactly 1000ms.
        for delay in sleeper.slept.lock().iter() {
            let ms = delay.as_millis() as u64;
            assert!((850..=1150).contains(&ms), "jittered delay {ms}ms");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_attempt_timeout_becomes_timeout_error() {
        let policy = RetryPolicy {
            timeout_ms: Some(50),
            use_jitter: false,
            ..deterministic_policy(1)
        };
        let sleeper = Arc::new(RecordingSleeper::default());
        let observer = Arc::new(RecordingObserver::default());
        let exec = RetryExecutor::with_parts(policy, sleeper, observer.clone());
        let calls = AtomicU32::new(0);

        let outcome = exec
            .execute("slow-then-fast", || {
                let n = calls.fetch_add(1, Ordering::Relaxed);
                async move {
                    if n == 0 {
                        // Exceeds the 50ms per-attempt deadline.
                        tokio::time::sleep(Duration::from_millis(200)).await;
                    }
                    Ok::<_, OperationError>("done")
                }
            })
            .await;

        assert_eq!(outcome.result.unwrap(), "done");
        assert_eq!(outcome.attempts, 2);

        let attempts = observer.attempts.lock();
        assert_eq!(attempts[0].2, Some(FailureKind::Timeout));
        assert_eq!(attempts[1].2, None);
    }

    #[tokio::test]
    async fn test_observer_sees_every_attempt() {
        let observer = Arc::new(RecordingObserver::default());
        let exec = RetryExecutor::with_parts(
            deterministic_policy(1),
            Arc::new(RecordingSleeper::default()),
            observer.clone(),
        );
        let calls = AtomicU32::new(0);

        let _ = exec
            .execute("watched", || {
                let n = calls.fetch_add(1, Ordering::Relaxed);
                async move {
                    if n == 0 {
                        Err(OperationError::permission("denied"))
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        let attempts = observer.attempts.lock();
        assert_eq!(
            *attempts,
            vec![
                ("watched".to_string(), 1, Some(FailureKind::Permission)),
                ("watched".to_string(), 2, None),
            ]
        );
    }

    #[tokio::test]
    async fn test_zero_retries_means_single_attempt() {
        let (exec, sleeper) = executor(deterministic_policy(0));
        let calls = AtomicU32::new(0);

        let outcome = exec
            .execute("once", || {
                calls.fetch_add(1, Ordering::Relaxed);
                async { Err::<(), _>(OperationError::network("down")) }
            })
            .await;

        assert_eq!(outcome.attempts, 1);
        assert!(outcome.max_retries_reached);
        assert_eq!(calls.load(Ordering::Relaxed), 1);
        assert!(sleeper.slept.lock().is_empty());
    }

    #[test]
    fn test_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.initial_delay_ms, 500);
        assert_eq!(policy.max_delay_ms, 30_000);
        assert_eq!(policy.backoff_factor, 2.0);
        assert!(policy.use_jitter);
        assert!(policy.timeout_ms.is_none());

        let from_empty: RetryPolicy = serde_json::from_str("{}").unwrap();
        assert_eq!(from_empty, policy);
    }
}
