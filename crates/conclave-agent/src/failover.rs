use crate::backends::CompletionBackend;
use async_trait::async_trait;
use conclave_core::{ConclaveError, ConclaveResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Type alias for the injectable sleep function used in tests.
#[cfg(test)]
type SleepFn = Box<
    dyn Fn(u64) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> + Send + Sync,
>;

/// Retry behaviour for failover across completion backends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries per backend before moving to the next one.
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff.
    pub backoff_base_ms: u64,
    /// Maximum delay in milliseconds (cap for exponential backoff).
    pub backoff_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
        }
    }
}

/// Whether a completion error is transient and worth retrying.
///
/// I/O failures, timeouts, rate limits (429) and server errors (5xx) are
/// retried. Configuration and naming errors, and client errors (400), are not.
pub fn is_retryable(err: &ConclaveError) -> bool {
    match err {
        ConclaveError::Io(_) => true,
        ConclaveError::Completion(msg) | ConclaveError::Agent(msg) => {
            let lower = msg.to_lowercase();
            if lower.contains("400") {
                return false;
            }
            lower.contains("timeout")
                || lower.contains("timed out")
                || lower.contains("429")
                || lower.contains("rate limit")
                || lower.contains("temporarily")
                || lower.contains("5xx")
                || lower.contains("500")
                || lower.contains("502")
                || lower.contains("503")
                || lower.contains("504")
        }
        _ => false,
    }
}

/// Exponential backoff for `attempt`, capped at `backoff_max_ms`.
fn compute_backoff(policy: &RetryPolicy, attempt: u32) -> u64 {
    let delay = policy.backoff_base_ms.saturating_mul(2u64.saturating_pow(attempt));
    delay.min(policy.backoff_max_ms)
}

/// A [`CompletionBackend`] that wraps several backends and fails over between
/// them, retrying transient errors with exponential backoff.
///
/// Backends are tried in order. Within each backend, retryable errors are
/// retried up to `max_retries` times; a non-retryable error moves on to the
/// next backend immediately. If every backend fails, the last error is
/// returned.
pub struct FailoverBackend {
    backends: Vec<Arc<dyn CompletionBackend>>,
    policy: RetryPolicy,
    #[cfg(test)]
    sleep_fn: Option<SleepFn>,
}

impl FailoverBackend {
    /// Fails with a config error when `backends` is empty.
    pub fn new(
        backends: Vec<Arc<dyn CompletionBackend>>,
        policy: RetryPolicy,
    ) -> ConclaveResult<Self> {
        if backends.is_empty() {
            return Err(ConclaveError::Config(
                "FailoverBackend requires at least one backend".into(),
            ));
        }
        Ok(Self {
            backends,
            policy,
            #[cfg(test)]
            sleep_fn: None,
        })
    }

    /// Number of wrapped backends.
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    /// Always false; construction rejects an empty list.
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    async fn do_sleep(&self, ms: u64) {
        #[cfg(test)]
        if let Some(ref f) = self.sleep_fn {
            f(ms).await;
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
    }
}

#[async_trait]
impl CompletionBackend for FailoverBackend {
    async fn complete(&self, prompt: &str) -> ConclaveResult<String> {
        let mut last_err: Option<ConclaveError> = None;

        for (backend_idx, backend) in self.backends.iter().enumerate() {
            for attempt in 0..=self.policy.max_retries {
                match backend.complete(prompt).await {
                    Ok(text) => return Ok(text),
                    Err(e) => {
                        if !is_retryable(&e) {
                            warn!(
                                backend = backend.name(),
                                backend_idx,
                                attempt,
                                error = %e,
                                "Non-retryable completion error, moving to next backend"
                            );
                            last_err = Some(e);
                            break;
                        }

                        if attempt < self.policy.max_retries {
                            let delay = compute_backoff(&self.policy, attempt);
                            info!(
                                backend = backend.name(),
                                backend_idx,
                                attempt,
                                delay_ms = delay,
                                error = %e,
                                "Retryable completion error, backing off"
                            );
                            self.do_sleep(delay).await;
                        }
                        last_err = Some(e);
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            ConclaveError::Completion("All failover backends exhausted".into())
        }))
    }

    fn name(&self) -> &str {
        "failover"
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Returns a scripted sequence of results; pops from the front per call.
    struct MockBackend {
        results: tokio::sync::Mutex<Vec<ConclaveResult<String>>>,
        call_count: AtomicU32,
    }

    impl MockBackend {
        fn new(results: Vec<ConclaveResult<String>>) -> Arc<Self> {
            Arc::new(Self {
                results: tokio::sync::Mutex::new(results),
                call_count: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CompletionBackend for MockBackend {
        async fn complete(&self, _prompt: &str) -> ConclaveResult<String> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            let mut results = self.results.lock().await;
            if results.is_empty() {
                Err(ConclaveError::Completion("MockBackend: no more results".into()))
            } else {
                results.remove(0)
            }
        }
    }

    fn instant_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            backoff_base_ms: 0,
            backoff_max_ms: 0,
        }
    }

    fn failover(backends: Vec<Arc<dyn CompletionBackend>>) -> FailoverBackend {
        let mut fb = FailoverBackend::new(backends, instant_policy()).unwrap();
        fb.sleep_fn = Some(Box::new(|_| Box::pin(async {})));
        fb
    }

    fn err(msg: &str) -> ConclaveResult<String> {
        Err(ConclaveError::Completion(msg.into()))
    }

    fn errs(msg: &str, n: usize) -> Vec<ConclaveResult<String>> {
        (0..n).map(|_| err(msg)).collect()
    }

    #[tokio::test]
    async fn retry_succeeds_on_second_try() {
        let mock = MockBackend::new(vec![err("429 Too Many Requests"), Ok("ok".into())]);
        let fb = failover(vec![mock.clone()]);

        assert_eq!(fb.complete("p").await.unwrap(), "ok");
        assert_eq!(mock.calls(), 2);
    }

    #[tokio::test]
    async fn all_backends_fail_returns_last_error() {
        let fb = failover(vec![
            MockBackend::new(errs("500 Internal Server Error", 4)),
            MockBackend::new(errs("503 Service Unavailable", 4)),
        ]);

        let msg = fb.complete("p").await.unwrap_err().to_string();
        assert!(msg.contains("503"), "Expected last error (503), got: {msg}");
    }

    #[tokio::test]
    async fn non_retryable_skips_immediately() {
        let first = MockBackend::new(vec![err("400 Bad Request"), Ok("should not reach".into())]);
        let second = MockBackend::new(vec![Ok("fallback ok".into())]);
        let fb = failover(vec![first.clone(), second]);

        assert_eq!(fb.complete("p").await.unwrap(), "fallback ok");
        assert_eq!(first.calls(), 1);
    }

    #[tokio::test]
    async fn failover_to_second_backend() {
        let first = MockBackend::new(errs("502 Bad Gateway", 4));
        let second = MockBackend::new(vec![Ok("second backend".into())]);
        let fb = failover(vec![first.clone(), second]);

        assert_eq!(fb.complete("p").await.unwrap(), "second backend");
        assert_eq!(first.calls(), 4);
    }

    #[test]
    fn empty_backend_list_rejected() {
        assert!(matches!(
            FailoverBackend::new(vec![], RetryPolicy::default()),
            Err(ConclaveError::Config(_))
        ));
    }

    #[test]
    fn backoff_computation() {
        let policy = RetryPolicy {
            max_retries: 5,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
        };

        assert_eq!(compute_backoff(&policy, 0), 500);
        assert_eq!(compute_backoff(&policy, 1), 1000);
        assert_eq!(compute_backoff(&policy, 3), 4000);
        assert_eq!(compute_backoff(&policy, 5), 16000);
        assert_eq!(compute_backoff(&policy, 6), 30_000);
        assert_eq!(compute_backoff(&policy, 63), 30_000);
    }

    #[test]
    fn is_retryable_classification() {
        assert!(is_retryable(&ConclaveError::Completion("429 Too Many Requests".into())));
        assert!(is_retryable(&ConclaveError::Completion("'llm' timeout after 30s".into())));
        assert!(is_retryable(&ConclaveError::Completion("503 Service Unavailable".into())));
        assert!(is_retryable(&ConclaveError::Io(std::io::Error::other("reset"))));

        assert!(!is_retryable(&ConclaveError::Completion("400 Bad Request".into())));
        assert!(!is_retryable(&ConclaveError::Completion("exit 1: bad flag".into())));
        assert!(!is_retryable(&ConclaveError::Config("missing command".into())));
    }
}
