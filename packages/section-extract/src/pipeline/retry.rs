//! Bounded retry with exponential backoff and per-call timeouts.

use std::future::Future;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{ExtractionError, Result, Service};
use crate::types::config::RetryPolicy;

/// Run a service call under the retry policy.
///
/// Each attempt is bounded by `policy.call_timeout()`; a timeout counts as
/// a transient failure. Only retryable errors are retried. When attempts run
/// out the last retryable error is returned, so callers can tell
/// "exhausted" (`is_retryable()`) from "unavailable". Cancellation abandons
/// the in-flight attempt or backoff sleep immediately.
pub async fn call_with_retry<T, F, Fut>(
    service: Service,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut call: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let timeout = policy.call_timeout();
    let mut attempt = 0;

    loop {
        attempt += 1;

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ExtractionError::Cancelled),
            outcome = tokio::time::timeout(timeout, call()) => outcome,
        };

        let error = match outcome {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => e,
            Err(_) => ExtractionError::Timeout {
                service,
                after: timeout,
            },
        };

        if !error.is_retryable() {
            return Err(error);
        }

        if attempt >= max_attempts {
            warn!(
                service = %service,
                attempts = attempt,
                error = %error,
                "Service call failed after all retries"
            );
            return Err(error);
        }

        let delay = policy.backoff(attempt);
        warn!(
            service = %service,
            retry = attempt,
            max_attempts = max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Service call failed, retrying..."
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ExtractionError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn fast_policy(attempts: usize) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(attempts)
            .with_initial_backoff(Duration::from_millis(1))
            .with_call_timeout(Duration::from_millis(50))
    }

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let cancel = CancellationToken::new();

        let result = call_with_retry(Service::Scoring, &fast_policy(3), &cancel, move || async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ExtractionError::transient(Service::Scoring, "reset"))
            } else {
                Ok(0.8_f32)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 0.8);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_retryable_error() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let cancel = CancellationToken::new();

        let result: Result<f32> =
            call_with_retry(Service::Scoring, &fast_policy(2), &cancel, move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ExtractionError::malformed(Service::Scoring, "NaN"))
            })
            .await;

        assert!(result.unwrap_err().is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unavailable_is_not_retried() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let cancel = CancellationToken::new();

        let result: Result<f32> =
            call_with_retry(Service::Scoring, &fast_policy(5), &cancel, move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ExtractionError::unavailable(Service::Scoring, "down"))
            })
            .await;

        assert!(matches!(result, Err(ExtractionError::ServiceUnavailable { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let cancel = CancellationToken::new();
        let policy = fast_policy(1).with_call_timeout(Duration::from_millis(10));

        let result: Result<f32> = call_with_retry(Service::Extraction, &policy, &cancel, || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(1.0)
        })
        .await;

        assert!(matches!(
            result,
            Err(ExtractionError::Timeout { service: Service::Extraction, .. })
        ));
    }

    #[tokio::test]
    async fn test_cancel_abandons_call() {
        let cancel = CancellationToken::new();
        let policy = fast_policy(1).with_call_timeout(Duration::from_secs(60));
        let trigger = cancel.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let result: Result<f32> = call_with_retry(Service::Scoring, &policy, &cancel, || async {
            std::future::pending::<()>().await;
            Ok(1.0)
        })
        .await;

        assert!(matches!(result, Err(ExtractionError::Cancelled)));
    }
}
