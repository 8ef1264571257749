//! `RetryExecutor`: bounded retry with pluggable retryable-failure classification.

use std::future::Future;

use archive_core::{ArchiveError, RetryPolicy};
use backoff::backoff::Backoff;
use tokio_util::sync::CancellationToken;

/// Runs `action` up to `1 + policy.max_retry_count` times, sleeping
/// `policy.retry_delay_seconds` (cancellable) between attempts.
///
/// `is_retryable` classifies a failure as worth retrying; the default classification
/// ([`archive_core::ArchiveError::is_retryable_by_default`]) retries only
/// `TransientDatabase` failures and never retries cancellation or a query timeout.
pub struct RetryExecutor;

impl RetryExecutor {
    pub async fn execute<F, Fut, T>(
        name: &str,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
        action: F,
    ) -> Result<T, ArchiveError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ArchiveError>>,
    {
        Self::execute_with(name, policy, cancel, ArchiveError::is_retryable_by_default, action).await
    }

    pub async fn execute_with<F, Fut, T, R>(
        name: &str,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
        is_retryable: R,
        mut action: F,
    ) -> Result<T, ArchiveError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ArchiveError>>,
        R: Fn(&ArchiveError) -> bool,
    {
        let mut backoff = backoff::backoff::Constant::new(std::time::Duration::from_secs(
            policy.retry_delay_seconds,
        ));

        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(ArchiveError::Cancelled);
            }
            attempt += 1;
            match action().await {
                Ok(value) => return Ok(value),
                Err(ArchiveError::Cancelled) => return Err(ArchiveError::Cancelled),
                Err(err) => {
                    let retryable = policy.enabled && is_retryable(&err) && attempt <= policy.max_retry_count;
                    if !retryable {
                        return Err(err);
                    }
                    tracing::warn!(
                        operation = name,
                        attempt,
                        max_retry_count = policy.max_retry_count,
                        error = %err,
                        "retrying after transient failure"
                    );
                    let delay = backoff
                        .next_backoff()
                        .unwrap_or_else(|| std::time::Duration::from_secs(policy.retry_delay_seconds));
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return Err(ArchiveError::Cancelled),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_up_to_one_plus_max_retry_count_times() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            enabled: true,
            max_retry_count: 2,
            retry_delay_seconds: 0,
        };
        let cancel = CancellationToken::new();

        let result: Result<(), ArchiveError> = RetryExecutor::execute("test-op", &policy, &cancel, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ArchiveError::TransientDatabase("deadlock".into())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn query_timeout_is_not_retried() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();
        let cancel = CancellationToken::new();

        let result: Result<(), ArchiveError> = RetryExecutor::execute("test-op", &policy, &cancel, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ArchiveError::QueryExecutionTimeout(std::time::Duration::from_secs(30))) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn succeeds_without_retry_when_action_succeeds_first_try() {
        let policy = RetryPolicy::default();
        let cancel = CancellationToken::new();
        let result = RetryExecutor::execute("test-op", &policy, &cancel, || async { Ok::<_, ArchiveError>(42) })
            .await
            .unwrap();
        assert_eq!(result, 42);
    }
}
