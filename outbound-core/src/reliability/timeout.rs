//! Deadline wrapper for remote calls.

use crate::error::{CoreError, CoreResult};
use std::future::Future;
use std::time::Duration;

/// Run a future under a deadline.
///
/// # Errors
///
/// Returns [`CoreError::Timeout`] (retryable) when the deadline elapses.
pub async fn with_timeout<T, Fut>(deadline: Duration, future: Fut) -> CoreResult<T>
where
    Fut: Future<Output = CoreResult<T>>,
{
    match tokio::time::timeout(deadline, future).await {
        Ok(result) => result,
        Err(_) => Err(CoreError::Timeout(deadline)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn completes_within_deadline() {
        let result = with_timeout(Duration::from_secs(1), async { Ok(7) }).await;
        assert_eq!(result.expect("value"), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_deadline_is_a_retryable_timeout() {
        let result: CoreResult<()> = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;
        let err = result.unwrap_err();
        assert!(matches!(err, CoreError::Timeout(_)));
        assert!(err.is_retryable());
    }
}
