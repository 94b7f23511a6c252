//! Timeout and cancellation wrappers for tool futures
//!
//! Two flavours:
//! - [`run_bounded`] races the future against the cancellation token and a
//!   timeout, dropping it on either. Used for leaf work (built-in tools).
//! - [`run_with_deadline`] cancels a token when the deadline passes and then
//!   waits for the future to wind down, so work that manages its own
//!   in-flight children (composites) can drain them first.

use super::result::ToolError;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Run `future` until it finishes, times out or `cancel` fires
pub async fn run_bounded<F>(
    future: F,
    limit: Option<Duration>,
    cancel: &CancellationToken,
) -> Result<Value, ToolError>
where
    F: Future<Output = Result<Value, ToolError>>,
{
    if cancel.is_cancelled() {
        return Err(ToolError::cancelled("Cancelled before execution"));
    }

    let bounded = async {
        match limit {
            Some(limit) => match timeout(limit, future).await {
                Ok(result) => result,
                Err(_) => Err(ToolError::timeout(limit)),
            },
            None => future.await,
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ToolError::cancelled("Execution cancelled")),
        result = bounded => result,
    }
}

/// Run `future` with a deadline that cancels `token` and then drains
///
/// `future` must observe `token`. When the deadline passes the token is
/// cancelled, the future is awaited to completion and its result replaced
/// by a retryable timeout error.
pub async fn run_with_deadline<F>(
    future: F,
    limit: Duration,
    token: &CancellationToken,
) -> Result<Value, ToolError>
where
    F: Future<Output = Result<Value, ToolError>>,
{
    tokio::pin!(future);
    tokio::select! {
        result = &mut future => result,
        _ = tokio::time::sleep(limit) => {
            tracing::warn!(?limit, "deadline reached, cancelling in-flight work");
            token.cancel();
            let _ = future.await;
            Err(ToolError::timeout(limit))
        }
    }
}

#[cfg(test)]
mod runtime_tests {
    use super::*;
    use crate::tools::ToolErrorKind;

    async fn slow(delay: Duration) -> Result<Value, ToolError> {
        tokio::time::sleep(delay).await;
        Ok(serde_json::json!({"completed": true}))
    }

    #[tokio::test]
    async fn test_successful_execution() {
        let token = CancellationToken::new();
        let result = run_bounded(slow(Duration::from_millis(1)), None, &token).await;
        assert_eq!(result.unwrap(), serde_json::json!({"completed": true}));
    }

    #[tokio::test]
    async fn test_timeout_enforcement() {
        let token = CancellationToken::new();
        let result = run_bounded(
            slow(Duration::from_secs(5)),
            Some(Duration::from_millis(50)),
            &token,
        )
        .await;

        let error = result.unwrap_err();
        assert_eq!(error.kind, ToolErrorKind::Timeout);
        assert!(error.kind.is_retryable());
    }

    #[tokio::test]
    async fn test_cancellation() {
        let token = CancellationToken::new();
        token.cancel();

        let result = run_bounded(slow(Duration::from_secs(5)), None, &token).await;
        assert_eq!(result.unwrap_err().kind, ToolErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn test_cancellation_mid_flight() {
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let result = run_bounded(slow(Duration::from_secs(5)), None, &token).await;
        assert_eq!(result.unwrap_err().kind, ToolErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn test_deadline_drains_before_reporting() {
        let token = CancellationToken::new();
        let observed = token.clone();
        let drained = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = drained.clone();

        let work = async move {
            observed.cancelled().await;
            tokio::time::sleep(Duration::from_millis(10)).await;
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
            Err(ToolError::cancelled("stopped"))
        };

        let result = run_with_deadline(work, Duration::from_millis(20), &token).await;
        assert_eq!(result.unwrap_err().kind, ToolErrorKind::Timeout);
        assert!(drained.load(std::sync::atomic::Ordering::SeqCst));
    }
}
