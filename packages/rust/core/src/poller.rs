//! Bounded polling of long-running render operations.

use std::time::Duration;

use notecast_providers::{OperationHandle, OperationStatus, RenderedMedia};
use tracing::{debug, info, instrument, warn};

use crate::renderer::MediaRenderer;

/// How a poll loop ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// The operation finished with media.
    Completed(RenderedMedia),
    /// The operation finished without media, or with an error.
    Failed(String),
    /// The attempt budget ran out first.
    TimedOut { attempts: u32 },
}

/// Query `handle` until it settles, at most `max_attempts` times.
///
/// Status-query errors use up an attempt but do not end the loop. Waiting
/// between attempts uses the tokio timer, so dropping the returned future
/// cancels polling.
#[instrument(skip_all, fields(operation = %handle, max_attempts = max_attempts))]
pub async fn poll_operation(
    renderer: &dyn MediaRenderer,
    handle: &OperationHandle,
    interval: Duration,
    max_attempts: u32,
) -> PollOutcome {
    for attempt in 1..=max_attempts {
        match renderer.poll_status(handle).await {
            Ok(OperationStatus::Succeeded(media)) => {
                info!(attempt, bytes = media.bytes.len(), "operation completed");
                return PollOutcome::Completed(media);
            }
            Ok(OperationStatus::Failed(reason)) => {
                warn!(attempt, %reason, "operation failed");
                return PollOutcome::Failed(reason);
            }
            Ok(OperationStatus::Running) => {
                debug!(attempt, "operation still running");
            }
            Err(e) => {
                warn!(attempt, error = %e, "status query failed");
            }
        }

        if attempt < max_attempts {
            tokio::time::sleep(interval).await;
        }
    }

    warn!(attempts = max_attempts, "operation did not finish within attempt budget");
    PollOutcome::TimedOut {
        attempts: max_attempts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::AsyncVideoRenderer;
    use crate::testing::FakeVideo;
    use std::sync::Arc;

    fn renderer(fake: &Arc<FakeVideo>) -> AsyncVideoRenderer {
        AsyncVideoRenderer::new(fake.clone(), 1000)
    }

    #[tokio::test(start_paused = true)]
    async fn completes_when_operation_finishes() {
        let fake = Arc::new(FakeVideo::completing_after(3));
        let handle = OperationHandle("op-1".into());
        let outcome =
            poll_operation(&renderer(&fake), &handle, Duration::from_secs(10), 60).await;
        assert!(matches!(outcome, PollOutcome::Completed(_)));
        assert_eq!(fake.poll_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_max_attempts() {
        let fake = Arc::new(FakeVideo::never_completing());
        let handle = OperationHandle("op-1".into());
        let start = tokio::time::Instant::now();
        let outcome = poll_operation(&renderer(&fake), &handle, Duration::from_secs(10), 5).await;

        assert_eq!(outcome, PollOutcome::TimedOut { attempts: 5 });
        assert_eq!(fake.poll_count(), 5);
        // four waits between five queries
        assert_eq!(start.elapsed(), Duration::from_secs(40));
    }

    #[tokio::test(start_paused = true)]
    async fn query_errors_consume_attempts() {
        let fake = Arc::new(FakeVideo::erroring());
        let handle = OperationHandle("op-1".into());
        let outcome = poll_operation(&renderer(&fake), &handle, Duration::from_millis(1), 3).await;
        assert_eq!(outcome, PollOutcome::TimedOut { attempts: 3 });
        assert_eq!(fake.poll_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_operation_stops_early() {
        let fake = Arc::new(FakeVideo::failing_operation("safety filter"));
        let handle = OperationHandle("op-1".into());
        let outcome = poll_operation(&renderer(&fake), &handle, Duration::from_secs(1), 10).await;
        assert_eq!(outcome, PollOutcome::Failed("safety filter".into()));
        assert_eq!(fake.poll_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_future_cancels_polling() {
        let fake = Arc::new(FakeVideo::never_completing());
        let handle = OperationHandle("op-1".into());
        let r = renderer(&fake);
        let result = tokio::time::timeout(
            Duration::from_secs(25),
            poll_operation(&r, &handle, Duration::from_secs(10), 60),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(fake.poll_count(), 3);
    }
}
