use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{Result, StoreError};

/// Per-operation cancellation signal and optional deadline.
///
/// Store operations race their statements against the context with
/// [`OpContext::run`]. When the token is cancelled or the deadline passes
/// first, the statement future is dropped, and a `sqlx` transaction dropped
/// without `commit` is rolled back. The commit itself goes through
/// [`OpContext::commit`], which is never interrupted once started, so a
/// caller told `Cancelled` can rely on nothing having been committed.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl OpContext {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// A context driven by an externally owned cancellation token.
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Returns this context with a deadline `timeout` from now.
    ///
    /// An existing earlier deadline is kept.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Returns this context with the given deadline, keeping an earlier one.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    /// Derives a context that is cancelled with this one but can also be
    /// cancelled on its own.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Cancels this context and every child derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns the deadline, if one is set.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns true once the token is cancelled or the deadline has passed.
    pub fn is_done(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Drives `operation` to completion unless the context finishes first,
    /// in which case the operation is dropped and `StoreError::Cancelled` is
    /// returned.
    pub async fn run<F, T>(&self, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.is_done() {
            return Err(StoreError::Cancelled);
        }

        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            () = self.token.cancelled() => {
                tracing::debug!("operation cancelled by caller");
                Err(StoreError::Cancelled)
            }
            () = deadline => {
                tracing::debug!("operation deadline exceeded");
                Err(StoreError::Cancelled)
            }
            result = operation => result,
        }
    }

    /// Runs the final, committing step of an operation.
    ///
    /// Refuses to start once the context is done. After that, `commit` runs
    /// to completion even if the context is cancelled meanwhile, so the
    /// outcome the caller sees always matches what was persisted.
    pub async fn commit<F, T, E>(&self, commit: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, E>>,
        StoreError: From<E>,
    {
        if self.is_done() {
            tracing::debug!("operation cancelled before commit");
            return Err(StoreError::Cancelled);
        }
        Ok(commit.await?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    #[tokio::test]
    async fn background_context_runs_operation() {
        let ctx = OpContext::background();
        let value = ctx.run(async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn cancelled_context_never_starts_operation() {
        let ctx = OpContext::background();
        ctx.cancel();

        let polled = AtomicBool::new(false);
        let result = ctx
            .run(async {
                polled.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(StoreError::Cancelled)));
        assert!(!polled.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_interrupts_pending_operation() {
        let ctx = OpContext::background().with_timeout(Duration::from_millis(50));

        let result: Result<()> = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(StoreError::Cancelled)));
    }

    #[tokio::test]
    async fn cancelling_parent_cancels_child() {
        let parent = OpContext::background();
        let child = parent.child();

        parent.cancel();
        assert!(child.is_done());
    }

    #[tokio::test]
    async fn cancelling_child_leaves_parent_running() {
        let parent = OpContext::background();
        let child = parent.child();

        child.cancel();
        assert!(!parent.is_done());
    }

    #[tokio::test]
    async fn earlier_deadline_wins() {
        let now = Instant::now();
        let ctx = OpContext::background()
            .with_deadline(now + Duration::from_secs(1))
            .with_deadline(now + Duration::from_secs(10));
        assert_eq!(ctx.deadline(), Some(now + Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn external_token_cancels_context() {
        let token = CancellationToken::new();
        let ctx = OpContext::with_token(token.clone());
        assert!(!ctx.is_done());

        token.cancel();
        let result = ctx.run(async { Ok(()) }).await;
        assert!(matches!(result, Err(StoreError::Cancelled)));
    }

    #[tokio::test]
    async fn commit_is_refused_once_done() {
        let ctx = OpContext::background();
        ctx.cancel();

        let polled = AtomicBool::new(false);
        let result = ctx
            .commit(async {
                polled.store(true, Ordering::SeqCst);
                Ok::<_, StoreError>(())
            })
            .await;
        assert!(matches!(result, Err(StoreError::Cancelled)));
        assert!(!polled.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cancellation_during_commit_reports_success() {
        let ctx = OpContext::background();

        let result = ctx
            .commit(async {
                ctx.cancel();
                tokio::task::yield_now().await;
                Ok::<_, StoreError>(11)
            })
            .await;
        assert_eq!(result.unwrap(), 11);
        assert!(ctx.is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_during_commit_reports_success() {
        let ctx = OpContext::background().with_timeout(Duration::from_millis(10));

        let result = ctx
            .commit(async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<_, StoreError>(())
            })
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn commit_errors_are_converted() {
        let ctx = OpContext::background();
        let result: Result<()> = ctx.commit(async { Err(sqlx::Error::PoolTimedOut) }).await;
        assert!(matches!(
            result,
            Err(StoreError::Database(sqlx::Error::PoolTimedOut))
        ));
    }

    #[tokio::test]
    async fn operation_errors_pass_through() {
        let ctx = OpContext::background();
        let result: Result<()> = ctx
            .run(async { Err(StoreError::CartNotFound(common::CartId::new(3))) })
            .await;
        assert!(matches!(result, Err(StoreError::CartNotFound(_))));
    }
}
