//! # Units of work supervised by [`run`](crate::run).
//!
//! A [`Runner`] is invoked exactly once with the shared cancellation token and is expected
//! to keep running until that token is cancelled. State lives in the implementor (or in the
//! closure wrapped by [`RunFn`]); the trait itself is stateless.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::BoxError;

/// Shared handle to a runner.
pub type RunnerRef = Arc<dyn Runner>;

/// A long-lived unit of work.
///
/// Implementations should return once `ctx` is cancelled, either with `Ok(())`
/// or with [`Canceled`](crate::Canceled). Any return before cancellation is
/// reported by the supervisor as an unexpected return.
#[async_trait]
pub trait Runner: Send + Sync + 'static {
    /// Runs until `ctx` is cancelled or the work stops on its own.
    async fn run(&self, ctx: CancellationToken) -> Result<(), BoxError>;
}

/// Adapter turning an async closure into a [`Runner`].
///
/// ```ignore
/// let ticker = RunFn::arc(|ctx: CancellationToken| async move {
///     ctx.cancelled().await;
///     Ok(())
/// });
/// ```
pub struct RunFn<F> {
    f: F,
}

impl<F, Fut> RunFn<F>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Wraps the closure and returns it as a shared [`RunnerRef`].
    pub fn arc(f: F) -> RunnerRef {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl<F, Fut> Runner for RunFn<F>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    async fn run(&self, ctx: CancellationToken) -> Result<(), BoxError> {
        (self.f)(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn run_fn_calls_closure() {
        let called = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&called);

        let runner = RunFn::new(move |_ctx: CancellationToken| {
            let flag = Arc::clone(&flag);
            async move {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            }
        });

        assert!(runner.run(CancellationToken::new()).await.is_ok());
        assert!(called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn run_fn_forwards_errors() {
        let runner = RunFn::arc(|_ctx: CancellationToken| async move {
            Err::<(), BoxError>("boom".into())
        });

        let err = runner.run(CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }
}
