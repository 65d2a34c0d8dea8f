//! # Run a batch of runners until the first one stops.
//!
//! [`run`] starts every runner on its own task, all sharing one child token derived from
//! the caller's token. The first runner to return cancels that shared token, which asks
//! every sibling to stop. Once all of them returned, their outcomes are classified and
//! aggregated into a [`RunError`].
//!
//! ## Classification
//!
//! ```text
//! returned while token live        → UnexpectedReturn (with the runner's error, if any)
//! returned after cancel, Ok        → success
//! returned after cancel, Canceled  → success
//! returned after cancel, other err → Failed
//! panicked                         → Panicked
//! ```
//!
//! ## Rules
//! - Exactly one outcome per runner; errors are indexed by 1-based input position.
//! - `run` never returns while a runner is still running; a runner that ignores
//!   cancellation blocks it forever.
//! - Dropping the `run` future cancels the shared token.

use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{BoxError, RunError, RunnerError, is_canceled};
use crate::runner::RunnerRef;

/// Runs every runner concurrently and blocks until all of them returned.
///
/// Runners are expected to stop only because `ctx` (or the shared token derived from it)
/// was cancelled. Returns `Ok(())` only if every runner stopped cleanly after cancellation.
/// An empty batch returns `Ok(())` immediately.
///
/// Must be called from within a tokio runtime.
pub async fn run<I>(ctx: &CancellationToken, runners: I) -> Result<(), RunError>
where
    I: IntoIterator<Item = RunnerRef>,
{
    let shared = ctx.child_token();
    let _cancel_on_drop = shared.clone().drop_guard();

    let handles: Vec<JoinHandle<Option<RunnerError>>> = runners
        .into_iter()
        .enumerate()
        .map(|(i, runner)| tokio::spawn(supervise(i + 1, runner, shared.clone())))
        .collect();

    debug!(runners = handles.len(), "supervising runners");

    let mut errors = Vec::new();
    for (i, handle) in handles.into_iter().enumerate() {
        match handle.await {
            Ok(Some(err)) => errors.push(err),
            Ok(None) => {}
            Err(join) => {
                shared.cancel();
                errors.push(RunnerError::Panicked {
                    index: i + 1,
                    message: panic_message(join),
                });
            }
        }
    }

    if errors.is_empty() {
        debug!("all runners stopped cleanly");
        Ok(())
    } else {
        debug!(failed = errors.len(), "runners stopped with errors");
        Err(RunError::new(errors))
    }
}

async fn supervise(index: usize, runner: RunnerRef, shared: CancellationToken) -> Option<RunnerError> {
    // Cancels siblings once this runner is done, including when it panics.
    let _stop_siblings = shared.clone().drop_guard();

    trace!(runner = index, "runner started");
    let res = runner.run(shared.clone()).await;
    let live = !shared.is_cancelled();

    if live {
        debug!(runner = index, "runner returned before cancellation; stopping siblings");
    } else {
        trace!(runner = index, "runner returned after cancellation");
    }
    classify(index, live, res)
}

fn classify(index: usize, live: bool, res: Result<(), BoxError>) -> Option<RunnerError> {
    match res {
        Ok(()) if live => Some(RunnerError::UnexpectedReturn { index, source: None }),
        Ok(()) => None,
        Err(err) if live => Some(RunnerError::UnexpectedReturn {
            index,
            source: Some(err),
        }),
        Err(err) if is_canceled(&*err) => None,
        Err(err) => Some(RunnerError::Failed { index, source: err }),
    }
}

fn panic_message(join: JoinError) -> String {
    if !join.is_panic() {
        return "task aborted".to_string();
    }
    let payload = join.into_panic();
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use thiserror::Error;
    use tokio::time::{sleep, timeout};

    use crate::error::Canceled;
    use crate::runner::RunFn;

    #[derive(Error, Debug)]
    #[error("boom")]
    struct Boom;

    const GUARD: Duration = Duration::from_secs(5);

    fn until_cancelled() -> RunnerRef {
        RunFn::arc(|ctx: CancellationToken| async move {
            ctx.cancelled().await;
            Ok::<(), BoxError>(())
        })
    }

    fn returns_immediately() -> RunnerRef {
        RunFn::arc(|_ctx: CancellationToken| async move { Ok::<(), BoxError>(()) })
    }

    fn cancel_after(ctx: &CancellationToken, after: Duration) {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            sleep(after).await;
            ctx.cancel();
        });
    }

    #[tokio::test]
    async fn runners_stopped_by_parent_succeed() {
        let ctx = CancellationToken::new();
        cancel_after(&ctx, Duration::from_millis(50));

        let res = timeout(GUARD, run(&ctx, vec![until_cancelled(), until_cancelled()]))
            .await
            .expect("run must finish");
        assert!(res.is_ok());
    }

    #[tokio::test]
    async fn canceled_sentinel_after_stop_is_success() {
        let ctx = CancellationToken::new();
        cancel_after(&ctx, Duration::from_millis(20));

        let runners: Vec<RunnerRef> = (0..4)
            .map(|_| {
                RunFn::arc(|ctx: CancellationToken| async move {
                    ctx.cancelled().await;
                    Err::<(), BoxError>(Box::new(Canceled))
                })
            })
            .collect();

        let res = timeout(GUARD, run(&ctx, runners)).await.expect("run must finish");
        assert!(res.is_ok());
    }

    #[tokio::test]
    async fn one_runner_stopping_unexpectedly() {
        let ctx = CancellationToken::new();

        let err = timeout(GUARD, run(&ctx, vec![until_cancelled(), returns_immediately()]))
            .await
            .expect("run must finish")
            .unwrap_err();

        assert!(err.is_unexpected_return());
        assert_eq!(err.len(), 1);
        assert!(err.to_string().contains("runner 2"));
        assert!(!ctx.is_cancelled(), "parent token is never cancelled by run");
    }

    #[tokio::test]
    async fn one_runner_failing_unexpectedly() {
        let ctx = CancellationToken::new();
        let failing = RunFn::arc(|_ctx: CancellationToken| async move {
            Err::<(), BoxError>(Box::new(Boom))
        });

        let err = timeout(GUARD, run(&ctx, vec![until_cancelled(), failing]))
            .await
            .expect("run must finish")
            .unwrap_err();

        assert!(err.is_unexpected_return());
        assert!(err.contains::<Boom>());
        assert_eq!(err.to_string(), "(runner 2) unexpected return: boom");
    }

    #[tokio::test]
    async fn runner_failing_after_stop_is_reported() {
        let ctx = CancellationToken::new();
        cancel_after(&ctx, Duration::from_millis(20));

        let failing = RunFn::arc(|ctx: CancellationToken| async move {
            ctx.cancelled().await;
            Err::<(), BoxError>(Box::new(Boom))
        });

        let err = timeout(GUARD, run(&ctx, vec![failing, until_cancelled()]))
            .await
            .expect("run must finish")
            .unwrap_err();

        assert!(!err.is_unexpected_return());
        assert_eq!(err.len(), 1);
        assert!(matches!(err.errors()[0], RunnerError::Failed { index: 1, .. }));
        assert!(err.contains::<Boom>());
    }

    #[tokio::test]
    async fn siblings_observe_cancellation() {
        let ctx = CancellationToken::new();
        let observed = Arc::new(AtomicUsize::new(0));

        let mut runners: Vec<RunnerRef> = Vec::new();
        for _ in 0..3 {
            let observed = Arc::clone(&observed);
            runners.push(RunFn::arc(move |ctx: CancellationToken| {
                let observed = Arc::clone(&observed);
                async move {
                    ctx.cancelled().await;
                    observed.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), BoxError>(())
                }
            }));
        }
        runners.push(returns_immediately());

        let err = timeout(GUARD, run(&ctx, runners))
            .await
            .expect("run must finish")
            .unwrap_err();

        assert_eq!(observed.load(Ordering::SeqCst), 3);
        assert_eq!(err.len(), 1);
        assert_eq!(err.errors()[0].index(), 4);
    }

    #[tokio::test]
    async fn two_immediate_returns_reference_first_runner() {
        let ctx = CancellationToken::new();

        let err = timeout(GUARD, run(&ctx, vec![returns_immediately(), returns_immediately()]))
            .await
            .expect("run must finish")
            .unwrap_err();

        assert!(err.is_unexpected_return());
        assert_eq!(err.errors()[0].index(), 1);
        assert!(err.to_string().starts_with("(runner 1) unexpected return"), "{err}");
        assert!(err.errors().iter().all(RunnerError::is_unexpected_return));
        // indexes keep input order, whatever the completion order was
        let indexes: Vec<usize> = err.errors().iter().map(RunnerError::index).collect();
        let mut sorted = indexes.clone();
        sorted.sort_unstable();
        assert_eq!(indexes, sorted);
    }

    #[tokio::test]
    async fn single_runner_degenerates_to_wait() {
        let ctx = CancellationToken::new();
        cancel_after(&ctx, Duration::from_millis(20));

        let res = timeout(GUARD, run(&ctx, vec![until_cancelled()]))
            .await
            .expect("run must finish");
        assert!(res.is_ok());
    }

    #[tokio::test]
    async fn empty_batch_returns_immediately() {
        let ctx = CancellationToken::new();
        assert!(run(&ctx, Vec::new()).await.is_ok());
    }

    #[tokio::test]
    async fn panicking_runner_is_reported_and_stops_siblings() {
        let ctx = CancellationToken::new();
        let panicking = RunFn::arc(|_ctx: CancellationToken| async move {
            if true {
                panic!("runner exploded");
            }
            Ok::<(), BoxError>(())
        });

        let err = timeout(GUARD, run(&ctx, vec![until_cancelled(), panicking]))
            .await
            .expect("run must finish")
            .unwrap_err();

        assert_eq!(err.len(), 1);
        match &err.errors()[0] {
            RunnerError::Panicked { index, message } => {
                assert_eq!(*index, 2);
                assert_eq!(message, "runner exploded");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn classify_covers_every_outcome() {
        assert!(matches!(
            classify(1, true, Ok(())),
            Some(RunnerError::UnexpectedReturn { index: 1, source: None })
        ));
        assert!(classify(1, false, Ok(())).is_none());
        assert!(classify(2, false, Err(Box::new(Canceled))).is_none());
        assert!(matches!(
            classify(3, true, Err(Box::new(Canceled))),
            Some(RunnerError::UnexpectedReturn { index: 3, source: Some(_) })
        ));
        assert!(matches!(
            classify(4, false, Err(Box::new(Boom))),
            Some(RunnerError::Failed { index: 4, .. })
        ));
    }

    #[test]
    fn cancel_is_idempotent() {
        let token = CancellationToken::new();
        let child = token.child_token();
        child.cancel();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!token.is_cancelled());
        token.cancel();
        token.cancel();
        assert!(child.is_cancelled());
    }
}
