//! # Graceful serve.
//!
//! [`serve`] turns a [`Server`] and its [`Listener`] into a [`Runner`]:
//!
//! ```text
//! run(ctx) ─► spawn accept loop ─► select!
//!                                   ├─ accept loop finished ─► its outcome, as is (terminal)
//!                                   └─ ctx cancelled
//!                                        ▼
//!                                 shutdown(deadline) ─► drain accept loop
//!                                        ▼
//!                      shutdown err? ─yes─► Shutdown { source, serve: drained err }
//!                                   └─no──► drained err | Ok
//! ```
//!
//! ## Rules
//! - The accept loop finishing before `ctx` is cancelled is returned right away, so the
//!   supervisor classifies it as an unexpected return.
//! - The accept-loop outcome is always drained, even when shutdown fails.
//! - `graceful_timeout` bounds only the shutdown call; `None` or zero means unbounded.
//! - Transformers see every raw error first; returning `None` folds it into success.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use keel_core::{BoxError, CancellationToken, Runner, RunnerRef};
use thiserror::Error;
use tokio::task::JoinError;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, trace};

use crate::{Deadline, Listener, ListenerConfig, ListenerError, Server};

/// Maps a raw error; `None` means "not an error".
pub type ErrorTransformer = Arc<dyn Fn(BoxError) -> Option<BoxError> + Send + Sync>;

/// Graceful timeout used when none is configured.
pub const DEFAULT_GRACEFUL_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Clone)]
pub struct ServeConfig {
    /// Bound on the shutdown call; `None` or zero waits indefinitely.
    pub graceful_timeout: Option<Duration>,
    pub serve_error_transformer: ErrorTransformer,
    pub shutdown_error_transformer: ErrorTransformer,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            graceful_timeout: Some(DEFAULT_GRACEFUL_TIMEOUT),
            serve_error_transformer: Arc::new(Some::<BoxError>),
            shutdown_error_transformer: Arc::new(Some::<BoxError>),
        }
    }
}

impl fmt::Debug for ServeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServeConfig")
            .field("graceful_timeout", &self.graceful_timeout)
            .finish_non_exhaustive()
    }
}

impl ServeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_graceful_timeout(mut self, timeout: Duration) -> Self {
        self.graceful_timeout = Some(timeout);
        self
    }

    pub fn without_graceful_timeout(mut self) -> Self {
        self.graceful_timeout = None;
        self
    }

    pub fn with_serve_error_transformer<F>(mut self, f: F) -> Self
    where
        F: Fn(BoxError) -> Option<BoxError> + Send + Sync + 'static,
    {
        self.serve_error_transformer = Arc::new(f);
        self
    }

    pub fn with_shutdown_error_transformer<F>(mut self, f: F) -> Self
    where
        F: Fn(BoxError) -> Option<BoxError> + Send + Sync + 'static,
    {
        self.shutdown_error_transformer = Arc::new(f);
        self
    }

    fn deadline(&self) -> Deadline {
        Deadline::from_timeout(self.graceful_timeout)
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ServeError {
    #[error(transparent)]
    Listen(#[from] ListenerError),

    #[error("unable to serve listener: {0}")]
    Serve(#[source] BoxError),

    #[error("unable to shut server down: {source}{}", describe_drained(.serve))]
    Shutdown {
        #[source]
        source: BoxError,
        /// Accept-loop error drained after the failed shutdown.
        serve: Option<BoxError>,
    },

    #[error("listener already served")]
    AlreadyServed,
}

impl ServeError {
    pub fn as_label(&self) -> &'static str {
        match self {
            ServeError::Listen(e) => e.as_label(),
            ServeError::Serve(_) => "serve_failed",
            ServeError::Shutdown { .. } => "serve_shutdown_failed",
            ServeError::AlreadyServed => "serve_already_served",
        }
    }
}

fn describe_drained(serve: &Option<BoxError>) -> String {
    match serve {
        Some(e) => format!("; unable to serve listener: {e}"),
        None => String::new(),
    }
}

/// Runner serving `listener` with `server` until cancelled.
///
/// The runner is single-use: a second `run` fails with [`ServeError::AlreadyServed`].
pub fn serve<S: Server>(server: Arc<S>, listener: Listener, cfg: ServeConfig) -> RunnerRef {
    Arc::new(ServeRunner {
        server,
        source: Mutex::new(Some(Source::Ready(listener))),
        cfg,
    })
}

/// Like [`serve`], but the listener is obtained through
/// [`Listener::bind`] when the runner starts.
pub fn listen_and_serve<S: Server>(
    server: Arc<S>,
    listener: ListenerConfig,
    cfg: ServeConfig,
) -> RunnerRef {
    Arc::new(ServeRunner {
        server,
        source: Mutex::new(Some(Source::Config(listener))),
        cfg,
    })
}

enum Source {
    Ready(Listener),
    Config(ListenerConfig),
}

struct ServeRunner<S> {
    server: Arc<S>,
    source: Mutex<Option<Source>>,
    cfg: ServeConfig,
}

impl<S: Server> ServeRunner<S> {
    async fn listener(&self) -> Result<Listener, ServeError> {
        let source = self
            .source
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match source {
            Some(Source::Ready(listener)) => Ok(listener),
            Some(Source::Config(cfg)) => Ok(Listener::bind(&cfg).await?),
            None => Err(ServeError::AlreadyServed),
        }
    }

    async fn session(&self, listener: Listener, ctx: CancellationToken) -> Result<(), ServeError> {
        let server = Arc::clone(&self.server);
        let mut accept = AbortOnDropHandle::new(tokio::spawn(async move {
            server.serve(listener).await
        }));
        trace!("accept loop started");

        tokio::select! {
            biased;
            res = &mut accept => {
                debug!("accept loop returned before shutdown");
                return match self.transform_serve(res) {
                    Some(e) => Err(ServeError::Serve(e)),
                    None => Ok(()),
                };
            }
            _ = ctx.cancelled() => {}
        }

        let deadline = self.cfg.deadline();
        debug!(timeout = ?deadline.remaining(), "shutting server down");
        let shutdown = self
            .server
            .shutdown(deadline)
            .await
            .err()
            .and_then(|e| (self.cfg.shutdown_error_transformer)(e));
        let served = self.transform_serve(accept.await);
        trace!(shutdown_failed = shutdown.is_some(), "accept loop drained");

        match (shutdown, served) {
            (Some(source), serve) => Err(ServeError::Shutdown { source, serve }),
            (None, Some(e)) => Err(ServeError::Serve(e)),
            (None, None) => Ok(()),
        }
    }

    fn transform_serve(&self, res: Result<Result<(), BoxError>, JoinError>) -> Option<BoxError> {
        let err = match res {
            Ok(Ok(())) => return None,
            Ok(Err(e)) => e,
            Err(e) => join_error(e),
        };
        (self.cfg.serve_error_transformer)(err)
    }
}

#[async_trait]
impl<S: Server> Runner for ServeRunner<S> {
    async fn run(&self, ctx: CancellationToken) -> Result<(), BoxError> {
        let listener = self.listener().await?;
        self.session(listener, ctx).await.map_err(Into::into)
    }
}

fn join_error(e: JoinError) -> BoxError {
    if !e.is_panic() {
        return e.into();
    }
    let payload = e.into_panic();
    let msg = payload
        .downcast_ref::<&'static str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("accept loop panicked: {msg}").into()
}
