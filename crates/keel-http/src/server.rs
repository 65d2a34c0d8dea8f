//! # HTTP server driven by the serve protocol.
//!
//! ```text
//! serve(listener) ── axum::serve(..).with_graceful_shutdown(graceful) ──┐
//!                                                                        ├─ returns ServerClosed once shutdown began
//! shutdown(deadline) ─ cancel graceful ─ wait for every serve to end ────┘
//!                          │
//!                          └─ deadline first ─► cancel force (drop accept loops) ─► ShutdownDeadline
//! ```
//!
//! ## Rules
//! - After `shutdown` was called, `serve` refuses to start and returns [`HttpError::ServerClosed`].
//! - `shutdown` with no running `serve` completes immediately.
//! - In-flight handlers left behind by a forced stop finish on their own tasks.

use std::future::IntoFuture;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use keel_core::{BoxError, CancellationToken, RunnerRef};
use keel_net::{Deadline, Listener, ListenerConfig, ServeConfig, Server};
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::error::HttpError;
use crate::listener::HttpListener;

pub struct HttpServer {
    router: Router,
    graceful: CancellationToken,
    force: CancellationToken,
    active: watch::Sender<usize>,
}

impl HttpServer {
    pub fn new(router: Router) -> Self {
        Self {
            router,
            graceful: CancellationToken::new(),
            force: CancellationToken::new(),
            active: watch::Sender::new(0),
        }
    }

    /// Whether shutdown was requested.
    pub fn is_closed(&self) -> bool {
        self.graceful.is_cancelled()
    }

    async fn serve_listener(&self, listener: Listener) -> Result<(), HttpError> {
        if self.is_closed() {
            return Err(HttpError::ServerClosed);
        }
        let _active = ActiveGuard::enter(&self.active);
        debug!(addr = ?listener.local_addr().ok(), tls = listener.is_tls(), "http server accepting");

        let app = axum::serve(HttpListener::new(listener), self.router.clone())
            .with_graceful_shutdown(self.graceful.clone().cancelled_owned());

        tokio::select! {
            res = app.into_future() => res?,
            _ = self.force.cancelled() => {
                trace!("accept loop dropped after shutdown deadline");
            }
        }

        if self.is_closed() {
            return Err(HttpError::ServerClosed);
        }
        Ok(())
    }

    async fn shutdown_within(&self, deadline: Deadline) -> Result<(), HttpError> {
        self.graceful.cancel();
        let mut active = self.active.subscribe();

        tokio::select! {
            _ = async { active.wait_for(|n| *n == 0).await.is_ok() } => {
                trace!("http server drained");
                Ok(())
            }
            _ = deadline.elapsed() => {
                self.force.cancel();
                Err(HttpError::ShutdownDeadline)
            }
        }
    }
}

#[async_trait]
impl Server for HttpServer {
    async fn serve(&self, listener: Listener) -> Result<(), BoxError> {
        Ok(self.serve_listener(listener).await?)
    }

    async fn shutdown(&self, deadline: Deadline) -> Result<(), BoxError> {
        Ok(self.shutdown_within(deadline).await?)
    }
}

struct ActiveGuard<'a>(&'a watch::Sender<usize>);

impl<'a> ActiveGuard<'a> {
    fn enter(active: &'a watch::Sender<usize>) -> Self {
        active.send_modify(|n| *n += 1);
        Self(active)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n -= 1);
    }
}

/// [`keel_net::serve`] with [`HttpError::ServerClosed`] folded into success.
pub fn serve_http(server: Arc<HttpServer>, listener: Listener, cfg: ServeConfig) -> RunnerRef {
    keel_net::serve(server, listener, fold_server_closed(cfg))
}

/// Binds `listener` when the runner starts and serves `router` on it.
pub fn listen_and_serve_http(router: Router, listener: ListenerConfig, cfg: ServeConfig) -> RunnerRef {
    keel_net::listen_and_serve(
        Arc::new(HttpServer::new(router)),
        listener,
        fold_server_closed(cfg),
    )
}

fn fold_server_closed(cfg: ServeConfig) -> ServeConfig {
    let next = Arc::clone(&cfg.serve_error_transformer);
    cfg.with_serve_error_transformer(move |e| {
        if matches!(e.downcast_ref::<HttpError>(), Some(HttpError::ServerClosed)) {
            None
        } else {
            next(e)
        }
    })
}
