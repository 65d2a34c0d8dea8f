//! Serves a small axum router next to a heartbeat runner.
//!
//! Started by systemd with a `.socket` unit, the inherited socket is used;
//! otherwise the server binds `KEEL_HTTP_ADDR` (default `127.0.0.1:8080`).
//!
//! ```text
//! KEEL_HTTP_ADDR=127.0.0.1:8080 KEEL_LOG=debug KEEL_LOG_FORMAT=json cargo run -p http-server
//! ```

use std::time::Duration;

use anyhow::Context;
use axum::{Router, http::StatusCode, routing::get};
use keel_core::{BoxError, CancellationToken, RunFn};
use keel_http::listen_and_serve_http;
use keel_net::{ListenerConfig, ServeConfig};
use keel_observe::{LoggerConfig, LoggerFormat, logger_init};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut log = LoggerConfig::default();
    if let Ok(level) = std::env::var("KEEL_LOG") {
        log = log.with_level(level);
    }
    if let Ok(format) = std::env::var("KEEL_LOG_FORMAT") {
        log = log.with_format(format.parse::<LoggerFormat>()?);
    }
    logger_init(&log)?;

    let addr = std::env::var("KEEL_HTTP_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
    let listener = ListenerConfig::new()
        .with_socket_activation()
        .with_address(addr);

    let router = Router::new()
        .route("/", get(|| async { "hello from keel\n" }))
        .route("/healthz", get(|| async { StatusCode::NO_CONTENT }))
        .route("/teapot", get(|| async { StatusCode::IM_A_TEAPOT }));

    let http = listen_and_serve_http(
        router,
        listener,
        ServeConfig::new().with_graceful_timeout(Duration::from_secs(10)),
    );
    let heartbeat = RunFn::arc(|ctx: CancellationToken| async move {
        let mut tick = tokio::time::interval(Duration::from_secs(30));
        loop {
            tokio::select! {
                _ = ctx.cancelled() => return Ok::<(), BoxError>(()),
                _ = tick.tick() => info!("heartbeat"),
            }
        }
    });

    let ctx = keel_core::signal::shutdown_token().context("unable to register signal handlers")?;
    info!("service started");

    if let Err(e) = keel_core::run(&ctx, [http, heartbeat]).await {
        for runner in e.errors() {
            warn!(label = runner.as_label(), error = %runner, "runner stopped abnormally");
        }
        return Err(e.into());
    }
    info!("service stopped");
    Ok(())
}
