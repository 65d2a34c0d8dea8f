//! # keel-http
//!
//! [`axum`] routers served through the keel serve protocol.
//!
//! ```text
//! Router ─► HttpServer ─► serve_http(server, listener, cfg) ─► RunnerRef ─► keel_core::run
//! ```

mod error;
pub use error::HttpError;

mod listener;

mod server;
pub use server::{HttpServer, listen_and_serve_http, serve_http};

pub use axum;

pub mod prelude {
    pub use crate::{HttpError, HttpServer, listen_and_serve_http, serve_http};
}
