//! # keel-net
//!
//! Listeners and the graceful serve protocol for [`keel_core`] runners.
//!
//! ```text
//! ListenerConfig ──► Listener::bind ──► Listener ─┐
//!  (activation | address)                         ├─► serve(server, listener, ServeConfig) ─► RunnerRef
//!                                      Server ────┘
//! ```
//!
//! - [`Listener::bind`] prefers socket-activated descriptors (see [`activation`]).
//! - [`serve`] runs the accept loop until the runner context is cancelled, then shuts
//!   the server down within the configured graceful timeout.

mod deadline;
pub use deadline::Deadline;

mod listener;
pub use listener::{Address, Listener, ListenerConfig, ListenerError, Network, Stream};

mod server;
pub use server::Server;

mod serve;
pub use serve::{
    DEFAULT_GRACEFUL_TIMEOUT, ErrorTransformer, ServeConfig, ServeError, listen_and_serve, serve,
};

#[cfg(unix)]
pub mod activation;

#[cfg(feature = "tls")]
pub mod tls;

#[cfg(all(test, unix))]
mod testenv;

pub mod prelude {
    pub use crate::{
        Deadline, Listener, ListenerConfig, Network, ServeConfig, Server, listen_and_serve, serve,
    };
}
