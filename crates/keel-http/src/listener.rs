use std::io;
use std::time::Duration;

use keel_net::{Address, Listener, Stream};
use tracing::{debug, trace};

const ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

/// Adapts a [`Listener`] to `axum::serve`.
///
/// Accept errors never end the accept loop: per-connection failures are skipped,
/// anything else (e.g. descriptor exhaustion) is retried after a short pause.
pub(crate) struct HttpListener(Listener);

impl HttpListener {
    pub(crate) fn new(listener: Listener) -> Self {
        Self(listener)
    }
}

impl axum::serve::Listener for HttpListener {
    type Io = Stream;
    type Addr = Address;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        loop {
            match self.0.accept().await {
                Ok(conn) => return conn,
                Err(e) if is_connection_error(&e) => {
                    trace!(error = %e, "connection dropped during accept");
                }
                Err(e) => {
                    debug!(error = %e, backoff = ?ACCEPT_BACKOFF, "accept failed; retrying");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        self.0.local_addr()
    }
}

fn is_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    )
}
