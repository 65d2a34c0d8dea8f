//! # OS signals as the root cancellation token.
//!
//! [`shutdown_token`] is the usual way a process obtains the token it hands to
//! [`run`](crate::run): the token is cancelled on the first termination signal.
//!
//! **Unix:** `SIGINT`, `SIGTERM`, `SIGQUIT` (plus [`tokio::signal::ctrl_c`]).
//! **Other platforms:** [`tokio::signal::ctrl_c`] only.

use tokio_util::sync::CancellationToken;
use tracing::info;

/// Waits for a termination signal.
///
/// Each call creates independent signal listeners.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    Signals::register()?.recv().await;
    Ok(())
}

/// Waits for a termination signal.
#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

/// Returns a token cancelled on the first termination signal.
///
/// Signal handlers are registered before this function returns, so registration
/// errors are reported here rather than lost in a background task.
/// Must be called from within a tokio runtime.
#[cfg(unix)]
pub fn shutdown_token() -> std::io::Result<CancellationToken> {
    let signals = Signals::register()?;
    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        tokio::select! {
            _ = signals.recv() => {
                info!("termination signal received; shutting down");
                trigger.cancel();
            }
            _ = trigger.cancelled() => {}
        }
    });
    Ok(token)
}

/// Returns a token cancelled on Ctrl-C.
#[cfg(not(unix))]
pub fn shutdown_token() -> std::io::Result<CancellationToken> {
    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                if res.is_ok() {
                    info!("termination signal received; shutting down");
                    trigger.cancel();
                }
            }
            _ = trigger.cancelled() => {}
        }
    });
    Ok(token)
}

#[cfg(unix)]
struct Signals {
    sigint: tokio::signal::unix::Signal,
    sigterm: tokio::signal::unix::Signal,
    sigquit: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    fn register() -> std::io::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};

        Ok(Self {
            sigint: signal(SignalKind::interrupt())?,
            sigterm: signal(SignalKind::terminate())?,
            sigquit: signal(SignalKind::quit())?,
        })
    }

    async fn recv(mut self) {
        tokio::select! {
            _ = self.sigint.recv()  => {},
            _ = self.sigterm.recv() => {},
            _ = self.sigquit.recv() => {},
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn token_is_live_until_signal() {
        let token = shutdown_token().expect("signal registration");
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }
}
