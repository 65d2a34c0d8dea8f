use std::io;

use thiserror::Error;

use super::Network;

/// Errors produced while obtaining a listener.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ListenerError {
    #[cfg(unix)]
    #[error("unable to retrieve systemd listeners: {0}")]
    Activation(#[from] crate::activation::ActivationError),

    #[error("unable to listen on {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("no listener configured")]
    NotConfigured,

    #[error("{0} listeners are not supported on this platform")]
    UnsupportedNetwork(Network),
}

impl ListenerError {
    pub fn as_label(&self) -> &'static str {
        match self {
            #[cfg(unix)]
            ListenerError::Activation(_) => "listener_activation",
            ListenerError::Bind { .. } => "listener_bind",
            ListenerError::NotConfigured => "listener_not_configured",
            ListenerError::UnsupportedNetwork(_) => "listener_unsupported_network",
        }
    }
}
