use std::fmt;
use std::time::Duration;

use serde::Deserialize;

/// Transport a listener binds to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Network {
    #[default]
    Tcp,
    Unix,
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Tcp => f.write_str("tcp"),
            Network::Unix => f.write_str("unix"),
        }
    }
}

/// Describes how [`Listener::bind`](crate::Listener::bind) obtains its listener.
///
/// Resolution order:
/// 1. `socket_activation` set and descriptors inherited → first activated listener;
/// 2. `address` set → freshly bound listener on `network`;
/// 3. otherwise → [`ListenerError::NotConfigured`](crate::ListenerError::NotConfigured).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListenerConfig {
    pub network: Network,
    /// `host:port` for TCP, a filesystem path for Unix sockets.
    pub address: Option<String>,
    /// TCP keep-alive period applied to accepted connections; `0` leaves the OS default.
    pub keepalive_ms: u64,
    /// Prefer sockets handed down by the init system.
    pub socket_activation: bool,
    #[cfg(feature = "tls")]
    #[serde(skip)]
    pub tls: Option<std::sync::Arc<rustls::ServerConfig>>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            network: Network::Tcp,
            address: None,
            keepalive_ms: 60_000,
            socket_activation: false,
            #[cfg(feature = "tls")]
            tls: None,
        }
    }
}

impl ListenerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a TCP listener on `address` (`host:port`).
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.network = Network::Tcp;
        self.address = Some(address.into());
        self
    }

    /// Bind a Unix-domain listener on `path`.
    pub fn with_unix_path(mut self, path: impl Into<String>) -> Self {
        self.network = Network::Unix;
        self.address = Some(path.into());
        self
    }

    pub fn with_keepalive_ms(mut self, keepalive_ms: u64) -> Self {
        self.keepalive_ms = keepalive_ms;
        self
    }

    pub fn without_keepalive(self) -> Self {
        self.with_keepalive_ms(0)
    }

    /// Use the first socket-activated listener when the init system provides one.
    pub fn with_socket_activation(mut self) -> Self {
        self.socket_activation = true;
        self
    }

    /// Terminate TLS on TCP listeners with the given server configuration.
    #[cfg(feature = "tls")]
    pub fn with_tls(mut self, tls: std::sync::Arc<rustls::ServerConfig>) -> Self {
        self.tls = Some(tls);
        self
    }

    #[inline]
    pub fn keepalive(&self) -> Option<Duration> {
        (self.keepalive_ms > 0).then(|| Duration::from_millis(self.keepalive_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = ListenerConfig::default();
        assert_eq!(cfg.network, Network::Tcp);
        assert!(cfg.address.is_none());
        assert!(!cfg.socket_activation);
        assert_eq!(cfg.keepalive(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn builders() {
        let cfg = ListenerConfig::new()
            .with_unix_path("/run/app.sock")
            .without_keepalive()
            .with_socket_activation();
        assert_eq!(cfg.network, Network::Unix);
        assert_eq!(cfg.address.as_deref(), Some("/run/app.sock"));
        assert_eq!(cfg.keepalive(), None);
        assert!(cfg.socket_activation);
    }

    #[test]
    fn deserialize_partial() {
        let cfg: ListenerConfig =
            serde_json::from_str(r#"{"address":"127.0.0.1:8080","socketActivation":true}"#)
                .unwrap();
        assert_eq!(cfg.network, Network::Tcp);
        assert_eq!(cfg.address.as_deref(), Some("127.0.0.1:8080"));
        assert!(cfg.socket_activation);
        assert_eq!(cfg.keepalive_ms, 60_000);

        let unix: ListenerConfig =
            serde_json::from_str(r#"{"network":"unix","address":"/tmp/s","keepaliveMs":0}"#).unwrap();
        assert_eq!(unix.network, Network::Unix);
        assert_eq!(unix.keepalive(), None);
    }

    #[test]
    fn network_display() {
        assert_eq!(Network::Tcp.to_string(), "tcp");
        assert_eq!(Network::Unix.to_string(), "unix");
    }
}
