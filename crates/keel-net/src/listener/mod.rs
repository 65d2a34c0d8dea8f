//! # Listeners.
//!
//! [`Listener::bind`] is the listener factory: it turns a [`ListenerConfig`] into
//! one accepting socket, preferring an inherited (socket-activated) descriptor.
//!
//! ```text
//! socket_activation? ──yes──► acquire_listeners(unset_env) ──provided──► first listener
//!        │                                        │                      (others closed)
//!        no                                 not provided
//!        ▼                                        ▼
//! address? ──yes──► bind(network, address) ◄──────┘
//!        │
//!        no ──► ListenerError::NotConfigured
//! ```
//!
//! Accepted TCP streams get the configured keep-alive; with a TLS server
//! configuration the handshake is completed before the stream is handed out.

mod config;
mod error;

pub use config::{ListenerConfig, Network};
pub use error::ListenerError;

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, trace};

#[cfg(feature = "tls")]
const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

enum Inner {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

/// An accepting socket owned by exactly one serve session.
pub struct Listener {
    inner: Inner,
    keepalive: Option<Duration>,
    #[cfg(feature = "tls")]
    tls: Option<tokio_rustls::TlsAcceptor>,
}

impl Listener {
    pub fn from_tcp(listener: TcpListener) -> Self {
        Self::with_inner(Inner::Tcp(listener))
    }

    #[cfg(unix)]
    pub fn from_unix(listener: UnixListener) -> Self {
        Self::with_inner(Inner::Unix(listener))
    }

    fn with_inner(inner: Inner) -> Self {
        Self {
            inner,
            keepalive: None,
            #[cfg(feature = "tls")]
            tls: None,
        }
    }

    /// Builds the listener described by `cfg`.
    ///
    /// Must be called from within a tokio runtime.
    #[cfg(unix)]
    pub async fn bind(cfg: &ListenerConfig) -> Result<Self, ListenerError> {
        Self::bind_with(cfg, &crate::activation::Acquirer::new(true)).await
    }

    /// Builds the listener described by `cfg`.
    ///
    /// Must be called from within a tokio runtime.
    #[cfg(not(unix))]
    pub async fn bind(cfg: &ListenerConfig) -> Result<Self, ListenerError> {
        Self::finish_bind(cfg, None).await
    }

    /// [`bind`](Self::bind) with activated descriptors taken from `acquirer`.
    #[cfg(unix)]
    pub(crate) async fn bind_with(
        cfg: &ListenerConfig,
        acquirer: &crate::activation::Acquirer,
    ) -> Result<Self, ListenerError> {
        let activated = if cfg.socket_activation {
            first_activated(acquirer)?
        } else {
            None
        };
        Self::finish_bind(cfg, activated).await
    }

    async fn finish_bind(
        cfg: &ListenerConfig,
        activated: Option<Listener>,
    ) -> Result<Self, ListenerError> {
        let listener = match activated {
            Some(listener) => listener,
            None => match cfg.address.as_deref() {
                Some(address) => bind_address(cfg.network, address).await?,
                None => return Err(ListenerError::NotConfigured),
            },
        };

        let listener = listener.with_keepalive(cfg.keepalive());
        #[cfg(feature = "tls")]
        let listener = match &cfg.tls {
            Some(tls) if listener.network() == Network::Tcp => listener.with_tls(tls.clone()),
            _ => listener,
        };
        Ok(listener)
    }

    /// Keep-alive period applied to accepted TCP streams.
    pub fn with_keepalive(mut self, keepalive: Option<Duration>) -> Self {
        self.keepalive = keepalive;
        self
    }

    /// Terminate TLS on accepted streams.
    #[cfg(feature = "tls")]
    pub fn with_tls(mut self, tls: std::sync::Arc<rustls::ServerConfig>) -> Self {
        self.tls = Some(tokio_rustls::TlsAcceptor::from(tls));
        self
    }

    pub fn network(&self) -> Network {
        match self.inner {
            Inner::Tcp(_) => Network::Tcp,
            #[cfg(unix)]
            Inner::Unix(_) => Network::Unix,
        }
    }

    pub fn is_tls(&self) -> bool {
        #[cfg(feature = "tls")]
        {
            self.tls.is_some()
        }
        #[cfg(not(feature = "tls"))]
        {
            false
        }
    }

    pub fn local_addr(&self) -> io::Result<Address> {
        match &self.inner {
            Inner::Tcp(l) => l.local_addr().map(Address::Tcp),
            #[cfg(unix)]
            Inner::Unix(l) => Ok(Address::Unix(
                l.local_addr()?.as_pathname().map(|p| p.to_path_buf()),
            )),
        }
    }

    /// Accepts the next connection.
    ///
    /// A failed TLS handshake is reported as [`io::ErrorKind::ConnectionAborted`].
    pub async fn accept(&self) -> io::Result<(Stream, Address)> {
        match &self.inner {
            Inner::Tcp(l) => {
                let (stream, addr) = l.accept().await?;
                if let Some(period) = self.keepalive {
                    if let Err(e) = set_keepalive(&stream, period) {
                        trace!(%addr, error = %e, "unable to enable tcp keep-alive");
                    }
                }
                #[cfg(feature = "tls")]
                if let Some(acceptor) = &self.tls {
                    let stream = handshake(acceptor, stream).await?;
                    return Ok((Stream::Tls(Box::new(stream)), Address::Tcp(addr)));
                }
                Ok((Stream::Tcp(stream), Address::Tcp(addr)))
            }
            #[cfg(unix)]
            Inner::Unix(l) => {
                let (stream, addr) = l.accept().await?;
                let path = addr.as_pathname().map(|p| p.to_path_buf());
                Ok((Stream::Unix(stream), Address::Unix(path)))
            }
        }
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("network", &self.network())
            .field("local_addr", &self.local_addr().ok())
            .field("keepalive", &self.keepalive)
            .field("tls", &self.is_tls())
            .finish()
    }
}

#[cfg(unix)]
fn first_activated(
    acquirer: &crate::activation::Acquirer,
) -> Result<Option<Listener>, ListenerError> {
    let Some(listeners) = acquirer.listeners()? else {
        trace!("socket activation requested but not provided");
        return Ok(None);
    };

    let total = listeners.len();
    // only the first activated listener is served; the rest are closed here
    let first = listeners.into_iter().next();
    if let Some(listener) = &first {
        debug!(total, addr = ?listener.local_addr().ok(), "using socket-activated listener");
    }
    Ok(first)
}

async fn bind_address(network: Network, address: &str) -> Result<Listener, ListenerError> {
    let bind_err = |source| ListenerError::Bind {
        address: address.to_string(),
        source,
    };

    let listener = match network {
        Network::Tcp => Listener::from_tcp(TcpListener::bind(address).await.map_err(bind_err)?),
        #[cfg(unix)]
        Network::Unix => Listener::from_unix(UnixListener::bind(address).map_err(bind_err)?),
        #[cfg(not(unix))]
        Network::Unix => return Err(ListenerError::UnsupportedNetwork(network)),
    };
    debug!(%network, address, "listener bound");
    Ok(listener)
}

/// Idle time and probe interval both follow `period`.
fn set_keepalive(stream: &TcpStream, period: Duration) -> io::Result<()> {
    let params = TcpKeepalive::new().with_time(period);
    #[cfg(any(
        target_os = "linux",
        target_os = "android",
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "windows",
    ))]
    let params = params.with_interval(period);
    SockRef::from(stream).set_tcp_keepalive(&params)
}

#[cfg(feature = "tls")]
async fn handshake(
    acceptor: &tokio_rustls::TlsAcceptor,
    stream: TcpStream,
) -> io::Result<tokio_rustls::server::TlsStream<TcpStream>> {
    match tokio::time::timeout(TLS_HANDSHAKE_TIMEOUT, acceptor.accept(stream)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(io::Error::new(io::ErrorKind::ConnectionAborted, e)),
        Err(_) => Err(io::Error::new(
            io::ErrorKind::ConnectionAborted,
            "tls handshake timed out",
        )),
    }
}

/// Peer address of an accepted connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Tcp(SocketAddr),
    /// Path of the socket; `None` for unnamed peers.
    Unix(Option<PathBuf>),
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Tcp(addr) => write!(f, "{addr}"),
            Address::Unix(Some(path)) => write!(f, "{}", path.display()),
            Address::Unix(None) => f.write_str("@"),
        }
    }
}

/// An accepted connection.
#[derive(Debug)]
pub enum Stream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
    #[cfg(feature = "tls")]
    Tls(Box<tokio_rustls::server::TlsStream<TcpStream>>),
}

macro_rules! delegate {
    ($self:ident, $s:ident => $call:expr) => {
        match $self.get_mut() {
            Stream::Tcp($s) => $call,
            #[cfg(unix)]
            Stream::Unix($s) => $call,
            #[cfg(feature = "tls")]
            Stream::Tls($s) => $call,
        }
    };
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        delegate!(self, s => Pin::new(s).poll_read(cx, buf))
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        delegate!(self, s => Pin::new(s).poll_write(cx, buf))
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        delegate!(self, s => Pin::new(s).poll_write_vectored(cx, bufs))
    }

    fn is_write_vectored(&self) -> bool {
        match self {
            Stream::Tcp(s) => s.is_write_vectored(),
            #[cfg(unix)]
            Stream::Unix(s) => s.is_write_vectored(),
            #[cfg(feature = "tls")]
            Stream::Tls(s) => s.is_write_vectored(),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        delegate!(self, s => Pin::new(s).poll_flush(cx))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        delegate!(self, s => Pin::new(s).poll_shutdown(cx))
    }
}
