//! # Socket activation.
//!
//! Reconstructs listening sockets handed down by an init system
//! (<https://www.freedesktop.org/software/systemd/man/latest/sd_listen_fds.html>).
//!
//! ```text
//! LISTEN_PID=<pid>      descriptors are meant for this process only
//! LISTEN_FDS=<n>        descriptors 3 .. 3+n are inherited
//! LISTEN_FDNAMES=a:b:…  optional, one name per descriptor
//! ```
//!
//! ## Rules
//! - Variables absent → not provided (`Ok(None)`), nothing touched.
//! - Variables malformed → error before any descriptor is touched.
//! - `unset_env` removes the three variables on every return path, so children
//!   spawned later do not inherit them. This mutates process-global state and is
//!   not safe to race with a second acquisition in the same process.
//! - Every acquired descriptor is marked close-on-exec.
//! - Listener conversion is all-or-nothing: on the first failure every descriptor
//!   and listener already opened is closed.

use std::ffi::OsString;
use std::io;
use std::num::ParseIntError;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

use socket2::{Domain, Socket, Type};
use thiserror::Error;
use tracing::{debug, trace};

use crate::listener::Listener;

/// First descriptor number used by the protocol (`SD_LISTEN_FDS_START`).
pub const LISTEN_FDS_START: RawFd = 3;
pub const LISTEN_PID: &str = "LISTEN_PID";
pub const LISTEN_FDS: &str = "LISTEN_FDS";
pub const LISTEN_FDNAMES: &str = "LISTEN_FDNAMES";

#[derive(Debug, Error)]
pub enum ActivationError {
    #[error("invalid env {key} format, expected integer: {source}")]
    InvalidFormat {
        key: &'static str,
        #[source]
        source: ParseIntError,
    },

    #[error("LISTEN_PID returned an unexpected pid ({current} != {expected})")]
    UnexpectedPid { current: u32, expected: i64 },

    #[error("invalid env LISTEN_FDS value, {count} descriptors exceed the limit of {max}")]
    TooManyDescriptors { count: usize, max: usize },

    #[error("unexpected number of fds names ({names} != {fds})")]
    NamesMismatch { names: usize, fds: usize },

    #[error("invalid file descriptor {fd} for {name}")]
    InvalidDescriptor { fd: RawFd, name: String },

    #[error("unable to set close-on-exec on file descriptor {name}: {source}")]
    CloseOnExec {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("unable to create listener from file descriptor {name}: {source}")]
    Listener {
        name: String,
        #[source]
        source: io::Error,
    },
}

/// An inherited descriptor and its protocol name. Closed on drop.
#[derive(Debug)]
pub struct Descriptor {
    fd: OwnedFd,
    name: String,
}

impl Descriptor {
    /// Explicit name from `LISTEN_FDNAMES`, or `LISTEN_FD_<n>`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn into_owned_fd(self) -> OwnedFd {
        self.fd
    }

    /// Converts the descriptor into a listener; the descriptor is consumed either way.
    ///
    /// Must be called from within a tokio runtime.
    pub fn into_listener(self) -> Result<Listener, ActivationError> {
        let Descriptor { fd, name } = self;
        socket_listener(Socket::from(fd)).map_err(|source| ActivationError::Listener { name, source })
    }
}

impl AsFd for Descriptor {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for Descriptor {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

type Remap = Box<dyn Fn(RawFd) -> RawFd + Send + Sync>;

/// Reads the activation environment and takes ownership of the inherited descriptors.
///
/// The descriptor numbering is resolved through an injected mapping, identity by default.
pub struct Acquirer {
    unset_env: bool,
    remap: Remap,
}

impl Acquirer {
    pub fn new(unset_env: bool) -> Self {
        Self {
            unset_env,
            remap: Box::new(|fd| fd),
        }
    }

    /// Replaces the protocol descriptor number (`3 + i`) by `remap(3 + i)`.
    pub fn with_remap<F>(mut self, remap: F) -> Self
    where
        F: Fn(RawFd) -> RawFd + Send + Sync + 'static,
    {
        self.remap = Box::new(remap);
        self
    }

    /// Returns `Ok(None)` when activation was not requested by the environment.
    pub fn descriptors(&self) -> Result<Option<Vec<Descriptor>>, ActivationError> {
        let _cleanup = self.unset_env.then(|| EnvCleanup);

        let (Some(raw_pid), Some(raw_fds)) = (lookup(LISTEN_PID), lookup(LISTEN_FDS)) else {
            trace!("socket activation not requested");
            return Ok(None);
        };

        let expected = parse_int::<i64>(LISTEN_PID, &raw_pid)?;
        let current = std::process::id();
        if expected != i64::from(current) {
            return Err(ActivationError::UnexpectedPid { current, expected });
        }

        let count = parse_int::<usize>(LISTEN_FDS, &raw_fds)?;
        let max = descriptor_limit();
        if count > max {
            return Err(ActivationError::TooManyDescriptors { count, max });
        }
        let names = descriptor_names(lookup(LISTEN_FDNAMES), count)?;

        let numbered: Vec<(RawFd, String)> = names
            .into_iter()
            .enumerate()
            .map(|(i, name)| ((self.remap)(LISTEN_FDS_START + i as RawFd), name))
            .collect();
        if let Some((fd, name)) = numbered.iter().find(|(fd, _)| *fd < 0) {
            return Err(ActivationError::InvalidDescriptor {
                fd: *fd,
                name: name.clone(),
            });
        }

        let mut descriptors = Vec::with_capacity(count);
        for (fd, name) in numbered {
            if let Err(source) = set_cloexec(fd) {
                // descriptors taken so far are closed when `descriptors` drops
                return Err(ActivationError::CloseOnExec { name, source });
            }
            // SAFETY: the activation protocol hands these descriptors to this process,
            // which becomes their sole owner; the fd was just checked to be open.
            let fd = unsafe { OwnedFd::from_raw_fd(fd) };
            trace!(fd = fd.as_raw_fd(), %name, "descriptor acquired");
            descriptors.push(Descriptor { fd, name });
        }

        debug!(count = descriptors.len(), "socket activation descriptors acquired");
        Ok(Some(descriptors))
    }

    /// Converts every descriptor into a listener, preserving order.
    ///
    /// Must be called from within a tokio runtime.
    pub fn listeners(&self) -> Result<Option<Vec<Listener>>, ActivationError> {
        let Some(descriptors) = self.descriptors()? else {
            return Ok(None);
        };

        let mut listeners = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            // on error the remaining descriptors and `listeners` drop, closing them all
            listeners.push(descriptor.into_listener()?);
        }
        Ok(Some(listeners))
    }
}

impl Default for Acquirer {
    fn default() -> Self {
        Self::new(false)
    }
}

/// Shortcut for `Acquirer::new(unset_env).descriptors()`.
pub fn acquire_descriptors(unset_env: bool) -> Result<Option<Vec<Descriptor>>, ActivationError> {
    Acquirer::new(unset_env).descriptors()
}

/// Shortcut for `Acquirer::new(unset_env).listeners()`.
pub fn acquire_listeners(unset_env: bool) -> Result<Option<Vec<Listener>>, ActivationError> {
    Acquirer::new(unset_env).listeners()
}

struct EnvCleanup;

impl Drop for EnvCleanup {
    fn drop(&mut self) {
        for key in [LISTEN_FDS, LISTEN_PID, LISTEN_FDNAMES] {
            // SAFETY: documented as a one-time mutation of process state that must not
            // race with another acquisition or environment access.
            unsafe { std::env::remove_var(key) };
        }
        trace!("socket activation environment removed");
    }
}

fn lookup(key: &str) -> Option<String> {
    std::env::var_os(key).map(|v: OsString| v.to_string_lossy().into_owned())
}

fn parse_int<T>(key: &'static str, raw: &str) -> Result<T, ActivationError>
where
    T: std::str::FromStr<Err = ParseIntError>,
{
    raw.trim()
        .parse::<T>()
        .map_err(|source| ActivationError::InvalidFormat { key, source })
}

fn descriptor_names(raw: Option<String>, count: usize) -> Result<Vec<String>, ActivationError> {
    let mut names: Vec<String> = match raw {
        Some(raw) => raw.split(':').map(str::to_string).collect(),
        None => vec![String::new(); count],
    };
    if names.len() != count {
        return Err(ActivationError::NamesMismatch {
            names: names.len(),
            fds: count,
        });
    }
    for (i, name) in names.iter_mut().enumerate() {
        if name.is_empty() {
            *name = format!("LISTEN_FD_{}", LISTEN_FDS_START + i as RawFd);
        }
    }
    Ok(names)
}

/// Upper bound on `LISTEN_FDS`: descriptors past the hard `RLIMIT_NOFILE`
/// (or past `RawFd::MAX`) cannot have been inherited.
fn descriptor_limit() -> usize {
    let ceiling = (RawFd::MAX - LISTEN_FDS_START) as usize;
    let mut limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: getrlimit only writes into `limit`.
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) } != 0
        || limit.rlim_max == libc::RLIM_INFINITY
    {
        return ceiling;
    }
    usize::try_from(limit.rlim_max).map_or(ceiling, |hard| hard.min(ceiling))
}

fn set_cloexec(fd: RawFd) -> io::Result<()> {
    // SAFETY: fcntl with F_GETFD/F_SETFD only reads and writes descriptor flags.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFD);
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

fn socket_listener(socket: Socket) -> io::Result<Listener> {
    if socket.r#type()? != Type::STREAM {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "not a stream socket",
        ));
    }
    let domain = socket.local_addr()?.domain();
    socket.set_nonblocking(true)?;

    if domain == Domain::UNIX {
        let std_listener: std::os::unix::net::UnixListener = socket.into();
        Ok(Listener::from_unix(tokio::net::UnixListener::from_std(std_listener)?))
    } else {
        let std_listener: std::net::TcpListener = socket.into();
        Ok(Listener::from_tcp(tokio::net::TcpListener::from_std(std_listener)?))
    }
}
