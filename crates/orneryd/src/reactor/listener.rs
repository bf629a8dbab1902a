//! Listener socket setup.
//!
//! Sockets are created through `nix` so the reactor controls every flag:
//! non-blocking and close-on-exec from birth, address reuse on TCP, and a
//! short accept backlog. Once configured they are handed to the standard
//! library listener types for accepting.

use std::fs;
use std::io;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::os::unix::fs::FileTypeExt;
use std::os::unix::net::UnixListener;

use camino::Utf8Path;
use nix::sys::socket::{
    self, AddressFamily, Backlog, SockFlag, SockType, SockaddrIn, SockaddrIn6, UnixAddr, sockopt,
};
use tracing::{info, warn};

use ornery_config::SocketEndpoint;

use crate::handlers::{Connection, ConnectionStream, PeerAddr};
use crate::registry::ListenerSpec;

use super::errors::ReactorError;
use super::REACTOR_TARGET;

/// Accept queue depth. Deliberately short: the fixture serves test clients,
/// not production load.
const LISTEN_BACKLOG: i32 = 5;

enum ListenerSocket {
    Tcp(TcpListener),
    Unix(UnixListener),
}

/// A listener bound to its endpoint, paired with the spec that produced it.
pub(crate) struct BoundListener {
    spec: ListenerSpec,
    socket: ListenerSocket,
}

impl BoundListener {
    /// Binds the listener described by `spec`. Fails rather than degrade: a
    /// listener that cannot bind leaves the whole fixture unusable.
    pub(crate) fn bind(spec: ListenerSpec) -> Result<Self, ReactorError> {
        let socket = match &spec.endpoint {
            SocketEndpoint::Tcp { host, port } => {
                ListenerSocket::Tcp(bind_tcp(&spec.endpoint, host, *port)?)
            }
            SocketEndpoint::Unix { path } => {
                ListenerSocket::Unix(bind_unix(&spec.endpoint, path)?)
            }
        };
        info!(
            target: REACTOR_TARGET,
            listener = %spec.name,
            handler = %spec.handler,
            endpoint = %spec.endpoint,
            "listener bound"
        );
        Ok(Self { spec, socket })
    }

    pub(crate) fn spec(&self) -> &ListenerSpec {
        &self.spec
    }

    /// Local address, for TCP listeners bound to an ephemeral port.
    pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
        match &self.socket {
            ListenerSocket::Tcp(listener) => listener.local_addr().ok(),
            ListenerSocket::Unix(_) => None,
        }
    }

    /// Accepts one pending connection, if any. `Ok(None)` means the
    /// readiness report raced with another accept and nothing is queued.
    /// Accepted streams are switched back to blocking mode; only the
    /// listener itself must never block.
    pub(crate) fn accept(&self) -> io::Result<Option<Connection>> {
        match &self.socket {
            ListenerSocket::Tcp(listener) => match listener.accept() {
                Ok((stream, peer)) => {
                    stream.set_nonblocking(false)?;
                    Ok(Some(Connection {
                        stream: ConnectionStream::Tcp(stream),
                        peer: PeerAddr::Tcp(peer),
                    }))
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(None),
                Err(error) => Err(error),
            },
            ListenerSocket::Unix(listener) => match listener.accept() {
                Ok((stream, _peer)) => {
                    stream.set_nonblocking(false)?;
                    Ok(Some(Connection {
                        stream: ConnectionStream::Unix(stream),
                        peer: PeerAddr::Unix,
                    }))
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(None),
                Err(error) => Err(error),
            },
        }
    }
}

impl AsFd for BoundListener {
    fn as_fd(&self) -> BorrowedFd<'_> {
        match &self.socket {
            ListenerSocket::Tcp(listener) => listener.as_fd(),
            ListenerSocket::Unix(listener) => listener.as_fd(),
        }
    }
}

impl Drop for BoundListener {
    fn drop(&mut self) {
        let Some(path) = self.spec.endpoint.unix_path() else {
            return;
        };
        if let Err(error) = fs::remove_file(path.as_std_path())
            && error.kind() != io::ErrorKind::NotFound
        {
            warn!(
                target: REACTOR_TARGET,
                listener = %self.spec.name,
                path = %path,
                error = %error,
                "failed to remove socket file on shutdown"
            );
        }
    }
}

/// Creates a non-blocking, close-on-exec stream socket with address reuse
/// armed. `SO_REUSEADDR` is meaningless for unix sockets but is set on every
/// family so all listeners get identical setup.
fn new_stream_socket(
    endpoint: &SocketEndpoint,
    family: AddressFamily,
) -> Result<OwnedFd, ReactorError> {
    let fd = socket::socket(
        family,
        SockType::Stream,
        SockFlag::SOCK_NONBLOCK | SockFlag::SOCK_CLOEXEC,
        None,
    )
    .map_err(|source| ReactorError::Socket {
        endpoint: endpoint.clone(),
        source,
    })?;
    socket::setsockopt(&fd, sockopt::ReuseAddr, &true).map_err(|source| {
        ReactorError::SocketOption {
            endpoint: endpoint.clone(),
            source,
        }
    })?;
    Ok(fd)
}

fn finish_listen(endpoint: &SocketEndpoint, fd: &OwnedFd) -> Result<(), ReactorError> {
    let backlog = Backlog::new(LISTEN_BACKLOG).map_err(|source| ReactorError::Listen {
        endpoint: endpoint.clone(),
        source,
    })?;
    socket::listen(fd, backlog).map_err(|source| ReactorError::Listen {
        endpoint: endpoint.clone(),
        source,
    })
}

fn bind_tcp(
    endpoint: &SocketEndpoint,
    host: &str,
    port: u16,
) -> Result<TcpListener, ReactorError> {
    let mut addrs = (host, port)
        .to_socket_addrs()
        .map_err(|source| ReactorError::Resolve {
            host: host.to_owned(),
            port,
            source,
        })?;
    let addr = addrs.next().ok_or_else(|| ReactorError::ResolveEmpty {
        host: host.to_owned(),
        port,
    })?;

    let family = match addr {
        SocketAddr::V4(_) => AddressFamily::Inet,
        SocketAddr::V6(_) => AddressFamily::Inet6,
    };
    let fd = new_stream_socket(endpoint, family)?;
    let bound = match addr {
        SocketAddr::V4(v4) => socket::bind(fd.as_raw_fd(), &SockaddrIn::from(v4)),
        SocketAddr::V6(v6) => socket::bind(fd.as_raw_fd(), &SockaddrIn6::from(v6)),
    };
    bound.map_err(|source| ReactorError::Bind {
        endpoint: endpoint.clone(),
        source,
    })?;
    finish_listen(endpoint, &fd)?;
    Ok(TcpListener::from(fd))
}

fn bind_unix(endpoint: &SocketEndpoint, path: &Utf8Path) -> Result<UnixListener, ReactorError> {
    endpoint
        .prepare_filesystem()
        .map_err(|source| ReactorError::SocketDirectory {
            endpoint: endpoint.clone(),
            source,
        })?;
    clear_stale_socket(path)?;

    let fd = new_stream_socket(endpoint, AddressFamily::Unix)?;
    let addr = UnixAddr::new(path.as_std_path()).map_err(|source| ReactorError::Bind {
        endpoint: endpoint.clone(),
        source,
    })?;
    socket::bind(fd.as_raw_fd(), &addr).map_err(|source| ReactorError::Bind {
        endpoint: endpoint.clone(),
        source,
    })?;
    finish_listen(endpoint, &fd)?;
    Ok(UnixListener::from(fd))
}

/// Removes a leftover socket file from an earlier run. Anything at the path
/// that is not a socket is someone else's file and is left alone.
fn clear_stale_socket(path: &Utf8Path) -> Result<(), ReactorError> {
    let metadata = match fs::symlink_metadata(path.as_std_path()) {
        Ok(metadata) => metadata,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(source) => {
            return Err(ReactorError::SocketMetadata {
                path: path.to_owned(),
                source,
            });
        }
    };
    if !metadata.file_type().is_socket() {
        return Err(ReactorError::NotSocket {
            path: path.to_owned(),
        });
    }
    warn!(
        target: REACTOR_TARGET,
        path = %path,
        "removing stale socket from a previous run"
    );
    fs::remove_file(path.as_std_path()).map_err(|source| ReactorError::StaleSocket {
        path: path.to_owned(),
        source,
    })
}
