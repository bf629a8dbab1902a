//! Reactor failure modes.

use std::io;

use camino::Utf8PathBuf;
use nix::errno::Errno;

use ornery_config::{SocketEndpoint, SocketPreparationError};

use thiserror::Error;

/// Errors raised while binding listeners or running the poll loop.
///
/// Setup errors are fatal: a fixture that silently dropped one of its
/// configured listeners would invalidate whatever test it backs.
#[derive(Debug, Error)]
pub enum ReactorError {
    /// A configured TCP host did not resolve.
    #[error("failed to resolve '{host}:{port}': {source}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
    /// Resolution succeeded but produced no addresses.
    #[error("'{host}:{port}' resolved to no addresses")]
    ResolveEmpty { host: String, port: u16 },
    /// Creating the listening socket failed.
    #[error("failed to create socket for {endpoint}: {source}")]
    Socket {
        endpoint: SocketEndpoint,
        #[source]
        source: Errno,
    },
    /// Setting a socket option failed.
    #[error("failed to configure socket for {endpoint}: {source}")]
    SocketOption {
        endpoint: SocketEndpoint,
        #[source]
        source: Errno,
    },
    /// The unix socket's parent directory could not be prepared.
    #[error("failed to prepare directory for {endpoint}: {source}")]
    SocketDirectory {
        endpoint: SocketEndpoint,
        #[source]
        source: SocketPreparationError,
    },
    /// Binding the socket failed.
    #[error("failed to bind {endpoint}: {source}")]
    Bind {
        endpoint: SocketEndpoint,
        #[source]
        source: Errno,
    },
    /// Marking the socket as listening failed.
    #[error("failed to listen on {endpoint}: {source}")]
    Listen {
        endpoint: SocketEndpoint,
        #[source]
        source: Errno,
    },
    /// A stale socket file existed but could not be removed.
    #[error("failed to remove stale socket '{path}': {source}")]
    StaleSocket {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
    /// The configured socket path exists and is not a socket.
    #[error("refusing to replace non-socket file at '{path}'")]
    NotSocket { path: Utf8PathBuf },
    /// Inspecting an existing socket path failed.
    #[error("failed to inspect socket path '{path}': {source}")]
    SocketMetadata {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
    /// The poll call itself failed.
    #[error("poll failed: {source}")]
    Poll {
        #[source]
        source: Errno,
    },
    /// Accepting on a ready listener failed.
    #[error("accept failed on listener '{listener}': {source}")]
    Accept {
        listener: String,
        #[source]
        source: io::Error,
    },
    /// The reactor thread could not be spawned.
    #[error("failed to spawn reactor thread: {source}")]
    Spawn {
        #[source]
        source: io::Error,
    },
    /// The reactor thread panicked.
    #[error("reactor thread panicked")]
    ThreadPanic,
}
