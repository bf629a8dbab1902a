//! Misbehaviour handlers and the capability seam they plug into.
//!
//! A handler is constructed for exactly one accepted connection and invoked
//! exactly once. Handlers are free to block, sleep, or abandon the peer; the
//! reactor isolates each invocation in its own worker, so nothing a handler
//! does can stall another listener.

mod blackhole;
mod http;
mod logsink;
mod reset;

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::os::unix::net::UnixStream;

use thiserror::Error;

use ornery_config::ArgValue;

use crate::logwire::{WireError, WorkerLog};

pub use blackhole::black_hole;
pub use http::{headers_only, html_page, json_page, response_head, trickle};
pub use logsink::log_sink;
pub use reset::tcp_reset;

/// Stream types accepted by the reactor.
#[derive(Debug)]
pub enum ConnectionStream {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl ConnectionStream {
    /// Arms `SO_LINGER` with a zero timeout so closing a TCP stream emits an
    /// RST instead of an orderly FIN. Unix streams have no equivalent and are
    /// left untouched.
    pub fn reset_on_close(&self) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => {
                let linger = libc::linger {
                    l_onoff: 1,
                    l_linger: 0,
                };
                nix::sys::socket::setsockopt(stream, nix::sys::socket::sockopt::Linger, &linger)
                    .map_err(io::Error::from)
            }
            Self::Unix(_) => Ok(()),
        }
    }
}

impl Read for ConnectionStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.read(buf),
            Self::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for ConnectionStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.write(buf),
            Self::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.flush(),
            Self::Unix(stream) => stream.flush(),
        }
    }
}

/// Peer address of an accepted connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerAddr {
    Tcp(SocketAddr),
    Unix,
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => write!(formatter, "{addr}"),
            Self::Unix => write!(formatter, "<unix peer>"),
        }
    }
}

/// One accepted client connection. Ownership moves into exactly one worker;
/// dropping it closes the socket.
#[derive(Debug)]
pub struct Connection {
    pub stream: ConnectionStream,
    pub peer: PeerAddr,
}

/// A unit of canned (mis)behaviour, invoked once per connection.
pub trait Handler: Send {
    /// Serves the connection. May block indefinitely; errors are contained
    /// at the worker boundary and logged under the handler's identifier.
    fn handle(&mut self) -> Result<(), HandlerError>;
}

/// Constructs a handler for one accepted connection.
///
/// `args` are the extra positional arguments from the listener section; the
/// [`WorkerLog`] forwards diagnostics to the daemon's log channel.
pub type HandlerFactory =
    fn(Connection, &[ArgValue], WorkerLog) -> Result<Box<dyn Handler>, HandlerError>;

/// Errors raised while constructing or running a handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// I/O failure while serving the connection.
    #[error("i/o failure while serving connection: {0}")]
    Io(#[from] io::Error),
    /// A positional argument did not have the expected shape.
    #[error("handler argument {index} is invalid: {reason}")]
    BadArgument { index: usize, reason: String },
    /// A configured data file could not be read.
    #[error("failed to read data file '{path}': {source}")]
    DataFile {
        path: String,
        #[source]
        source: io::Error,
    },
    /// A malformed frame arrived on the log channel.
    #[error("log channel frame error: {0}")]
    LogWire(#[from] WireError),
}

/// Reads the string argument at `index`, if present.
pub(crate) fn str_arg(args: &[ArgValue], index: usize) -> Result<Option<&str>, HandlerError> {
    match args.get(index) {
        None => Ok(None),
        Some(value) => value
            .as_str()
            .map(Some)
            .ok_or_else(|| HandlerError::BadArgument {
                index,
                reason: format!("expected a string, got '{value}'"),
            }),
    }
}

/// Reads the integer argument at `index`, if present.
pub(crate) fn int_arg(args: &[ArgValue], index: usize) -> Result<Option<i64>, HandlerError> {
    match args.get(index) {
        None => Ok(None),
        Some(value) => value
            .as_i64()
            .map(Some)
            .ok_or_else(|| HandlerError::BadArgument {
                index,
                reason: format!("expected an integer, got '{value}'"),
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn str_arg_rejects_integers() {
        let args = vec![ArgValue::Int(30)];
        let error = str_arg(&args, 0).expect_err("integer should not satisfy a string arg");
        assert!(matches!(error, HandlerError::BadArgument { index: 0, .. }));
    }

    #[test]
    fn missing_args_read_as_none() {
        assert!(str_arg(&[], 0).expect("absent arg is fine").is_none());
        assert!(int_arg(&[], 2).expect("absent arg is fine").is_none());
    }
}
