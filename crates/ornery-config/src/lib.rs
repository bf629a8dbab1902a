//! Configuration model for the ornery test fixture.
//!
//! The fixture is driven by a declarative document describing which
//! misbehaviour handler listens where. This crate holds the pure data side of
//! that contract: socket endpoints, listener sections, handler argument
//! values, logging options, and the canned defaults. No sockets are opened
//! here; resolution of handler identifiers and all I/O live in `orneryd`.

pub mod defaults;
mod listener;
mod logging;
mod socket;

use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use listener::{ArgValue, ListenerSection};
pub use logging::{LogFormat, LogFormatParseError};
pub use socket::{SocketEndpoint, SocketPreparationError};

/// Top-level configuration consumed by the daemon.
///
/// The `listeners` array is ordered; listeners are bound in the order they
/// appear. The log socket is the well-known unix-domain path the daemon's
/// log-sink listener binds to and workers forward records to; it is not part
/// of the user-visible listener list.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Listeners to bind, in order.
    pub listeners: Vec<ListenerSection>,
    /// Path of the unix-domain log-forwarding socket.
    pub log_socket: Utf8PathBuf,
    /// Filter expression handed to the tracing subscriber.
    pub log_filter: String,
    /// Output format for the tracing subscriber.
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listeners: defaults::default_listeners(),
            log_socket: defaults::default_log_socket(),
            log_filter: defaults::DEFAULT_LOG_FILTER.to_owned(),
            log_format: LogFormat::default(),
        }
    }
}

impl Config {
    /// Loads configuration from a JSON document at `path`.
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    /// Configured listener sections, in bind order.
    #[must_use]
    pub fn listeners(&self) -> &[ListenerSection] {
        &self.listeners
    }

    /// Path of the log-forwarding socket.
    #[must_use]
    pub fn log_socket(&self) -> &Utf8Path {
        &self.log_socket
    }

    /// Tracing filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Tracing output format.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }
}

/// Errors raised while loading a configuration document.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The document could not be read.
    #[error("failed to read configuration '{path}': {source}")]
    Read {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
    /// The document was not valid configuration JSON.
    #[error("failed to parse configuration '{path}': {source}")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
