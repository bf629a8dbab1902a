use std::fmt;

use serde::{Deserialize, Serialize};

use crate::socket::SocketEndpoint;

/// One configured listener: a handler identifier plus its bind address.
///
/// An absent `port` signifies unix-domain addressing, in which case `host` is
/// interpreted as a filesystem path. That correspondence is the only place
/// the address family appears in user configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ListenerSection {
    /// Section name, used in diagnostics and worker thread names.
    pub name: String,
    /// Registry identifier of the handler to run, e.g. `http-html`.
    pub handler: String,
    /// Host to bind, or the socket path for unix-domain listeners.
    pub host: String,
    /// TCP port; absent for unix-domain listeners.
    #[serde(default)]
    pub port: Option<u16>,
    /// Extra positional arguments handed to the handler constructor.
    #[serde(default)]
    pub args: Vec<ArgValue>,
}

impl ListenerSection {
    /// Builds a TCP listener section without extra arguments.
    #[must_use]
    pub fn tcp(
        name: impl Into<String>,
        handler: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            name: name.into(),
            handler: handler.into(),
            host: host.into(),
            port: Some(port),
            args: Vec::new(),
        }
    }

    /// Builds a unix-domain listener section without extra arguments.
    #[must_use]
    pub fn unix(
        name: impl Into<String>,
        handler: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            handler: handler.into(),
            host: path.into(),
            port: None,
            args: Vec::new(),
        }
    }

    /// Replaces the argument list.
    #[must_use]
    pub fn with_args(mut self, args: Vec<ArgValue>) -> Self {
        self.args = args;
        self
    }

    /// The bind endpoint this section describes.
    #[must_use]
    pub fn endpoint(&self) -> SocketEndpoint {
        match self.port {
            Some(port) => SocketEndpoint::tcp(self.host.clone(), port),
            None => SocketEndpoint::unix(self.host.clone()),
        }
    }
}

/// A structured handler argument.
///
/// Arguments are configuration data, never evaluated code; handlers interpret
/// them positionally.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum ArgValue {
    /// Integer argument, e.g. a sleep interval in seconds.
    Int(i64),
    /// String argument, e.g. a data-file path or content type.
    Str(String),
}

impl ArgValue {
    /// The string payload, when this argument is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(value) => Some(value),
            Self::Int(_) => None,
        }
    }

    /// The integer payload, when this argument is an integer.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            Self::Str(_) => None,
        }
    }
}

impl fmt::Display for ArgValue {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => write!(formatter, "{value}"),
            Self::Str(value) => write!(formatter, "{value}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn tcp_section_builds_tcp_endpoint() {
        let section = ListenerSection::tcp("httphtml", "http-html", "0.0.0.0", 2000);
        assert_eq!(section.endpoint(), SocketEndpoint::tcp("0.0.0.0", 2000));
    }

    #[test]
    fn portless_section_is_unix_domain() {
        let section = ListenerSection::unix("log", "log-sink", "/tmp/orneryd.sock");
        assert_eq!(
            section.endpoint(),
            SocketEndpoint::unix("/tmp/orneryd.sock")
        );
    }

    #[rstest]
    #[case(r#""/tmp/data.json""#, ArgValue::Str("/tmp/data.json".to_owned()))]
    #[case("30", ArgValue::Int(30))]
    fn arg_values_deserialise_untagged(#[case] json: &str, #[case] expected: ArgValue) {
        let value: ArgValue = serde_json::from_str(json).expect("parse arg");
        assert_eq!(value, expected);
    }

    #[test]
    fn args_default_to_empty() {
        let section: ListenerSection = serde_json::from_str(
            r#"{"name": "reset", "handler": "tcp-reset", "host": "0.0.0.0", "port": 2004}"#,
        )
        .expect("parse section");
        assert!(section.args.is_empty());
        assert_eq!(section.port, Some(2004));
    }
}
