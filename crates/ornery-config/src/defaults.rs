//! Canned defaults: the demo listener set and the well-known log socket.

use std::env;

use camino::Utf8PathBuf;

use crate::listener::ListenerSection;

/// Default log filter expression used by the daemon.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// The demo listener set bound when no configuration file is supplied.
///
/// One port per misbehaviour, so a client under test can be pointed at
/// whichever failure mode it should survive.
#[must_use]
pub fn default_listeners() -> Vec<ListenerSection> {
    vec![
        ListenerSection::tcp("httphtml", "http-html", "0.0.0.0", 2000),
        ListenerSection::tcp("httpjson", "http-json", "0.0.0.0", 2001),
        ListenerSection::tcp("httpnone", "http-no-body", "0.0.0.0", 2002),
        ListenerSection::tcp("httpslow", "http-trickle", "0.0.0.0", 2003),
        ListenerSection::tcp("reset", "tcp-reset", "0.0.0.0", 2004),
    ]
}

/// Computes the well-known unix-domain path of the log-forwarding socket.
///
/// Workers and the daemon's log-sink listener must agree on this path, so it
/// is namespaced per user to keep concurrent fixtures from colliding.
#[must_use]
pub fn default_log_socket() -> Utf8PathBuf {
    let mut base = temp_base_directory();
    base.push(format!("ornery-{}", user_namespace()));
    base.join("orneryd.sock")
}

fn temp_base_directory() -> Utf8PathBuf {
    let candidate = env::temp_dir();
    Utf8PathBuf::from_path_buf(candidate).unwrap_or_else(|_| Utf8PathBuf::from("/tmp"))
}

#[cfg(unix)]
fn user_namespace() -> String {
    let uid = unsafe { libc::geteuid() };
    format!("uid-{uid}")
}

#[cfg(not(unix))]
fn user_namespace() -> String {
    "shared".to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_listeners_cover_distinct_ports() {
        let listeners = default_listeners();
        let mut ports: Vec<u16> = listeners
            .iter()
            .filter_map(|section| section.port)
            .collect();
        ports.sort_unstable();
        ports.dedup();
        assert_eq!(ports.len(), listeners.len());
    }

    #[test]
    fn log_socket_is_namespaced() {
        let path = default_log_socket();
        assert!(path.as_str().contains("ornery-"));
        assert!(path.as_str().ends_with("orneryd.sock"));
    }
}
