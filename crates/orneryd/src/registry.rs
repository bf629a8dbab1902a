//! Name-based handler registry.
//!
//! Configuration refers to handlers by identifier only. The registry maps
//! each identifier to a factory at startup, so an unknown name is rejected
//! before any socket is bound and no configuration value is ever evaluated
//! as code.

use std::collections::HashMap;

use thiserror::Error;

use ornery_config::{ArgValue, Config, ListenerSection, SocketEndpoint};

use crate::handlers::{self, HandlerFactory};

/// Identifier of the built-in log-channel receiver.
pub const LOG_SINK_HANDLER: &str = "log-sink";

/// Listener name given to the implicit log-channel listener.
const LOG_SINK_LISTENER: &str = "log";

/// A listener section resolved against the registry: everything the reactor
/// needs to bind the socket and construct handlers for its connections.
#[derive(Debug, Clone)]
pub struct ListenerSpec {
    pub name: String,
    pub handler: String,
    pub endpoint: SocketEndpoint,
    pub args: Vec<ArgValue>,
    pub factory: HandlerFactory,
}

/// Errors raised while resolving configuration against the registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A listener section named a handler the registry does not know.
    #[error("listener '{listener}' names unknown handler '{identifier}'")]
    UnknownHandler { identifier: String, listener: String },
}

/// Maps handler identifiers to their factories.
pub struct HandlerRegistry {
    table: HashMap<&'static str, HandlerFactory>,
}

impl HandlerRegistry {
    /// Builds a registry preloaded with every built-in handler.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self {
            table: HashMap::new(),
        };
        registry.register("http-html", handlers::html_page);
        registry.register("http-json", handlers::json_page);
        registry.register("http-no-body", handlers::headers_only);
        registry.register("http-trickle", handlers::trickle);
        registry.register("tcp-reset", handlers::tcp_reset);
        registry.register("black-hole", handlers::black_hole);
        registry.register(LOG_SINK_HANDLER, handlers::log_sink);
        registry
    }

    /// Registers (or replaces) a factory under `identifier`.
    pub fn register(&mut self, identifier: &'static str, factory: HandlerFactory) {
        self.table.insert(identifier, factory);
    }

    /// Resolves one listener section to a bindable spec.
    pub fn resolve(&self, section: &ListenerSection) -> Result<ListenerSpec, RegistryError> {
        let factory = self.table.get(section.handler.as_str()).copied().ok_or_else(|| {
            RegistryError::UnknownHandler {
                identifier: section.handler.clone(),
                listener: section.name.clone(),
            }
        })?;
        Ok(ListenerSpec {
            name: section.name.clone(),
            handler: section.handler.clone(),
            endpoint: section.endpoint(),
            args: section.args.clone(),
            factory,
        })
    }

    /// Resolves the whole configuration in declaration order and appends the
    /// implicit log-channel listener last, bound to the configured log
    /// socket.
    pub fn specs(&self, config: &Config) -> Result<Vec<ListenerSpec>, RegistryError> {
        let mut specs = config
            .listeners()
            .iter()
            .map(|section| self.resolve(section))
            .collect::<Result<Vec<_>, _>>()?;
        specs.push(self.log_sink_spec(config));
        Ok(specs)
    }

    fn log_sink_spec(&self, config: &Config) -> ListenerSpec {
        ListenerSpec {
            name: LOG_SINK_LISTENER.to_owned(),
            handler: LOG_SINK_HANDLER.to_owned(),
            endpoint: SocketEndpoint::unix(config.log_socket().to_owned()),
            args: Vec::new(),
            factory: handlers::log_sink,
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("http-html")]
    #[case("http-json")]
    #[case("http-no-body")]
    #[case("http-trickle")]
    #[case("tcp-reset")]
    #[case("black-hole")]
    #[case("log-sink")]
    fn builtins_resolve(#[case] identifier: &str) {
        let registry = HandlerRegistry::with_builtins();
        let section = ListenerSection::tcp("probe", identifier, "127.0.0.1", 0);
        registry.resolve(&section).expect("builtin resolves");
    }

    #[test]
    fn unknown_handler_is_rejected_by_name() {
        let registry = HandlerRegistry::with_builtins();
        let section = ListenerSection::tcp("probe", "http-teapot", "127.0.0.1", 0);
        let error = registry.resolve(&section).expect_err("unknown handler");
        let RegistryError::UnknownHandler { identifier, listener } = error;
        assert_eq!(identifier, "http-teapot");
        assert_eq!(listener, "probe");
    }

    #[test]
    fn log_sink_listener_is_appended_last() {
        let registry = HandlerRegistry::with_builtins();
        let config = Config::default();
        let specs = registry.specs(&config).expect("default config resolves");
        assert_eq!(specs.len(), config.listeners().len() + 1);
        let last = specs.last().expect("at least the log sink");
        assert_eq!(last.handler, LOG_SINK_HANDLER);
        assert_eq!(last.endpoint, SocketEndpoint::unix(config.log_socket().to_owned()));
    }

    #[test]
    fn registration_replaces_existing_factories() {
        fn noop(
            _connection: crate::handlers::Connection,
            _args: &[ArgValue],
            _log: crate::logwire::WorkerLog,
        ) -> Result<Box<dyn crate::handlers::Handler>, crate::handlers::HandlerError> {
            struct Noop;
            impl crate::handlers::Handler for Noop {
                fn handle(&mut self) -> Result<(), crate::handlers::HandlerError> {
                    Ok(())
                }
            }
            Ok(Box::new(Noop))
        }

        let mut registry = HandlerRegistry::with_builtins();
        registry.register("tcp-reset", noop);
        let section = ListenerSection::tcp("probe", "tcp-reset", "127.0.0.1", 0);
        let spec = registry.resolve(&section).expect("replaced factory resolves");
        let replacement: HandlerFactory = noop;
        assert_eq!(spec.factory as usize, replacement as usize);
    }
}
