//! Daemon entry point: configuration, telemetry, reactor, signals.

use std::io;

use camino::Utf8Path;
use signal_hook::consts::{SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use thiserror::Error;
use tracing::info;

use ornery_config::{Config, ConfigError};

use crate::reactor::{Reactor, ReactorError};
use crate::registry::{HandlerRegistry, RegistryError};
use crate::telemetry::{self, TelemetryError};

const DAEMON_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::daemon");

/// Errors that abort daemon startup or shutdown.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Telemetry could not be initialised.
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    /// A listener named an unknown handler.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// Binding or running the reactor failed.
    #[error(transparent)]
    Reactor(#[from] ReactorError),
    /// The shutdown signal handler could not be registered.
    #[error("failed to register signal handler: {source}")]
    Signals {
        #[source]
        source: io::Error,
    },
}

/// Runs the fixture until a shutdown signal arrives.
///
/// With no configuration path the canned demo listener set is bound. The
/// log-sink listener is always appended, so worker diagnostics flow back
/// into the daemon's own log output.
pub fn run(config_path: Option<&Utf8Path>) -> Result<(), LaunchError> {
    let config = match config_path {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    telemetry::initialise(&config)?;

    let registry = HandlerRegistry::with_builtins();
    let specs = registry.specs(&config)?;
    let listener_count = specs.len();
    let reactor = Reactor::bind(specs, config.log_socket().to_owned())?;
    let handle = reactor.start()?;
    info!(
        target: DAEMON_TARGET,
        listeners = listener_count,
        log_socket = %config.log_socket(),
        "fixture ready"
    );

    wait_for_shutdown_signal()?;
    handle.shutdown();
    handle.join()?;
    info!(target: DAEMON_TARGET, "shutdown sequence completed");
    Ok(())
}

/// Blocks until SIGTERM, SIGINT, or SIGQUIT is delivered.
fn wait_for_shutdown_signal() -> Result<(), LaunchError> {
    let mut signals =
        Signals::new([SIGTERM, SIGINT, SIGQUIT]).map_err(|source| LaunchError::Signals { source })?;
    if let Some(signal) = signals.forever().next() {
        info!(target: DAEMON_TARGET, signal, "shutdown signal received");
    }
    Ok(())
}
