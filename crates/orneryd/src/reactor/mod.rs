//! Connection-multiplexing reactor.
//!
//! One poll loop watches every bound listener for readability, accepts
//! without blocking, and hands each accepted connection to a dedicated
//! worker. Workers never share the loop's thread, so a handler that sleeps
//! for a day cannot delay accepts on any listener.

mod errors;
mod ioloop;
mod listener;
mod workers;

pub use errors::ReactorError;
pub use ioloop::{Reactor, ReactorHandle};
pub use workers::WorkerGauge;

pub(crate) const REACTOR_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::reactor");
