//! A deliberately misbehaving server for exercising client error handling.
//!
//! `orneryd` binds a set of TCP and unix-domain listeners, each wired to a
//! canned misbehaviour: an HTTP response that advertises a body it never
//! sends, a response trickled out one byte at a time, an abrupt TCP reset,
//! or a listener that accepts and then says nothing for a day. Clients under
//! test are pointed at whichever listener exhibits the failure mode they
//! must survive.
//!
//! A single poll-based reactor watches every listener and hands each
//! accepted connection to its own worker thread, so one stalled or sleeping
//! connection never delays service on any other listener. Workers forward
//! their diagnostics over a unix-domain log channel as length-prefixed
//! records; a built-in log-sink listener reassembles them and re-emits each
//! through the daemon's tracing output.
//!
//! Handlers are looked up by name in a [`registry::HandlerRegistry`];
//! configuration carries identifiers and plain data arguments, never code.

pub mod daemon;
pub mod handlers;
pub mod logwire;
pub mod reactor;
pub mod registry;
pub mod telemetry;

pub use daemon::{LaunchError, run};
