//! The listener that accepts and then says nothing at all.

use std::thread;
use std::time::Duration;

use ornery_config::ArgValue;

use crate::logwire::WorkerLog;

use super::{Connection, Handler, HandlerError};

/// How long the worker holds the connection open without responding.
const SILENCE: Duration = Duration::from_secs(24 * 60 * 60);

struct BlackHole {
    // Held so the socket stays open for the full silence.
    _connection: Connection,
    log: WorkerLog,
}

impl Handler for BlackHole {
    fn handle(&mut self) -> Result<(), HandlerError> {
        self.log
            .info("sleeping for the next 24 hours; no response will be sent");
        thread::sleep(SILENCE);
        Ok(())
    }
}

/// Accepts the connection, never reads or writes, and keeps it open for a
/// day. Clients without their own timeouts will hang here.
pub fn black_hole(
    connection: Connection,
    _args: &[ArgValue],
    log: WorkerLog,
) -> Result<Box<dyn Handler>, HandlerError> {
    Ok(Box::new(BlackHole {
        _connection: connection,
        log,
    }))
}
