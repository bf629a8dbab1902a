//! Abrupt connection reset.

use ornery_config::ArgValue;

use crate::logwire::WorkerLog;

use super::{Connection, Handler, HandlerError};

struct RstClose {
    connection: Connection,
    log: WorkerLog,
}

impl Handler for RstClose {
    fn handle(&mut self) -> Result<(), HandlerError> {
        self.log
            .debug(format!("resetting connection from {}", self.connection.peer));
        // Arming zero-linger before the drop turns the close into an RST.
        self.connection.stream.reset_on_close()?;
        Ok(())
    }
}

/// Closes the connection with a TCP RST instead of an orderly shutdown, so
/// the client observes a connection-reset error rather than end of stream.
pub fn tcp_reset(
    connection: Connection,
    _args: &[ArgValue],
    log: WorkerLog,
) -> Result<Box<dyn Handler>, HandlerError> {
    Ok(Box::new(RstClose { connection, log }))
}
