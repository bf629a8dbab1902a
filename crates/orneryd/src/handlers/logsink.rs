//! Receiving end of the worker log channel.

use ornery_config::ArgValue;

use crate::logwire::{self, WorkerLog};

use super::{Connection, Handler, HandlerError};

struct LogSink {
    connection: Connection,
}

impl Handler for LogSink {
    fn handle(&mut self) -> Result<(), HandlerError> {
        while let Some(record) = logwire::read_frame(&mut self.connection.stream)? {
            logwire::emit(&record);
        }
        Ok(())
    }
}

/// Drains length-prefixed log records from one worker connection and
/// re-emits each through the daemon's own log sink. Runs until the worker
/// closes its end.
pub fn log_sink(
    connection: Connection,
    _args: &[ArgValue],
    _log: WorkerLog,
) -> Result<Box<dyn Handler>, HandlerError> {
    Ok(Box::new(LogSink { connection }))
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::os::unix::net::UnixStream;
    use std::thread;

    use camino::Utf8PathBuf;

    use crate::handlers::{ConnectionStream, PeerAddr};
    use crate::logwire::{LogRecord, encode_frame, level};

    use super::*;

    #[test]
    fn drains_fragmented_frames_until_peer_closes() {
        let (server, mut client) = UnixStream::pair().expect("socket pair");
        let connection = Connection {
            stream: ConnectionStream::Unix(server),
            peer: PeerAddr::Unix,
        };
        let log = WorkerLog::new("log", Utf8PathBuf::from("/nonexistent/log.sock"));
        let mut handler = log_sink(connection, &[], log).expect("construct handler");

        let writer = thread::spawn(move || {
            let record = LogRecord::new("black-hole", level::INFO, "sleeping");
            let frame = encode_frame(&record).expect("encode frame");
            for byte in frame {
                client.write_all(&[byte]).expect("write fragment");
            }
            // Dropping the client closes the stream at a frame boundary.
        });

        handler.handle().expect("sink drains to clean end of stream");
        writer.join().expect("writer thread");
    }
}
