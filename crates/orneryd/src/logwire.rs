//! Length-prefixed log-record wire format shared by workers and the log sink.
//!
//! Workers serve connections in isolated contexts, yet their diagnostics
//! should surface through the daemon's own tracing sink. Each record travels
//! as a 4-byte big-endian unsigned length prefix followed by exactly that
//! many bytes of JSON. A short read at a frame boundary means the peer closed
//! the stream; a short read inside a frame is an error.

use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const WIRE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::logwire");
const FORWARD_TIMEOUT: Duration = Duration::from_secs(1);

/// Size of the length prefix preceding every record.
pub const LENGTH_PREFIX_BYTES: usize = 4;

/// Numeric severity levels carried on the wire.
pub mod level {
    pub const DEBUG: u8 = 10;
    pub const INFO: u8 = 20;
    pub const WARNING: u8 = 30;
    pub const ERROR: u8 = 40;
    pub const CRITICAL: u8 = 50;
}

/// A structured log record produced by a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Logger name, normally the handler identifier.
    pub logger: String,
    /// Numeric severity, see [`level`].
    pub level: u8,
    /// Formatted message text.
    pub message: String,
    /// Seconds since the unix epoch at record creation.
    pub timestamp: f64,
}

impl LogRecord {
    /// Builds a record stamped with the current time.
    #[must_use]
    pub fn new(logger: impl Into<String>, level: u8, message: impl Into<String>) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs_f64())
            .unwrap_or(0.0);
        Self {
            logger: logger.into(),
            level,
            message: message.into(),
            timestamp,
        }
    }
}

/// Errors raised by the frame codec and the worker-side forwarder.
#[derive(Debug, Error)]
pub enum WireError {
    /// Reading or writing the stream failed.
    #[error("log channel i/o failed: {0}")]
    Io(#[from] io::Error),
    /// The stream ended inside a frame payload.
    #[error("log frame truncated: expected {expected} payload bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    /// The payload was not a valid serialised record.
    #[error("malformed log record: {0}")]
    Malformed(#[from] serde_json::Error),
    /// The record does not fit in a 32-bit length prefix.
    #[error("log record of {length} bytes exceeds frame capacity")]
    Oversize { length: usize },
}

/// Encodes one record as a length-prefixed frame.
pub fn encode_frame(record: &LogRecord) -> Result<Vec<u8>, WireError> {
    let payload = serde_json::to_vec(record)?;
    let length =
        u32::try_from(payload.len()).map_err(|_| WireError::Oversize {
            length: payload.len(),
        })?;
    let mut frame = Vec::with_capacity(LENGTH_PREFIX_BYTES + payload.len());
    frame.extend_from_slice(&length.to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Reads one frame, reassembling the payload across however many partial
/// reads the stream delivers. `Ok(None)` means the peer closed the stream at
/// a frame boundary.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Option<LogRecord>, WireError> {
    let mut prefix = [0_u8; LENGTH_PREFIX_BYTES];
    if read_full(reader, &mut prefix)? < LENGTH_PREFIX_BYTES {
        return Ok(None);
    }
    let expected = u32::from_be_bytes(prefix) as usize;
    let mut payload = vec![0_u8; expected];
    let actual = read_full(reader, &mut payload)?;
    if actual < expected {
        return Err(WireError::Truncated { expected, actual });
    }
    Ok(Some(serde_json::from_slice(&payload)?))
}

/// Fills `buf` as far as the stream allows, retrying interrupted reads.
/// Returns the number of bytes actually read; less than `buf.len()` means
/// end of stream.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(read) => filled += read,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) => return Err(error),
        }
    }
    Ok(filled)
}

/// Re-emits a received record through the process tracing sink at the
/// record's original level, keyed by its original logger name.
pub fn emit(record: &LogRecord) {
    match record.level {
        lvl if lvl >= level::ERROR => {
            tracing::error!(target: WIRE_TARGET, logger = %record.logger, "{}", record.message);
        }
        lvl if lvl >= level::WARNING => {
            tracing::warn!(target: WIRE_TARGET, logger = %record.logger, "{}", record.message);
        }
        lvl if lvl >= level::INFO => {
            tracing::info!(target: WIRE_TARGET, logger = %record.logger, "{}", record.message);
        }
        lvl if lvl >= level::DEBUG => {
            tracing::debug!(target: WIRE_TARGET, logger = %record.logger, "{}", record.message);
        }
        _ => {
            tracing::trace!(target: WIRE_TARGET, logger = %record.logger, "{}", record.message);
        }
    }
}

/// Worker-side handle that forwards records to the daemon's log channel.
///
/// The connection to the log socket is established lazily on first use. Any
/// forwarding failure falls back to emitting the record locally and drops the
/// broken connection so the next record retries.
#[derive(Debug, Clone)]
pub struct WorkerLog {
    logger: Arc<str>,
    socket: Arc<Utf8PathBuf>,
    stream: Arc<Mutex<Option<UnixStream>>>,
}

impl WorkerLog {
    /// Builds a forwarding handle named after `logger`, wired to the log
    /// socket at `socket`.
    #[must_use]
    pub fn new(logger: &str, socket: Utf8PathBuf) -> Self {
        Self {
            logger: Arc::from(logger),
            socket: Arc::new(socket),
            stream: Arc::new(Mutex::new(None)),
        }
    }

    /// Forwards a debug-level message.
    pub fn debug(&self, message: impl Into<String>) {
        self.send(level::DEBUG, message.into());
    }

    /// Forwards an info-level message.
    pub fn info(&self, message: impl Into<String>) {
        self.send(level::INFO, message.into());
    }

    /// Forwards a warning-level message.
    pub fn warning(&self, message: impl Into<String>) {
        self.send(level::WARNING, message.into());
    }

    /// Forwards an error-level message.
    pub fn error(&self, message: impl Into<String>) {
        self.send(level::ERROR, message.into());
    }

    fn send(&self, level: u8, message: String) {
        let record = LogRecord::new(self.logger.as_ref(), level, message);
        if let Err(error) = self.forward(&record) {
            tracing::debug!(
                target: WIRE_TARGET,
                error = %error,
                socket = %self.socket,
                "log forwarding failed; emitting locally"
            );
            emit(&record);
        }
    }

    fn forward(&self, record: &LogRecord) -> Result<(), WireError> {
        let frame = encode_frame(record)?;
        let mut guard = self
            .stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if guard.is_none() {
            let stream = UnixStream::connect(self.socket.as_std_path())?;
            stream.set_write_timeout(Some(FORWARD_TIMEOUT))?;
            *guard = Some(stream);
        }
        if let Some(stream) = guard.as_mut()
            && let Err(error) = stream.write_all(&frame)
        {
            *guard = None;
            return Err(WireError::Io(error));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    /// Reader that hands out one byte per call, exercising reassembly.
    struct Dribble {
        data: Vec<u8>,
        position: usize,
    }

    impl Read for Dribble {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.position >= self.data.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.data[self.position];
            self.position += 1;
            Ok(1)
        }
    }

    fn sample_record() -> LogRecord {
        LogRecord::new("http-trickle", level::INFO, "one byte every 30 seconds")
    }

    #[test]
    fn frame_round_trips() {
        let record = sample_record();
        let frame = encode_frame(&record).expect("encode frame");
        let mut cursor = Cursor::new(frame);
        let decoded = read_frame(&mut cursor)
            .expect("read frame")
            .expect("one record present");
        assert_eq!(decoded, record);
    }

    #[test]
    fn fragmented_delivery_reassembles_byte_for_byte() {
        let record = sample_record();
        let frame = encode_frame(&record).expect("encode frame");
        let mut dribble = Dribble {
            data: frame,
            position: 0,
        };
        let decoded = read_frame(&mut dribble)
            .expect("read fragmented frame")
            .expect("one record present");
        assert_eq!(decoded, record);
    }

    #[test]
    fn two_frames_in_sequence() {
        let first = sample_record();
        let second = LogRecord::new("tcp-reset", level::ERROR, "boom");
        let mut bytes = encode_frame(&first).expect("encode first");
        bytes.extend(encode_frame(&second).expect("encode second"));
        let mut cursor = Cursor::new(bytes);
        assert_eq!(read_frame(&mut cursor).expect("first frame"), Some(first));
        assert_eq!(read_frame(&mut cursor).expect("second frame"), Some(second));
        assert_eq!(read_frame(&mut cursor).expect("clean end"), None);
    }

    #[test]
    fn short_prefix_is_clean_end_of_stream() {
        let mut cursor = Cursor::new(vec![0_u8, 0]);
        assert_eq!(read_frame(&mut cursor).expect("short prefix"), None);
    }

    #[test]
    fn truncated_payload_is_an_error() {
        let record = sample_record();
        let mut frame = encode_frame(&record).expect("encode frame");
        frame.truncate(frame.len() - 3);
        let mut cursor = Cursor::new(frame);
        let error = read_frame(&mut cursor).expect_err("truncated payload");
        assert!(matches!(error, WireError::Truncated { .. }));
    }

    #[test]
    fn worker_log_forwards_framed_records_over_the_socket() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path =
            Utf8PathBuf::from_path_buf(dir.path().join("log.sock")).expect("utf8 path");
        let listener =
            std::os::unix::net::UnixListener::bind(path.as_std_path()).expect("bind log socket");

        let log = WorkerLog::new("http-json", path);
        log.info("served 29 body bytes");
        log.warning("client is reading slowly");

        let (mut stream, _peer) = listener.accept().expect("forwarder connects");
        let first = read_frame(&mut stream)
            .expect("read first frame")
            .expect("first record present");
        assert_eq!(first.logger, "http-json");
        assert_eq!(first.level, level::INFO);
        assert_eq!(first.message, "served 29 body bytes");

        // Both records travel over the one lazily-opened connection.
        let second = read_frame(&mut stream)
            .expect("read second frame")
            .expect("second record present");
        assert_eq!(second.level, level::WARNING);
        assert_eq!(second.message, "client is reading slowly");
    }

    #[test]
    fn malformed_payload_is_an_error() {
        let payload = b"not json";
        let mut frame = (payload.len() as u32).to_be_bytes().to_vec();
        frame.extend_from_slice(payload);
        let mut cursor = Cursor::new(frame);
        let error = read_frame(&mut cursor).expect_err("malformed payload");
        assert!(matches!(error, WireError::Malformed(_)));
    }
}
