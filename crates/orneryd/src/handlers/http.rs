//! HTTP misbehaviours: truncated bodies, missing bodies, and trickled bytes.
//!
//! Responses are deliberately minimal HTTP/1.0. Each handler reads the
//! client's request head first so the peer sees a server that accepted the
//! request, then misbehaves on the response side.

use std::fs;
use std::io::{self, Read, Write};
use std::thread;
use std::time::Duration;

use ornery_config::ArgValue;

use crate::logwire::WorkerLog;

use super::{Connection, ConnectionStream, Handler, HandlerError, int_arg, str_arg};

/// Upper bound on an inbound request head. Anything larger is junk.
const MAX_HEAD_BYTES: usize = 64 * 1024;

/// Default body for the HTML listener.
const HTML_TEMPLATE: &str = "<html><body><h1>Hello, world!</h1></body></html>\n";
/// Default body for the JSON listeners.
const JSON_TEMPLATE: &str = "{\"message\": \"Hello, world!\"}\n";

const DEFAULT_TRICKLE_INTERVAL_SECS: i64 = 30;

/// Formats the response status line and headers for a body of
/// `content_length` bytes. Deterministic on purpose so tests can assert
/// exact bytes.
#[must_use]
pub fn response_head(content_type: &str, content_length: usize) -> String {
    format!(
        "HTTP/1.0 200 OK\r\n\
         Server: orneryd\r\n\
         Content-Type: {content_type}\r\n\
         Content-Length: {content_length}\r\n\
         \r\n"
    )
}

/// Reads until the blank line terminating the request head, or until the
/// peer closes the stream. Returns whatever arrived.
pub(crate) fn read_request_head(stream: &mut ConnectionStream) -> io::Result<Vec<u8>> {
    let mut head = Vec::new();
    let mut chunk = [0_u8; 1024];
    loop {
        let read = match stream.read(&mut chunk) {
            Ok(read) => read,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) => return Err(error),
        };
        if read == 0 {
            return Ok(head);
        }
        head.extend_from_slice(&chunk[..read]);
        if head.windows(4).any(|window| window == b"\r\n\r\n") {
            return Ok(head);
        }
        if head.len() > MAX_HEAD_BYTES {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "request head exceeds 64 KiB",
            ));
        }
    }
}

fn body_from_args(args: &[ArgValue], fallback: &str) -> Result<Vec<u8>, HandlerError> {
    match str_arg(args, 0)? {
        Some(path) => fs::read(path).map_err(|source| HandlerError::DataFile {
            path: path.to_owned(),
            source,
        }),
        None => Ok(fallback.as_bytes().to_vec()),
    }
}

/// Serves the response head and, optionally, the body, then closes.
struct PageResponse {
    connection: Connection,
    body: Vec<u8>,
    content_type: &'static str,
    send_body: bool,
    log: WorkerLog,
}

impl Handler for PageResponse {
    fn handle(&mut self) -> Result<(), HandlerError> {
        read_request_head(&mut self.connection.stream)?;
        let head = response_head(self.content_type, self.body.len());
        self.connection.stream.write_all(head.as_bytes())?;
        if self.send_body {
            self.connection.stream.write_all(&self.body)?;
            self.log
                .debug(format!("served {} body bytes", self.body.len()));
        } else {
            self.log.debug(format!(
                "advertised {} body bytes and sent none",
                self.body.len()
            ));
        }
        self.connection.stream.flush()?;
        Ok(())
    }
}

/// Serves an HTML page; argument 0 optionally names a file to serve instead
/// of the built-in body.
pub fn html_page(
    connection: Connection,
    args: &[ArgValue],
    log: WorkerLog,
) -> Result<Box<dyn Handler>, HandlerError> {
    let body = body_from_args(args, HTML_TEMPLATE)?;
    Ok(Box::new(PageResponse {
        connection,
        body,
        content_type: "text/html",
        send_body: true,
        log,
    }))
}

/// Serves a JSON document; argument 0 optionally names a file to serve
/// instead of the built-in body.
pub fn json_page(
    connection: Connection,
    args: &[ArgValue],
    log: WorkerLog,
) -> Result<Box<dyn Handler>, HandlerError> {
    let body = body_from_args(args, JSON_TEMPLATE)?;
    Ok(Box::new(PageResponse {
        connection,
        body,
        content_type: "application/json",
        send_body: true,
        log,
    }))
}

/// Advertises a body via Content-Length, then closes without sending it.
pub fn headers_only(
    connection: Connection,
    args: &[ArgValue],
    log: WorkerLog,
) -> Result<Box<dyn Handler>, HandlerError> {
    let body = body_from_args(args, JSON_TEMPLATE)?;
    Ok(Box::new(PageResponse {
        connection,
        body,
        content_type: "application/json",
        send_body: false,
        log,
    }))
}

/// Sends the header block whole, then writes the body one byte at a time,
/// flushing and sleeping between bytes, so the full exchange takes minutes.
struct Trickle {
    connection: Connection,
    body: Vec<u8>,
    content_type: String,
    interval: Duration,
    log: WorkerLog,
}

impl Handler for Trickle {
    fn handle(&mut self) -> Result<(), HandlerError> {
        read_request_head(&mut self.connection.stream)?;
        let head = response_head(&self.content_type, self.body.len());
        self.connection.stream.write_all(head.as_bytes())?;
        self.connection.stream.flush()?;
        self.log.info(format!(
            "trickling {} body bytes at one byte per {:?}",
            self.body.len(),
            self.interval
        ));
        for byte in &self.body {
            self.connection.stream.write_all(&[*byte])?;
            self.connection.stream.flush()?;
            thread::sleep(self.interval);
        }
        Ok(())
    }
}

/// Slow responder: the header block goes out whole, the body one byte at a
/// time. Argument 0 optionally names a data file, argument 1 overrides the
/// content type, argument 2 sets the per-byte interval in seconds.
pub fn trickle(
    connection: Connection,
    args: &[ArgValue],
    log: WorkerLog,
) -> Result<Box<dyn Handler>, HandlerError> {
    let body = body_from_args(args, JSON_TEMPLATE)?;
    let content_type = str_arg(args, 1)?.unwrap_or("application/json").to_owned();
    let interval_secs = int_arg(args, 2)?.unwrap_or(DEFAULT_TRICKLE_INTERVAL_SECS);
    let interval_secs =
        u64::try_from(interval_secs).map_err(|_| HandlerError::BadArgument {
            index: 2,
            reason: format!("interval must be non-negative, got {interval_secs}"),
        })?;
    Ok(Box::new(Trickle {
        connection,
        body,
        content_type,
        interval: Duration::from_secs(interval_secs),
        log,
    }))
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;
    use std::os::unix::net::UnixStream;

    use rstest::rstest;
    use tempfile::tempdir;

    use crate::handlers::PeerAddr;

    use super::*;

    fn connection_pair() -> (Connection, UnixStream) {
        let (server, client) = UnixStream::pair().expect("socket pair");
        let connection = Connection {
            stream: ConnectionStream::Unix(server),
            peer: PeerAddr::Unix,
        };
        (connection, client)
    }

    fn quiet_log() -> WorkerLog {
        WorkerLog::new("test", camino::Utf8PathBuf::from("/nonexistent/log.sock"))
    }

    fn send_request(client: &mut UnixStream) {
        client
            .write_all(b"GET / HTTP/1.0\r\nHost: test\r\n\r\n")
            .expect("write request");
    }

    fn read_to_end(client: &mut UnixStream) -> Vec<u8> {
        let mut bytes = Vec::new();
        client.read_to_end(&mut bytes).expect("read response");
        bytes
    }

    #[test]
    fn html_page_serves_head_and_body() {
        let (connection, mut client) = connection_pair();
        send_request(&mut client);
        let mut handler =
            html_page(connection, &[], quiet_log()).expect("construct handler");
        handler.handle().expect("serve page");
        // The handler owns the server end; dropping it delivers EOF.
        drop(handler);

        let response = read_to_end(&mut client);
        let expected_head = response_head("text/html", HTML_TEMPLATE.len());
        let mut expected = expected_head.into_bytes();
        expected.extend_from_slice(HTML_TEMPLATE.as_bytes());
        assert_eq!(response, expected);
    }

    #[test]
    fn data_file_argument_overrides_the_body() {
        let dir = tempdir().expect("temp dir");
        let data = dir.path().join("page.txt");
        std::fs::write(&data, "hello, world!\n").expect("write data file");

        let (connection, mut client) = connection_pair();
        send_request(&mut client);
        let args = vec![ArgValue::Str(data.display().to_string())];
        let mut handler =
            html_page(connection, &args, quiet_log()).expect("construct handler");
        handler.handle().expect("serve page");
        drop(handler);

        let response = read_to_end(&mut client);
        let expected_head = response_head("text/html", 14);
        let mut expected = expected_head.into_bytes();
        expected.extend_from_slice(b"hello, world!\n");
        assert_eq!(response, expected);
    }

    #[test]
    fn headers_only_advertises_a_body_it_never_sends() {
        let (connection, mut client) = connection_pair();
        send_request(&mut client);
        let mut handler =
            headers_only(connection, &[], quiet_log()).expect("construct handler");
        handler.handle().expect("serve headers");
        drop(handler);

        let response = read_to_end(&mut client);
        let expected = response_head("application/json", JSON_TEMPLATE.len());
        assert_eq!(response, expected.into_bytes());
    }

    #[test]
    fn missing_data_file_fails_construction() {
        let (connection, _client) = connection_pair();
        let args = vec![ArgValue::Str("/no/such/file".to_owned())];
        let error = json_page(connection, &args, quiet_log())
            .err()
            .expect("missing file should fail");
        assert!(matches!(error, HandlerError::DataFile { .. }));
    }

    #[rstest]
    #[case("text/html", 48, "Content-Type: text/html\r\nContent-Length: 48\r\n")]
    #[case("application/json", 0, "Content-Type: application/json\r\nContent-Length: 0\r\n")]
    fn response_head_is_deterministic(
        #[case] content_type: &str,
        #[case] length: usize,
        #[case] fragment: &str,
    ) {
        let head = response_head(content_type, length);
        assert!(head.starts_with("HTTP/1.0 200 OK\r\n"));
        assert!(head.contains(fragment));
        assert!(head.ends_with("\r\n\r\n"));
    }

    #[test]
    fn trickle_rejects_negative_intervals() {
        let (connection, _client) = connection_pair();
        let args = vec![
            ArgValue::Str("/dev/null".to_owned()),
            ArgValue::Str("text/plain".to_owned()),
            ArgValue::Int(-5),
        ];
        let error = trickle(connection, &args, quiet_log())
            .err()
            .expect("negative interval should fail");
        assert!(matches!(
            error,
            HandlerError::BadArgument { index: 2, .. }
        ));
    }

    #[test]
    fn trickle_emits_one_byte_per_write() {
        let (connection, mut client) = connection_pair();
        send_request(&mut client);
        let args = vec![
            ArgValue::Str("/dev/null".to_owned()),
            ArgValue::Str("text/plain".to_owned()),
            ArgValue::Int(0),
        ];
        let mut handler =
            trickle(connection, &args, quiet_log()).expect("construct handler");
        handler.handle().expect("trickle response");
        drop(handler);

        let response = read_to_end(&mut client);
        assert_eq!(response, response_head("text/plain", 0).into_bytes());
    }

    #[test]
    fn trickle_sends_the_header_block_unpaced() {
        let (connection, mut client) = connection_pair();
        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .expect("set read timeout");
        send_request(&mut client);
        // A long interval: if the header itself were paced, nothing close to
        // a full header block could arrive before the read timeout.
        let args = vec![
            ArgValue::Str("/dev/null".to_owned()),
            ArgValue::Str("text/plain".to_owned()),
            ArgValue::Int(60),
        ];
        let mut handler =
            trickle(connection, &args, quiet_log()).expect("construct handler");
        let worker = thread::spawn(move || handler.handle());

        let response = read_to_end(&mut client);
        assert_eq!(response, response_head("text/plain", 0).into_bytes());
        worker
            .join()
            .expect("worker thread")
            .expect("trickle completes");
    }
}
