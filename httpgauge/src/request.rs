//! Single HTTP GET exchange over an owned connection.
//!
//! A [`Request`] writes the request head, parses the status line and header
//! block, reads the body according to `Content-Length` and then yields exactly
//! one [`Outcome`]. Timeouts and transport resets are outcomes; framing
//! violations are fatal [`GaugeError`]s.

use crate::endpoint::Endpoint;
use crate::error::{GaugeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::TcpStream;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, trace};

/// Upper bound for a single body read
pub const BODY_CHUNK_SIZE: usize = 100 * 1024;

/// Longest status or header line accepted, terminator included
pub const MAX_HEADER_LINE: usize = 16 * 1024;

/// Stand-in deadline when the data timeout does not fit an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// HTTP version token written on the request line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum HttpVersion {
    Http10,
    Http11,
}

impl HttpVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpVersion::Http10 => "1.0",
            HttpVersion::Http11 => "1.1",
        }
    }
}

impl Default for HttpVersion {
    fn default() -> Self {
        HttpVersion::Http10
    }
}

impl fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpVersion {
    type Err = GaugeError;

    fn from_str(s: &str) -> Result<Self> {
        let token = s.trim();
        let token = token.strip_prefix("HTTP/").unwrap_or(token);
        match token {
            // "1" shows up when a TOML float 1.0 is read back as a string
            "1.0" | "1" => Ok(HttpVersion::Http10),
            "1.1" => Ok(HttpVersion::Http11),
            other => Err(GaugeError::Config(format!(
                "unsupported HTTP version '{}', expected 1.0 or 1.1",
                other
            ))),
        }
    }
}

impl TryFrom<String> for HttpVersion {
    type Error = GaugeError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<HttpVersion> for String {
    fn from(version: HttpVersion) -> Self {
        version.as_str().to_string()
    }
}

/// Per-request protocol settings shared by every attempt of a run
#[derive(Debug, Clone, Copy)]
pub struct RequestOptions {
    pub version: HttpVersion,
    pub keep_alive: bool,
    pub data_timeout: Duration,
}

/// An open stream to the endpoint, exclusively owned by one request at a time.
///
/// Buffered bytes travel with the stream when it is handed to the next request.
#[derive(Debug)]
pub struct Connection<S = TcpStream> {
    reader: BufReader<S>,
    id: u64,
    exchanges: u64,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, id: u64) -> Self {
        Self {
            reader: BufReader::new(stream),
            id,
            exchanges: 0,
        }
    }

    /// Identifier assigned by the gauge when the connection was opened
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Number of successful exchanges completed on this connection
    pub fn exchanges(&self) -> u64 {
        self.exchanges
    }

    async fn close(mut self) {
        if let Err(e) = self.reader.get_mut().shutdown().await {
            trace!(connection_id = self.id, error = %e, "Shutdown failed on close");
        }
    }
}

/// Protocol phase of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    WritingHeaders,
    AwaitingStatusLine,
    AwaitingHeaders,
    ReadingBody,
    Done,
}

/// Terminal result of one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success {
        bytes_read: u64,
        started: Instant,
        finished: Instant,
        status: u16,
    },
    Timeout,
    Reset,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    /// Wall time of a successful attempt
    pub fn duration(&self) -> Option<Duration> {
        match self {
            Outcome::Success {
                started, finished, ..
            } => Some(finished.duration_since(*started)),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Success { .. } => "success",
            Outcome::Timeout => "timeout",
            Outcome::Reset => "reset",
        }
    }
}

/// What a request hands back to the gauge
#[derive(Debug)]
pub struct Finished<S = TcpStream> {
    pub outcome: Outcome,
    /// Still-open connection; only present after a keep-alive success
    pub connection: Option<Connection<S>>,
    /// The response carried `Connection: close`
    pub server_close: bool,
}

impl<S> Finished<S> {
    /// Attempt that ended without a usable connection
    pub fn failed(outcome: Outcome) -> Self {
        Self {
            outcome,
            connection: None,
            server_close: false,
        }
    }
}

/// Parsed response status line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub version: String,
    pub code: u16,
    pub reason: String,
}

/// Parse `HTTP/1.1 200 OK`. The reason phrase may be empty.
pub fn parse_status_line(line: &str) -> Result<StatusLine> {
    let mut parts = line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        return Err(GaugeError::Protocol(format!(
            "malformed status line: {:?}",
            line
        )));
    }

    let code = parts
        .next()
        .and_then(|c| c.parse::<u16>().ok())
        .filter(|c| (100..1000).contains(c))
        .ok_or_else(|| GaugeError::Protocol(format!("malformed status code in {:?}", line)))?;

    Ok(StatusLine {
        version: version.to_string(),
        code,
        reason: parts.next().unwrap_or_default().to_string(),
    })
}

/// Split a header line on the first colon into a lower-cased name and a
/// trimmed, lower-cased value.
pub fn parse_header_line(line: &str) -> Result<(String, String)> {
    let (name, value) = line
        .split_once(':')
        .ok_or_else(|| GaugeError::Protocol(format!("malformed header line: {:?}", line)))?;

    let name = name.trim();
    if name.is_empty() {
        return Err(GaugeError::Protocol(format!(
            "empty header name in {:?}",
            line
        )));
    }

    Ok((name.to_ascii_lowercase(), value.trim().to_ascii_lowercase()))
}

/// Why an exchange stopped early
enum Interrupt {
    Timeout,
    Reset,
    Fatal(GaugeError),
}

impl Interrupt {
    fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => Interrupt::Reset,
            _ => Interrupt::Fatal(GaugeError::Io(err)),
        }
    }
}

impl From<GaugeError> for Interrupt {
    fn from(err: GaugeError) -> Self {
        Interrupt::Fatal(err)
    }
}

/// One GET attempt
pub struct Request<S = TcpStream> {
    connection: Connection<S>,
    endpoint: Arc<Endpoint>,
    options: RequestOptions,
    started: Instant,
    headers: HashMap<String, String>,
    state: RequestState,
}

impl<S> Request<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// `started` is the connect time for a fresh connection, or the hand-off
    /// time for a reused one.
    pub fn new(
        connection: Connection<S>,
        endpoint: Arc<Endpoint>,
        options: RequestOptions,
        started: Instant,
    ) -> Self {
        Self {
            connection,
            endpoint,
            options,
            started,
            headers: HashMap::new(),
            state: RequestState::WritingHeaders,
        }
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    /// Request head exactly as written to the wire
    pub fn encode_head(&self) -> String {
        let mut head = format!(
            "GET {} HTTP/{}\r\nHost: {}\r\n",
            self.endpoint.path, self.options.version, self.endpoint.host
        );
        if self.options.keep_alive {
            head.push_str("Connection: Keep-Alive\r\n");
        }
        head.push_str("\r\n");
        head
    }

    /// Drive the exchange to its single outcome.
    ///
    /// Only protocol violations and unexpected I/O failures are returned as
    /// errors; they abort the whole run.
    pub async fn get(mut self) -> Result<Finished<S>> {
        let result = self.exchange().await;
        self.state = RequestState::Done;

        match result {
            Ok((status, bytes_read)) => {
                let finished = Instant::now();
                let server_close = self.server_requested_close();
                self.connection.exchanges += 1;

                debug!(
                    connection_id = self.connection.id,
                    status = status.code,
                    bytes_read = bytes_read,
                    elapsed_ms = finished.duration_since(self.started).as_secs_f64() * 1000.0,
                    server_close = server_close,
                    "Request completed"
                );

                let connection = if self.options.keep_alive {
                    Some(self.connection)
                } else {
                    self.connection.close().await;
                    None
                };

                Ok(Finished {
                    outcome: Outcome::Success {
                        bytes_read,
                        started: self.started,
                        finished,
                        status: status.code,
                    },
                    connection,
                    server_close,
                })
            }
            Err(Interrupt::Timeout) => {
                debug!(connection_id = self.connection.id, "Request timed out");
                self.connection.close().await;
                Ok(Finished::failed(Outcome::Timeout))
            }
            Err(Interrupt::Reset) => {
                debug!(connection_id = self.connection.id, "Connection reset by peer");
                self.connection.close().await;
                Ok(Finished::failed(Outcome::Reset))
            }
            Err(Interrupt::Fatal(err)) => {
                self.connection.close().await;
                Err(err)
            }
        }
    }

    async fn exchange(&mut self) -> std::result::Result<(StatusLine, u64), Interrupt> {
        let data_timeout = self.options.data_timeout;

        timeout(data_timeout, self.write_headers())
            .await
            .map_err(|_| Interrupt::Timeout)??;

        // Headers and body share one response deadline
        let now = Instant::now();
        let deadline = now
            .checked_add(data_timeout)
            .unwrap_or_else(|| now + FAR_FUTURE);
        let status = timeout_at(deadline, self.consume_headers())
            .await
            .map_err(|_| Interrupt::Timeout)??;
        let bytes_read = timeout_at(deadline, self.read_body())
            .await
            .map_err(|_| Interrupt::Timeout)??;

        Ok((status, bytes_read))
    }

    async fn write_headers(&mut self) -> std::result::Result<(), Interrupt> {
        self.state = RequestState::WritingHeaders;
        let head = self.encode_head();

        let stream = self.connection.reader.get_mut();
        stream
            .write_all(head.as_bytes())
            .await
            .map_err(Interrupt::from_io)?;
        stream.flush().await.map_err(Interrupt::from_io)?;
        Ok(())
    }

    async fn consume_headers(&mut self) -> std::result::Result<StatusLine, Interrupt> {
        self.state = RequestState::AwaitingStatusLine;
        let line = self.read_line().await?;
        let status = parse_status_line(&line)?;

        self.state = RequestState::AwaitingHeaders;
        loop {
            let line = self.read_line().await?;
            if line.is_empty() {
                break;
            }
            let (name, value) = parse_header_line(&line)?;
            self.headers.insert(name, value);
        }

        trace!(
            connection_id = self.connection.id,
            status = status.code,
            headers = self.headers.len(),
            "Response header block received"
        );
        Ok(status)
    }

    async fn read_body(&mut self) -> std::result::Result<u64, Interrupt> {
        self.state = RequestState::ReadingBody;

        let expected = match self.headers.get("content-length") {
            Some(value) => value.parse::<u64>().map_err(|_| {
                GaugeError::Protocol(format!("invalid content-length: {:?}", value))
            })?,
            None => 0,
        };

        let mut chunk = vec![0u8; expected.min(BODY_CHUNK_SIZE as u64) as usize];
        let mut bytes_read = 0u64;
        while bytes_read < expected {
            let want = (expected - bytes_read).min(BODY_CHUNK_SIZE as u64) as usize;
            let n = self
                .connection
                .reader
                .read(&mut chunk[..want])
                .await
                .map_err(Interrupt::from_io)?;
            if n == 0 {
                break;
            }
            bytes_read += n as u64;
        }

        if bytes_read != expected {
            return Err(Interrupt::Fatal(GaugeError::BodyLengthMismatch {
                expected,
                actual: bytes_read,
            }));
        }
        Ok(bytes_read)
    }

    async fn read_line(&mut self) -> std::result::Result<String, Interrupt> {
        let mut buf = Vec::new();
        let n = (&mut self.connection.reader)
            .take(MAX_HEADER_LINE as u64)
            .read_until(b'\n', &mut buf)
            .await
            .map_err(Interrupt::from_io)?;

        if !buf.ends_with(b"\n") {
            if n >= MAX_HEADER_LINE {
                return Err(Interrupt::Fatal(GaugeError::Protocol(format!(
                    "header line exceeds {} bytes",
                    MAX_HEADER_LINE
                ))));
            }
            // Peer closed before the header block was complete
            trace!(
                connection_id = self.connection.id,
                partial_bytes = n,
                "Connection closed mid-header"
            );
            return Err(Interrupt::Reset);
        }

        buf.pop();
        if buf.ends_with(b"\r") {
            buf.pop();
        }

        String::from_utf8(buf).map_err(|_| {
            Interrupt::Fatal(GaugeError::Protocol(
                "non UTF-8 bytes in response header".to_string(),
            ))
        })
    }

    fn server_requested_close(&self) -> bool {
        self.headers
            .get("connection")
            .map(|v| v.split(',').any(|token| token.trim() == "close"))
            .unwrap_or(false)
    }
}
