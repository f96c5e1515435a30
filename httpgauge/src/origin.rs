use crate::error::{GaugeError, Result};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// Behaviour knobs of the test origin
#[derive(Debug, Clone)]
pub struct OriginOptions {
    /// Size of the response body in bytes
    pub body_size: usize,
    /// Answer `Connection: close` after this many requests on one connection
    pub max_requests_per_connection: Option<u64>,
    /// Sleep before answering each request
    pub response_delay: Option<Duration>,
    /// Abort every connection with a TCP reset instead of answering
    pub reset_connections: bool,
}

impl Default for OriginOptions {
    fn default() -> Self {
        Self {
            body_size: 1024,
            max_requests_per_connection: None,
            response_delay: None,
            reset_connections: false,
        }
    }
}

/// Counters shared between the server and its observers
#[derive(Debug, Clone, Default)]
pub struct OriginStats {
    connections_accepted: Arc<AtomicU64>,
    requests_served: Arc<AtomicU64>,
}

impl OriginStats {
    pub fn connections_accepted(&self) -> u64 {
        self.connections_accepted.load(Ordering::Relaxed)
    }

    pub fn requests_served(&self) -> u64 {
        self.requests_served.load(Ordering::Relaxed)
    }
}

/// Simple HTTP/1.x origin server for exercising the gauge
pub struct TestOriginServer {
    listener: TcpListener,
    options: Arc<OriginOptions>,
    body: Arc<Vec<u8>>,
    stats: OriginStats,
}

impl TestOriginServer {
    /// Bind the listener; use port 0 for an ephemeral port
    pub async fn bind(listen_addr: SocketAddr, options: OriginOptions) -> Result<Self> {
        let listener = TcpListener::bind(listen_addr).await?;
        let body = Arc::new(test_body(options.body_size));

        Ok(Self {
            listener,
            options: Arc::new(options),
            body,
            stats: OriginStats::default(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn stats(&self) -> OriginStats {
        self.stats.clone()
    }

    /// Accept connections until the task is dropped
    pub async fn run(self) -> Result<()> {
        info!(
            listen_addr = %self.local_addr()?,
            body_size = self.options.body_size,
            "Test origin server started"
        );

        loop {
            match self.listener.accept().await {
                Ok((stream, client_addr)) => {
                    self.stats
                        .connections_accepted
                        .fetch_add(1, Ordering::Relaxed);
                    debug!(client_addr = %client_addr, "Origin: New connection");

                    let options = Arc::clone(&self.options);
                    let body = Arc::clone(&self.body);
                    let stats = self.stats.clone();
                    tokio::spawn(async move {
                        if let Err(e) =
                            handle_connection(stream, client_addr, options, body, stats).await
                        {
                            debug!(
                                client_addr = %client_addr,
                                error = %e,
                                "Origin: Connection ended with error"
                            );
                        }
                    });
                }
                Err(e) => {
                    warn!(error = %e, "Origin: Failed to accept connection");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
}

/// Parsed request head
struct RequestHead {
    len: usize,
    keep_alive: bool,
}

/// Parse a complete request head from `buf`, `None` while it is partial
fn parse_request_head(buf: &[u8]) -> Result<Option<RequestHead>> {
    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut request = httparse::Request::new(&mut headers);

    match request.parse(buf) {
        Ok(httparse::Status::Complete(len)) => {
            let connection = request
                .headers
                .iter()
                .find(|h| h.name.eq_ignore_ascii_case("connection"))
                .map(|h| String::from_utf8_lossy(h.value).to_ascii_lowercase());

            // HTTP/1.1 is persistent unless the client says otherwise
            let keep_alive = match connection {
                Some(value) if value.contains("close") => false,
                Some(value) if value.contains("keep-alive") => true,
                _ => request.version == Some(1),
            };
            Ok(Some(RequestHead { len, keep_alive }))
        }
        Ok(httparse::Status::Partial) => Ok(None),
        Err(e) => Err(GaugeError::Protocol(format!("origin: bad request: {}", e))),
    }
}

/// Serve requests on one connection until it closes
async fn handle_connection(
    mut stream: TcpStream,
    client_addr: SocketAddr,
    options: Arc<OriginOptions>,
    body: Arc<Vec<u8>>,
    stats: OriginStats,
) -> Result<()> {
    let mut buffer = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];
    let mut served = 0u64;

    loop {
        let head = loop {
            if let Some(head) = parse_request_head(&buffer)? {
                break head;
            }
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                debug!(client_addr = %client_addr, served, "Origin: Connection closed by client");
                return Ok(());
            }
            buffer.extend_from_slice(&chunk[..n]);
        };
        buffer.drain(..head.len);
        served += 1;

        if options.reset_connections {
            debug!(client_addr = %client_addr, "Origin: Resetting connection");
            socket2::SockRef::from(&stream).set_linger(Some(Duration::ZERO))?;
            return Ok(());
        }

        if let Some(delay) = options.response_delay {
            tokio::time::sleep(delay).await;
        }

        let close = !head.keep_alive
            || options
                .max_requests_per_connection
                .map_or(false, |max| served >= max);

        let response_head = format!(
            "HTTP/1.1 200 OK\r\n\
             Content-Type: text/plain\r\n\
             Content-Length: {}\r\n\
             Connection: {}\r\n\
             Server: TestOrigin/1.0\r\n\
             \r\n",
            body.len(),
            if close { "close" } else { "keep-alive" }
        );
        stats.requests_served.fetch_add(1, Ordering::Relaxed);
        stream.write_all(response_head.as_bytes()).await?;
        stream.write_all(&body).await?;

        if close {
            if let Err(e) = stream.shutdown().await {
                debug!(client_addr = %client_addr, error = %e, "Origin: Failed to shutdown connection");
            }
            return Ok(());
        }
    }
}

/// Deterministic printable body of `size` bytes
fn test_body(size: usize) -> Vec<u8> {
    const PATTERN: &[u8] = b"httpgauge test origin payload\n";
    PATTERN.iter().copied().cycle().take(size).collect()
}
