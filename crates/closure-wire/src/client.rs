//! Raw HTTP/1.1 client
//!
//! Writes a single POST over a fresh TCP connection with `Connection: close`
//! and reads until the peer hangs up. The read loop is bounded by a per-read
//! timeout, an overall deadline and a maximum response size.

use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::chunked;
use crate::error::WireError;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
const DEFAULT_PORT: u16 = 80;
const READ_BUFFER_SIZE: usize = 8192;

/// Client limits
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Timeout for establishing the TCP connection
    pub connect_timeout: Duration,
    /// Timeout for a single read or write on the socket
    pub io_timeout: Duration,
    /// Deadline for the whole exchange
    pub overall_timeout: Duration,
    /// Largest raw response accepted
    pub max_response_bytes: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            io_timeout: Duration::from_secs(60),
            overall_timeout: Duration::from_secs(180),
            max_response_bytes: 32 * 1024 * 1024,
        }
    }
}

/// A response split into status line, headers and (de-chunked) body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status_line: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RawResponse {
    /// Numeric status code from the status line, if it parses.
    pub fn status_code(&self) -> Option<u16> {
        self.status_line.split_whitespace().nth(1)?.parse().ok()
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status_code(), Some(200..=299))
    }

    /// Case-insensitive header lookup; returns the first match.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Minimal HTTP/1.1 POST client
#[derive(Debug, Clone, Default)]
pub struct HttpClient {
    config: ClientConfig,
}

impl HttpClient {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// POST `body` to `http://{host}{path}`.
    ///
    /// `host` may carry an explicit `:port`. The client always writes `Host`,
    /// `Content-Length` and `Connection: close`; `headers` are written in
    /// order between them.
    pub fn post(
        &self,
        host: &str,
        path: &str,
        headers: &[(&str, &str)],
        body: &[u8],
    ) -> Result<RawResponse, WireError> {
        let mut stream = self.connect(host)?;
        stream.set_read_timeout(Some(self.config.io_timeout))?;
        stream.set_write_timeout(Some(self.config.io_timeout))?;

        let request = build_request(host, path, headers, body);
        stream.write_all(&request).map_err(|e| io_or_timeout(e, "sending request"))?;
        stream.flush()?;
        debug!("sent {} byte request to {}{}", request.len(), host, path);

        let raw = read_until_close(
            &mut stream,
            Instant::now() + self.config.overall_timeout,
            self.config.max_response_bytes,
        )?;
        debug!("received {} byte response from {}", raw.len(), host);

        parse_response(&raw)
    }

    fn connect(&self, host: &str) -> Result<TcpStream, WireError> {
        let (name, port) = split_host_port(host);
        let addrs = (name, port)
            .to_socket_addrs()
            .map_err(|_| WireError::Resolve(host.to_string()))?;

        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.config.connect_timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_error = Some(e),
            }
        }

        match last_error {
            Some(source) if source.kind() == ErrorKind::TimedOut => {
                Err(WireError::Timeout("connecting"))
            }
            Some(source) => Err(WireError::Connect {
                addr: host.to_string(),
                source,
            }),
            None => Err(WireError::Resolve(host.to_string())),
        }
    }
}

fn split_host_port(host: &str) -> (&str, u16) {
    match host.rsplit_once(':') {
        Some((name, port)) => match port.parse() {
            Ok(port) => (name, port),
            Err(_) => (host, DEFAULT_PORT),
        },
        None => (host, DEFAULT_PORT),
    }
}

fn io_or_timeout(err: std::io::Error, during: &'static str) -> WireError {
    match err.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut => WireError::Timeout(during),
        _ => WireError::Io(err),
    }
}

/// Serialize the request line, headers and body.
pub fn build_request(host: &str, path: &str, headers: &[(&str, &str)], body: &[u8]) -> Vec<u8> {
    let mut head = format!("POST {} HTTP/1.1\r\nHost: {}\r\n", path, host);
    for (name, value) in headers {
        head.push_str(&format!("{}: {}\r\n", name, value));
    }
    head.push_str(&format!("Content-Length: {}\r\n", body.len()));
    head.push_str("Connection: close\r\n\r\n");

    let mut request = head.into_bytes();
    request.extend_from_slice(body);
    request
}

/// Read from `reader` until EOF.
///
/// A reset after some bytes arrived is treated as the end of the response,
/// since the peer was told to close the connection anyway.
pub fn read_until_close<R: Read>(
    reader: &mut R,
    deadline: Instant,
    max_bytes: usize,
) -> Result<Vec<u8>, WireError> {
    let mut raw = Vec::new();
    let mut buf = [0u8; READ_BUFFER_SIZE];

    loop {
        if Instant::now() >= deadline {
            return Err(WireError::Timeout("reading response"));
        }

        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if raw.len() + n > max_bytes {
                    return Err(WireError::ResponseTooLarge { max_bytes });
                }
                raw.extend_from_slice(&buf[..n]);
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e)
                if !raw.is_empty()
                    && matches!(
                        e.kind(),
                        ErrorKind::ConnectionReset
                            | ErrorKind::ConnectionAborted
                            | ErrorKind::UnexpectedEof
                    ) =>
            {
                warn!("peer closed connection mid-read after {} bytes: {}", raw.len(), e);
                break;
            }
            Err(e) => return Err(io_or_timeout(e, "reading response")),
        }
    }

    Ok(raw)
}

/// Split a raw response at the first blank line and de-chunk the body
/// when the headers announce `Transfer-Encoding: chunked`.
pub fn parse_response(raw: &[u8]) -> Result<RawResponse, WireError> {
    let split = raw
        .windows(HEADER_TERMINATOR.len())
        .position(|w| w == HEADER_TERMINATOR)
        .ok_or_else(|| WireError::Malformed("missing end of headers".to_string()))?;

    let head = String::from_utf8_lossy(&raw[..split]);
    let mut lines = head.split("\r\n");
    let status_line = lines
        .next()
        .filter(|l| l.starts_with("HTTP/"))
        .ok_or_else(|| WireError::Malformed("missing status line".to_string()))?
        .to_string();

    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();

    let raw_body = &raw[split + HEADER_TERMINATOR.len()..];
    let chunked = headers.iter().any(|(k, v)| {
        k.eq_ignore_ascii_case("transfer-encoding") && v.to_ascii_lowercase().contains("chunked")
    });
    let body = if chunked {
        chunked::decode(raw_body)?
    } else {
        raw_body.to_vec()
    };

    Ok(RawResponse {
        status_line,
        headers,
        body,
    })
}
