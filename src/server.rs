//! Raw TCP accept loop and minimal HTTP/1.1 parsing. Repurposes a set of
//! zero-allocation request-line/header-line helpers — `read_line_bytes`,
//! `parse_request_line_fast`, `trim_header_line` — to read inbound requests
//! instead of serving static files, then dispatches each one to the
//! health-check responder or the request driver. Connection lifecycle
//! (per-connection timeout, keep-alive loop, shutdown signal handling)
//! follows the same `handle_connection`/`handle_connection_inner`/
//! `shutdown_signal` shape those helpers were lifted from.

use crate::config::Config;
use crate::driver::{Driver, InboundRequest};
use crate::health;
use crate::sink::ResponseSink;
use async_trait::async_trait;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::signal;
use tokio::time::{timeout, Duration};
use tracing::{info, warn};

const MAX_REQUEST_LINE_SIZE: usize = 8192;
const MAX_HEADER_SIZE: usize = 8192;
/// Bounds the buffered request body. Beyond this, the git-upload-pack
/// classifier would reject the request as over its own 64 KiB limit
/// anyway; bounding the read here keeps a slow or hostile client from
/// forcing an unbounded buffer.
const MAX_BODY_SIZE: usize = 1024 * 1024;
const CONNECTION_TIMEOUT_SECS: u64 = 30;
const KEEPALIVE_TIMEOUT_SECS: u64 = 5;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

/// Bind and run the accept loop until a shutdown signal arrives.
pub async fn run(config: Config, driver: Arc<Driver>) -> io::Result<()> {
    let listener = TcpListener::bind(config.bind_address()).await?;
    info!(addr = %config.bind_address(), "proximate listening");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _)) => {
                        let _ = stream.set_nodelay(true);
                        let driver = Arc::clone(&driver);
                        let config = config.clone();
                        tokio::spawn(handle_connection(stream, driver, config));
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                }
            }
            _ = shutdown_signal() => {
                info!("shutdown signal received, stopping server");
                SHUTDOWN.store(true, Ordering::Relaxed);
                break;
            }
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn handle_connection(mut stream: TcpStream, driver: Arc<Driver>, config: Config) {
    let result = timeout(
        Duration::from_secs(CONNECTION_TIMEOUT_SECS),
        handle_connection_inner(&mut stream, &driver, &config),
    )
    .await;

    if let Ok(Err(e)) = result {
        warn!(error = %e, "connection handling failed");
    }
}

/// What came off the wire for one request, fully read before anything is
/// written back — keeping the read phase and the write phase from ever
/// needing overlapping borrows of the same `TcpStream`.
enum ReadOutcome {
    /// Connection closed, or idle past the keep-alive timeout.
    Done,
    /// A blank line between keep-alive requests; read the next one.
    KeepAliveBlank,
    /// Something was wrong with the request; report this status and close.
    Reject(u16, &'static str),
    Request { request: InboundRequest, keep_alive: bool },
}

async fn handle_connection_inner(stream: &mut TcpStream, driver: &Driver, config: &Config) -> io::Result<()> {
    loop {
        if SHUTDOWN.load(Ordering::Relaxed) {
            return Ok(());
        }

        match read_request(stream).await? {
            ReadOutcome::Done => return Ok(()),
            ReadOutcome::KeepAliveBlank => continue,
            ReadOutcome::Reject(status, reason) => {
                write_simple_response(stream, status, reason).await?;
                return Ok(());
            }
            ReadOutcome::Request { request, keep_alive } => {
                if health::is_health_check(&request.path, &config.health_check_path) {
                    let healthy =
                        health::is_healthy(config.healthy_if_file.as_deref(), config.healthy_unless_file.as_deref());
                    let (status, reason) = if healthy { (200, "OK") } else { (503, "Service Unavailable") };
                    write_simple_response(stream, status, reason).await?;
                } else {
                    let mut sink = TcpStreamSink::new(stream);
                    if let Err(e) = driver.drive(request, &mut sink).await {
                        warn!(error = %e, "request handling ended with an error");
                    }
                    sink.finish().await?;
                }

                if !keep_alive {
                    return Ok(());
                }
            }
        }
    }
}

/// Reads one request-line, its headers, and its body (per Content-Length) in
/// full before returning, so the `BufReader` it creates never outlives this
/// call.
async fn read_request(stream: &mut TcpStream) -> io::Result<ReadOutcome> {
    let mut reader = BufReader::new(stream);
    let mut request_line = Vec::with_capacity(128);

    match timeout(Duration::from_secs(KEEPALIVE_TIMEOUT_SECS), read_line_bytes(&mut reader, &mut request_line)).await {
        Ok(Ok(0)) | Err(_) => return Ok(ReadOutcome::Done),
        Ok(Err(e)) => return Err(e),
        Ok(Ok(n)) if n > MAX_REQUEST_LINE_SIZE => return Ok(ReadOutcome::Reject(414, "URI Too Long")),
        Ok(Ok(_)) => {}
    }

    let trimmed = trim_header_line(&request_line);
    if trimmed.is_empty() {
        return Ok(ReadOutcome::KeepAliveBlank);
    }

    let (method, path, version) = match parse_request_line_fast(trimmed) {
        Some(parts) => parts,
        None => return Ok(ReadOutcome::Reject(400, "Bad Request")),
    };
    let method = String::from_utf8_lossy(method).to_string();
    let path = path.to_string();
    let version = version.to_string();

    let mut headers: Vec<(String, String)> = Vec::new();
    let mut header_buffer = Vec::with_capacity(256);
    loop {
        header_buffer.clear();
        match read_line_bytes(&mut reader, &mut header_buffer).await {
            Ok(0) => return Ok(ReadOutcome::Done), // connection closed mid-headers
            Ok(_) => {
                let line = trim_header_line(&header_buffer);
                if line.is_empty() {
                    break; // end of headers
                }
                if headers.len() * 48 > MAX_HEADER_SIZE {
                    return Ok(ReadOutcome::Reject(431, "Request Header Fields Too Large"));
                }
                if let Some((name, value)) = split_header_line(line) {
                    headers.push((name.to_string(), value.to_string()));
                }
            }
            Err(e) => return Err(e),
        }
    }

    let content_length = headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    if content_length > MAX_BODY_SIZE {
        return Ok(ReadOutcome::Reject(413, "Payload Too Large"));
    }

    let mut body = vec![0u8; content_length];
    if content_length > 0 {
        reader.read_exact(&mut body).await?;
    }

    let host = headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("host"))
        .map(|(_, v)| v.clone())
        .unwrap_or_default();
    let url = format!("http://{host}{path}");

    let keep_alive = version == "HTTP/1.1"
        && !headers
            .iter()
            .any(|(name, value)| name.eq_ignore_ascii_case("connection") && value.eq_ignore_ascii_case("close"));

    Ok(ReadOutcome::Request {
        request: InboundRequest { method, host, path, url, protocol: version, headers, body },
        keep_alive,
    })
}

async fn write_simple_response(stream: &mut TcpStream, status: u16, reason: &str) -> io::Result<()> {
    let body = reason.as_bytes();
    let response = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{reason}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await
}

/// A [`ResponseSink`] that writes directly to a `TcpStream`. The status
/// line and headers are buffered at `write_header` time (the trait's
/// `write_header` is synchronous) and flushed lazily on the first `write`,
/// or by an explicit `finish()` for a response with an empty body.
struct TcpStreamSink<'a> {
    stream: &'a mut TcpStream,
    pending_header: Option<(u16, Vec<(String, String)>)>,
}

impl<'a> TcpStreamSink<'a> {
    fn new(stream: &'a mut TcpStream) -> Self {
        Self { stream, pending_header: None }
    }

    async fn finish(&mut self) -> io::Result<()> {
        self.flush_header_if_pending().await?;
        self.stream.flush().await
    }

    async fn flush_header_if_pending(&mut self) -> io::Result<()> {
        let Some((status, headers)) = self.pending_header.take() else { return Ok(()) };

        let mut out = format!("HTTP/1.1 {} {}\r\n", status, reason_phrase(status)).into_bytes();
        for (name, value) in &headers {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        self.stream.write_all(&out).await
    }
}

#[async_trait]
impl ResponseSink for TcpStreamSink<'_> {
    fn write_header(&mut self, status: u16, headers: &[(String, String)]) -> io::Result<()> {
        self.pending_header = Some((status, headers.to_vec()));
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.flush_header_if_pending().await?;
        self.stream.write_all(data).await
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Unknown",
    }
}

/// Reads one line (up to and including `\n`) into `buffer`, appending across
/// calls if the line spans multiple reads.
async fn read_line_bytes(reader: &mut BufReader<&mut TcpStream>, buffer: &mut Vec<u8>) -> io::Result<usize> {
    let mut total = 0;
    loop {
        let n = reader.read_until(b'\n', buffer).await?;
        total += n;
        if n == 0 || buffer.ends_with(b"\n") {
            break;
        }
    }
    Ok(total)
}

/// Trims trailing CRLF/whitespace and leading whitespace from a raw line.
fn trim_header_line(line: &[u8]) -> &[u8] {
    let mut start = 0;
    let mut end = line.len();

    while end > 0 {
        match line[end - 1] {
            b'\r' | b'\n' | b' ' | b'\t' => end -= 1,
            _ => break,
        }
    }
    while start < end {
        match line[start] {
            b' ' | b'\t' => start += 1,
            _ => break,
        }
    }

    &line[start..end]
}

/// Zero-allocation HTTP request-line parser.
fn parse_request_line_fast(request: &[u8]) -> Option<(&[u8], &str, &str)> {
    let mut parts = request.split(|&b| b == b' ').filter(|part| !part.is_empty());

    let method = parts.next()?;
    let path_bytes = parts.next()?;
    let version_bytes = parts.next()?;
    if parts.next().is_some() {
        return None;
    }

    let path = std::str::from_utf8(path_bytes).ok()?;
    let version = std::str::from_utf8(version_bytes).ok()?;
    if method.is_empty() || path.is_empty() || version.is_empty() {
        return None;
    }

    Some((method, path, version))
}

/// Splits a trimmed header line on its first `:` into (name, value), both
/// trimmed of surrounding whitespace. Handles arbitrary header names,
/// since the proxy must forward every header rather than pick a handful
/// out by name.
fn split_header_line(line: &[u8]) -> Option<(&str, &str)> {
    let colon = line.iter().position(|&b| b == b':')?;
    let name = std::str::from_utf8(&line[..colon]).ok()?;
    let mut value_start = colon + 1;
    while value_start < line.len() && (line[value_start] == b' ' || line[value_start] == b'\t') {
        value_start += 1;
    }
    let value = std::str::from_utf8(&line[value_start..]).ok()?;
    if name.is_empty() {
        return None;
    }
    Some((name, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_simple_request_line() {
        let (method, path, version) = parse_request_line_fast(b"GET /foo HTTP/1.1").unwrap();
        assert_eq!(method, b"GET");
        assert_eq!(path, "/foo");
        assert_eq!(version, "HTTP/1.1");
    }

    #[test]
    fn rejects_a_request_line_with_extra_parts() {
        assert!(parse_request_line_fast(b"GET /foo HTTP/1.1 extra").is_none());
    }

    #[test]
    fn trims_crlf_and_surrounding_whitespace() {
        assert_eq!(trim_header_line(b"  Host: example.com\r\n"), b"Host: example.com");
    }

    #[test]
    fn splits_header_name_and_value() {
        let (name, value) = split_header_line(b"Content-Type: application/json").unwrap();
        assert_eq!(name, "Content-Type");
        assert_eq!(value, "application/json");
    }

    #[test]
    fn splits_header_with_no_space_after_colon() {
        let (name, value) = split_header_line(b"X-Foo:bar").unwrap();
        assert_eq!(name, "X-Foo");
        assert_eq!(value, "bar");
    }

    #[test]
    fn rejects_a_line_with_no_colon() {
        assert!(split_header_line(b"not a header").is_none());
    }
}
