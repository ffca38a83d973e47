//! Per-connection handler collaborator
//!
//! The wire protocol lives here, outside the dispatch/pool/shutdown core:
//! the core hands a `ConnectionContext` to a `ConnectionHandler` and never
//! inspects request bytes itself. `HttpConnectionHandler` is the stock
//! implementation: parse one HTTP/1.0-style request head, invoke the app,
//! write the response, done.

use crate::app::{Request, Response, SharedApp};
use crate::connection::ConnectionContext;
use anyhow::{bail, Context, Result};
use std::io::{Read, Write};
use std::time::Duration;

/// Maximum accepted request head (request line + headers).
const MAX_HEAD_BYTES: usize = 8 * 1024;

/// Hard cap on how long a worker waits for a request head.
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// One request/response cycle over an accepted connection.
pub trait ConnectionHandler: Send + Sync {
    fn handle(&self, conn: &mut ConnectionContext) -> Result<()>;
}

pub struct HttpConnectionHandler {
    app: SharedApp,
}

impl HttpConnectionHandler {
    pub fn new(app: SharedApp) -> Self {
        Self { app }
    }
}

impl ConnectionHandler for HttpConnectionHandler {
    fn handle(&self, conn: &mut ConnectionContext) -> Result<()> {
        let peer = conn.peer_addr();
        let stream = conn.stream_mut().context("connection already closed")?;
        stream
            .set_read_timeout(Some(READ_TIMEOUT))
            .context("set read timeout")?;

        let head = read_head(stream)?;
        let request = parse_request(&head, peer)?;
        let response = self
            .app
            .call(&request)
            .with_context(|| format!("app failed on {} {}", request.method, request.path))?;
        write_response(stream, &response)?;
        Ok(())
    }
}

/// Read until the blank line terminating the request head.
fn read_head(stream: &mut impl Read) -> Result<Vec<u8>> {
    let mut head = Vec::with_capacity(512);
    let mut byte = [0u8; 1];

    loop {
        let n = stream.read(&mut byte).context("read request head")?;
        if n == 0 {
            bail!("connection closed before request head completed");
        }
        head.push(byte[0]);
        if head.ends_with(b"\r\n\r\n") || head.ends_with(b"\n\n") {
            return Ok(head);
        }
        if head.len() > MAX_HEAD_BYTES {
            bail!("request head exceeds {} bytes", MAX_HEAD_BYTES);
        }
    }
}

fn parse_request(head: &[u8], peer: std::net::SocketAddr) -> Result<Request> {
    let text = std::str::from_utf8(head).context("request head is not UTF-8")?;
    let mut lines = text.split("\r\n").flat_map(|l| l.split('\n'));

    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let method = parts.next().context("missing method")?.to_string();
    let path = parts.next().context("missing path")?.to_string();

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    Ok(Request {
        method,
        path,
        headers,
        peer,
    })
}

fn write_response(stream: &mut impl Write, response: &Response) -> Result<()> {
    let mut out = Vec::with_capacity(256 + response.content_length());
    out.extend_from_slice(
        format!(
            "HTTP/1.0 {} {}\r\n",
            response.status,
            reason_phrase(response.status)
        )
        .as_bytes(),
    );
    for (name, value) in &response.headers {
        out.extend_from_slice(format!("{}: {}\r\n", name, value).as_bytes());
    }
    out.extend_from_slice(format!("Content-Length: {}\r\n", response.content_length()).as_bytes());
    out.extend_from_slice(b"Connection: close\r\n\r\n");
    for chunk in &response.body {
        out.extend_from_slice(chunk);
    }

    stream.write_all(&out).context("write response")?;
    stream.flush().context("flush response")?;
    Ok(())
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::App;
    use anyhow::anyhow;
    use std::io::Cursor;
    use std::net::{TcpListener, TcpStream};
    use std::sync::Arc;

    #[test]
    fn test_parse_request_line_and_headers() {
        let head = b"GET /status?v=1 HTTP/1.1\r\nHost: example.com\r\nX-Id: 7\r\n\r\n";
        let req = parse_request(head, "127.0.0.1:1000".parse().unwrap()).unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/status?v=1");
        assert_eq!(req.header("host"), Some("example.com"));
        assert_eq!(req.header("x-id"), Some("7"));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_request(b"\r\n\r\n", "127.0.0.1:1000".parse().unwrap()).is_err());
    }

    #[test]
    fn test_read_head_stops_at_blank_line() {
        let mut input = Cursor::new(b"GET / HTTP/1.0\r\n\r\ntrailing body bytes".to_vec());
        let head = read_head(&mut input).unwrap();
        assert_eq!(head, b"GET / HTTP/1.0\r\n\r\n");
    }

    #[test]
    fn test_read_head_rejects_oversize() {
        let mut input = Cursor::new(vec![b'x'; MAX_HEAD_BYTES + 10]);
        assert!(read_head(&mut input).is_err());
    }

    #[test]
    fn test_read_head_rejects_truncated() {
        let mut input = Cursor::new(b"GET / HT".to_vec());
        assert!(read_head(&mut input).is_err());
    }

    #[test]
    fn test_write_response_shape() {
        let resp = Response::new(404)
            .with_header("Content-Type", "text/plain")
            .with_body("gone");
        let mut out = Vec::new();
        write_response(&mut out, &resp).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.0 404 Not Found\r\n"));
        assert!(text.contains("Content-Type: text/plain\r\n"));
        assert!(text.contains("Content-Length: 4\r\n"));
        assert!(text.ends_with("\r\n\r\ngone"));
    }

    #[test]
    fn test_handle_full_cycle() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let client_thread = std::thread::spawn(move || {
            let mut client = TcpStream::connect(addr).unwrap();
            client
                .write_all(b"GET /greet HTTP/1.0\r\nHost: test\r\n\r\n")
                .unwrap();
            let mut response = String::new();
            client.read_to_string(&mut response).unwrap();
            response
        });

        let (stream, peer) = listener.accept().unwrap();
        let mut conn = ConnectionContext::new(stream, peer);

        let app: SharedApp = Arc::new(|req: &Request| -> Result<Response> {
            Ok(Response::new(200).with_body(format!("path={}", req.path)))
        });
        HttpConnectionHandler::new(app).handle(&mut conn).unwrap();
        conn.close();

        let response = client_thread.join().unwrap();
        assert!(response.starts_with("HTTP/1.0 200 OK"));
        assert!(response.ends_with("path=/greet"));
    }

    #[test]
    fn test_app_error_propagates_with_context() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let client_thread = std::thread::spawn(move || {
            let mut client = TcpStream::connect(addr).unwrap();
            client.write_all(b"GET /boom HTTP/1.0\r\n\r\n").unwrap();
            let mut sink = Vec::new();
            let _ = client.read_to_end(&mut sink);
        });

        let (stream, peer) = listener.accept().unwrap();
        let mut conn = ConnectionContext::new(stream, peer);

        struct FailingApp;
        impl App for FailingApp {
            fn call(&self, _: &Request) -> Result<Response> {
                Err(anyhow!("database down"))
            }
        }

        let err = HttpConnectionHandler::new(Arc::new(FailingApp))
            .handle(&mut conn)
            .unwrap_err();
        assert!(format!("{:?}", err).contains("database down"));
        assert!(format!("{:?}", err).contains("/boom"));

        conn.close();
        client_thread.join().unwrap();
    }
}
