//! Request/response calling convention served by the gateway
//!
//! The core never interprets these values; it only hands a `Request` to the
//! configured `App` and ships the returned `Response` back through the
//! connection handler.

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;

/// Request environment handed to the application.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub peer: SocketAddr,
}

impl Request {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Status, headers and a body sequence.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<Vec<u8>>,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, chunk: impl Into<Vec<u8>>) -> Self {
        self.body.push(chunk.into());
        self
    }

    pub fn content_length(&self) -> usize {
        self.body.iter().map(Vec::len).sum()
    }
}

/// The served callable. One synchronous request/response cycle per call.
///
/// Implementations must be shareable across pool workers; per-request state
/// belongs in locals, not in `self`.
pub trait App: Send + Sync {
    fn call(&self, request: &Request) -> Result<Response>;
}

pub type SharedApp = Arc<dyn App>;

/// Blanket impl so plain functions and closures can be served directly.
impl<F> App for F
where
    F: Fn(&Request) -> Result<Response> + Send + Sync,
{
    fn call(&self, request: &Request) -> Result<Response> {
        self(request)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
