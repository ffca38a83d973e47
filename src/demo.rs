//! Built-in demo applications, served via `demo:hello` / `demo:slow`

use crate::app::{Request, Response, SharedApp};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

/// Plain greeting, handy for smoke tests.
pub fn hello() -> SharedApp {
    Arc::new(|req: &Request| -> Result<Response> {
        Ok(Response::new(200)
            .with_header("Content-Type", "text/plain; charset=utf-8")
            .with_body(format!("hello from relay-core\npath: {}\n", req.path)))
    })
}

/// Sleeps before answering. Exists to exercise drain behavior: start a
/// request, hit Ctrl+C, watch it finish while new connections are refused.
pub fn slow() -> SharedApp {
    slow_with_delay(Duration::from_secs(5))
}

pub fn slow_with_delay(delay: Duration) -> SharedApp {
    Arc::new(move |req: &Request| -> Result<Response> {
        std::thread::sleep(delay);
        Ok(Response::new(200)
            .with_header("Content-Type", "text/plain; charset=utf-8")
            .with_body(format!("slow response after {:?} for {}\n", delay, req.path)))
    })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::App;

    fn request(path: &str) -> Request {
        Request {
            method: "GET".to_string(),
            path: path.to_string(),
            headers: Vec::new(),
            peer: "127.0.0.1:1234".parse().unwrap(),
        }
    }

    #[test]
    fn test_hello_echoes_path() {
        let resp = hello().call(&request("/abc")).unwrap();
        assert_eq!(resp.status, 200);
        let body = String::from_utf8(resp.body.concat()).unwrap();
        assert!(body.contains("/abc"));
    }

    #[test]
    fn test_slow_waits() {
        let app = slow_with_delay(Duration::from_millis(40));
        let start = std::time::Instant::now();
        let resp = app.call(&request("/")).unwrap();
        assert_eq!(resp.status, 200);
        assert!(start.elapsed() >= Duration::from_millis(40));
    }
}
