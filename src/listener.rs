//! Listening socket collaborator
//!
//! The dispatch loop only sees the `Listener` trait: an accept bounded by
//! the poll interval. `TcpBoundListener` is the production implementation,
//! a non-blocking TcpListener behind poll(2).

use crate::connection::ConnectionContext;
use anyhow::{Context, Result};
use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener};
use std::os::unix::io::AsRawFd;
use std::time::Duration;

/// Accept source consumed by the dispatcher.
pub trait Listener {
    /// Wait up to `timeout` for a connection. `Ok(None)` on timeout - the
    /// expected idle case, simply re-looped by the caller.
    fn accept(&self, timeout: Duration) -> Result<Option<ConnectionContext>>;
}

/// TCP listener bound to a host/port pair; owns the listening socket.
pub struct TcpBoundListener {
    inner: TcpListener,
}

impl TcpBoundListener {
    pub fn bind(host: &str, port: u16) -> Result<Self> {
        let inner = TcpListener::bind((host, port))
            .with_context(|| format!("bind {}:{}", host, port))?;
        // Non-blocking plus poll: the poll interval, not the kernel, decides
        // how long accept may park the dispatch loop.
        inner.set_nonblocking(true).context("set_nonblocking")?;
        Ok(Self { inner })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.inner.local_addr().context("local_addr")
    }
}

impl Listener for TcpBoundListener {
    fn accept(&self, timeout: Duration) -> Result<Option<ConnectionContext>> {
        let mut pfd = libc::pollfd {
            fd: self.inner.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as libc::c_int;

        let ready = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        if ready < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == ErrorKind::Interrupted {
                // Signal landed mid-poll; the loop re-checks state anyway
                return Ok(None);
            }
            return Err(err).context("poll on listening socket");
        }
        if ready == 0 {
            return Ok(None);
        }

        match self.inner.accept() {
            Ok((stream, peer)) => {
                stream
                    .set_nonblocking(false)
                    .context("reset accepted socket to blocking")?;
                Ok(Some(ConnectionContext::new(stream, peer)))
            }
            // Raced with another accept or the connection died in the
            // backlog; nothing to hand out this round.
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e).context("accept"),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpStream;

    #[test]
    fn test_timeout_returns_none() {
        let listener = TcpBoundListener::bind("127.0.0.1", 0).unwrap();
        let start = std::time::Instant::now();
        let result = listener.accept(Duration::from_millis(30)).unwrap();
        assert!(result.is_none());
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn test_accepts_pending_connection() {
        let listener = TcpBoundListener::bind("127.0.0.1", 0).unwrap();
        let addr = listener.local_addr().unwrap();
        let _client = TcpStream::connect(addr).unwrap();

        let conn = listener
            .accept(Duration::from_millis(500))
            .unwrap()
            .expect("connection pending");
        assert_eq!(conn.peer_addr().ip(), addr.ip());
    }

    #[test]
    fn test_bind_ephemeral_port() {
        let listener = TcpBoundListener::bind("127.0.0.1", 0).unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }
}
