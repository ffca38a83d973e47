//! Accepted-connection handle with exactly-once teardown

use std::net::{SocketAddr, TcpStream};

/// An accepted connection plus its peer address.
///
/// Owned exclusively by whichever component currently holds it: the
/// dispatcher until submission, then the pool worker executing it.
/// `close()` is idempotent; teardown errors are suppressed. Dropping an
/// unclosed context closes it, so a context can never leak its socket.
pub struct ConnectionContext {
    stream: Option<TcpStream>,
    peer: SocketAddr,
}

impl ConnectionContext {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream: Some(stream),
            peer,
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Mutable access to the underlying stream, `None` once closed.
    pub fn stream_mut(&mut self) -> Option<&mut TcpStream> {
        self.stream.as_mut()
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    /// Release this holder's descriptor. Safe to call more than once.
    ///
    /// Close only, never `shutdown(2)`: in process mode the parent and a
    /// forked worker share the socket description, and a shutdown from the
    /// parent would sever the worker's connection mid-request. The kernel
    /// sends FIN once the last descriptor is gone.
    pub fn close(&mut self) {
        drop(self.stream.take());
    }
}

impl Drop for ConnectionContext {
    fn drop(&mut self) {
        self.close();
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;

    fn connected_pair() -> (ConnectionContext, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (stream, peer) = listener.accept().unwrap();
        (ConnectionContext::new(stream, peer), client)
    }

    #[test]
    fn test_close_is_idempotent() {
        let (mut ctx, _client) = connected_pair();
        assert!(!ctx.is_closed());
        ctx.close();
        assert!(ctx.is_closed());
        ctx.close(); // second close is a no-op
        assert!(ctx.is_closed());
    }

    #[test]
    fn test_close_reaches_peer() {
        let (mut ctx, mut client) = connected_pair();
        ctx.close();

        let mut buf = [0u8; 8];
        // Peer observes EOF once the context is closed
        assert_eq!(client.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_drop_closes() {
        let (ctx, mut client) = connected_pair();
        drop(ctx);

        let mut buf = [0u8; 8];
        assert_eq!(client.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_stream_unavailable_after_close() {
        let (mut ctx, _client) = connected_pair();
        assert!(ctx.stream_mut().is_some());
        ctx.close();
        assert!(ctx.stream_mut().is_none());
    }
}
