use dashmap::DashMap;
use std::net::{Shutdown, SocketAddr, TcpStream};
use tracing::{trace, warn};

/// Registry of live connections, keyed by remote address.
///
/// Holds a cloned socket handle per connection so shutdown can close every
/// socket out from under its handler.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<SocketAddr, TcpStream>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, peer: SocketAddr, handle: TcpStream) {
        self.connections.insert(peer, handle);
    }

    pub fn unregister(&self, peer: &SocketAddr) {
        self.connections.remove(peer);
    }

    /// Get number of active connections
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Shut down both directions of every registered socket. Handlers blocked
    /// on the socket see EOF or a broken pipe. Entries stay until their
    /// handler deregisters. Returns how many sockets were closed.
    pub fn close_all(&self) -> usize {
        let mut closed = 0;
        // shutdown(2) never blocks, so holding the shard guard here is fine
        for entry in self.connections.iter() {
            match entry.value().shutdown(Shutdown::Both) {
                Ok(()) => closed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotConnected => {
                    trace!(peer = %entry.key(), "already disconnected");
                }
                Err(e) => warn!(peer = %entry.key(), error = %e, "failed to close connection"),
            }
        }
        closed
    }
}
