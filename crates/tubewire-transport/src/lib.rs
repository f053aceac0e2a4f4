//! Transport abstraction layer for Tubewire.
//!
//! Provides the [`Connector`] and [`Connection`] traits that abstract over
//! how a client reaches the work-queue server. The layers above only need
//! "write these bytes" and "give me the next bytes that arrived".
//!
//! # Feature Flags
//!
//! - `tcp` (default): plain TCP via `tokio::net::TcpStream`
//!
//! The [`memory`] transport is always available; it links a client and an
//! in-process peer without touching the network, which is what the test
//! suites of the higher layers run on.

mod error;
pub mod memory;
#[cfg(feature = "tcp")]
mod tcp;

pub use error::TransportError;
#[cfg(feature = "tcp")]
pub use tcp::{TcpConnection, TcpConnector};

use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Where to connect: a host name (or address literal) and a port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Creates an endpoint from a host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

/// beanstalkd listens on 11300 unless told otherwise.
impl Default for Endpoint {
    fn default() -> Self {
        Self::new("127.0.0.1", 11300)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Establishes outgoing connections.
///
/// Implementations are cloned into the reconnect supervisor, which calls
/// [`connect`](Self::connect) once per attempt.
pub trait Connector: Clone + Send + Sync + 'static {
    /// The connection type produced by this connector.
    type Connection: Connection;
    /// The error type for connection establishment.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Opens a new connection to `endpoint`.
    fn connect(
        &self,
        endpoint: &Endpoint,
    ) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send;
}

/// A single connection that can send and receive bytes.
///
/// Both directions take `&self` so one task can wait on
/// [`recv`](Self::recv) while another sends.
pub trait Connection: Send + Sync + 'static {
    /// The error type for connection operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Sends data to the remote peer.
    fn send(
        &self,
        data: &[u8],
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Receives the next chunk of bytes from the remote peer.
    ///
    /// Chunk boundaries carry no meaning: a reply may be split across
    /// several chunks, and one chunk may hold several replies.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed.
    fn recv(
        &self,
    ) -> impl Future<Output = Result<Option<Vec<u8>>, Self::Error>> + Send;

    /// Closes the connection.
    fn close(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_new_and_into_inner() {
        let id = ConnectionId::new(42);
        assert_eq!(id.into_inner(), 42);
    }

    #[test]
    fn test_connection_id_display() {
        let id = ConnectionId::new(7);
        assert_eq!(id.to_string(), "conn-7");
    }

    #[test]
    fn test_endpoint_display_is_host_colon_port() {
        let endpoint = Endpoint::new("queue.internal", 11301);
        assert_eq!(endpoint.to_string(), "queue.internal:11301");
    }

    #[test]
    fn test_endpoint_default_is_local_beanstalkd() {
        let endpoint = Endpoint::default();
        assert_eq!(endpoint.host, "127.0.0.1");
        assert_eq!(endpoint.port, 11300);
    }
}
