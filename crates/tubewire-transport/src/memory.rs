//! In-process transport: a connector and a listener joined by channels.
//!
//! [`channel()`] returns a [`MemoryConnector`] for the client side and a
//! [`MemoryListener`] that plays the server. Every successful
//! [`connect`](Connector::connect) produces a duplex pair of
//! [`MemoryConnection`]s; the client keeps one and the listener hands out
//! the other through [`MemoryListener::accept`].
//!
//! The listener can be told to refuse connections, and it records the
//! instant of every attempt, so reconnect timing can be observed under
//! `tokio::time::pause()`.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::{Mutex, mpsc};
use tokio::time::Instant;

use crate::{Connection, ConnectionId, Connector, Endpoint, TransportError};

/// Memory connections count down from the top so they never collide with
/// TCP connection IDs in logs.
static NEXT_MEMORY_ID: AtomicU64 = AtomicU64::new(u64::MAX / 2);

struct Shared {
    accepting: AtomicBool,
    accepted: mpsc::UnboundedSender<MemoryConnection>,
    attempts: mpsc::UnboundedSender<Attempt>,
}

/// One recorded connection attempt.
#[derive(Debug, Clone, Copy)]
pub struct Attempt {
    /// When the attempt was made (tokio clock, so it honours paused time).
    pub at: Instant,
    /// Whether the listener accepted it.
    pub accepted: bool,
}

/// Creates a linked connector/listener pair.
///
/// The listener starts out accepting connections.
pub fn channel() -> (MemoryConnector, MemoryListener) {
    let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
    let (attempts_tx, attempts_rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared {
        accepting: AtomicBool::new(true),
        accepted: accepted_tx,
        attempts: attempts_tx,
    });
    (
        MemoryConnector {
            shared: Arc::clone(&shared),
        },
        MemoryListener {
            shared,
            accepted: accepted_rx,
            attempts: attempts_rx,
        },
    )
}

/// Client half of [`channel()`].
#[derive(Clone)]
pub struct MemoryConnector {
    shared: Arc<Shared>,
}

impl Connector for MemoryConnector {
    type Connection = MemoryConnection;
    type Error = TransportError;

    async fn connect(
        &self,
        endpoint: &Endpoint,
    ) -> Result<Self::Connection, Self::Error> {
        let accepted = self.shared.accepting.load(Ordering::SeqCst);
        let _ = self.shared.attempts.send(Attempt {
            at: Instant::now(),
            accepted,
        });

        if !accepted {
            return Err(TransportError::ConnectFailed(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("{endpoint} refused the connection"),
            )));
        }

        let (client, server) = MemoryConnection::pair();
        self.shared.accepted.send(server).map_err(|_| {
            TransportError::ConnectFailed(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("{endpoint} has no listener"),
            ))
        })?;
        Ok(client)
    }
}

/// Server half of [`channel()`].
pub struct MemoryListener {
    shared: Arc<Shared>,
    accepted: mpsc::UnboundedReceiver<MemoryConnection>,
    attempts: mpsc::UnboundedReceiver<Attempt>,
}

impl MemoryListener {
    /// Waits for the next accepted connection and returns its server side.
    pub async fn accept(&mut self) -> Option<MemoryConnection> {
        self.accepted.recv().await
    }

    /// Waits for the next connection attempt, accepted or refused.
    pub async fn next_attempt(&mut self) -> Option<Attempt> {
        self.attempts.recv().await
    }

    /// Starts or stops accepting connections. Existing links are untouched.
    pub fn set_accepting(&self, accepting: bool) {
        self.shared.accepting.store(accepting, Ordering::SeqCst);
    }
}

/// One end of an in-memory duplex link.
pub struct MemoryConnection {
    id: ConnectionId,
    incoming: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    outgoing: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
}

impl MemoryConnection {
    /// Creates two connected ends. Bytes sent on one arrive on the other.
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        let a = Self {
            id: ConnectionId::new(
                NEXT_MEMORY_ID.fetch_sub(1, Ordering::Relaxed),
            ),
            incoming: Mutex::new(b_rx),
            outgoing: Mutex::new(Some(a_tx)),
        };
        let b = Self {
            id: a.id,
            incoming: Mutex::new(a_rx),
            outgoing: Mutex::new(Some(b_tx)),
        };
        (a, b)
    }
}

impl Connection for MemoryConnection {
    type Error = TransportError;

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
        let outgoing = self.outgoing.lock().await;
        let Some(tx) = outgoing.as_ref() else {
            return Err(TransportError::ConnectionClosed(
                "closed locally".into(),
            ));
        };
        tx.send(data.to_vec()).map_err(|_| {
            TransportError::ConnectionClosed("peer went away".into())
        })
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        Ok(self.incoming.lock().await.recv().await)
    }

    async fn close(&self) -> Result<(), Self::Error> {
        // Dropping the sender is what the peer observes as end-of-stream.
        self.outgoing.lock().await.take();
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}
