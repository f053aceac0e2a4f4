//! Error types for the reconnect supervisor.

/// Errors returned by [`SupervisorHandle`](crate::SupervisorHandle) calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconnectError {
    /// `connect` was called while connecting, connected, or waiting to
    /// retry. Call `disconnect` first.
    #[error("already connected or connecting")]
    AlreadyConnected,

    /// The supervisor task has stopped.
    #[error("reconnect supervisor has shut down")]
    Shutdown,
}
