//! Error types for the session layer.

use tubewire_pipeline::PipelineError;
use tubewire_protocol::{ProtocolError, Response, ServerError};
use tubewire_reconnect::ReconnectError;

/// Errors returned by [`Session`](crate::Session) operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    /// No connection is ready: never connected, reconnecting, replaying
    /// tube state, or disconnected. The request was not queued.
    #[error("not connected")]
    NotConnected,

    /// `connect` was called while the session is connected or connecting.
    #[error("session is already connected")]
    AlreadyConnected,

    /// The request was rejected, failed to decode, or was lost with its
    /// connection.
    #[error(transparent)]
    Request(PipelineError),

    /// The server answered with a reply that doesn't fit the command.
    #[error("unexpected reply to {command}: {response:?}")]
    UnexpectedResponse {
        command: &'static str,
        response: Box<Response>,
    },

    /// The session's background tasks have stopped.
    #[error("session has shut down")]
    Shutdown,
}

impl SessionError {
    /// The server's error word, if that is what failed the request.
    ///
    /// Useful for expected outcomes such as `TIMED_OUT` from
    /// `reserve-with-timeout` or `NOT_FOUND` from `peek`.
    pub fn server_error(&self) -> Option<&ServerError> {
        match self {
            Self::Request(PipelineError::Decode(ProtocolError::Server(e))) => Some(e),
            _ => None,
        }
    }
}

impl From<PipelineError> for SessionError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::NotConnected => Self::NotConnected,
            other => Self::Request(other),
        }
    }
}

impl From<ReconnectError> for SessionError {
    fn from(e: ReconnectError) -> Self {
        match e {
            ReconnectError::AlreadyConnected => Self::AlreadyConnected,
            ReconnectError::Shutdown => Self::Shutdown,
        }
    }
}
