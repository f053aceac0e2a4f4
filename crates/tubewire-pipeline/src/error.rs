//! Error types for the pipeline layer.

use tubewire_protocol::ProtocolError;

/// Errors a caller can observe for a single pipelined request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    /// The request could not be encoded; nothing was sent.
    #[error("encode failed: {0}")]
    Encode(ProtocolError),

    /// The reply could not be decoded, or the server answered with an
    /// error word. Only this request is affected.
    #[error("decode failed: {0}")]
    Decode(ProtocolError),

    /// The connection went away while the request was in flight.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// There is no open connection to send the request on.
    #[error("not connected")]
    NotConnected,
}

/// Framing failures that poison the whole byte stream.
///
/// These are not per-request errors: once the stream can no longer be
/// split into replies reliably, the connection is closed and every
/// pending request fails with [`PipelineError::ConnectionLost`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FramingError {
    /// A reply line exceeded the configured limit without a terminator.
    #[error("reply line longer than {limit} bytes")]
    LineTooLong { limit: usize },

    /// A reply header announced a raw section over the configured limit.
    #[error("reply announced {announced} raw bytes, limit is {limit}")]
    BodyTooLong { announced: usize, limit: usize },

    /// Bytes arrived while no request was waiting for them.
    #[error("unsolicited data from server: {0:?}")]
    Unsolicited(String),
}
