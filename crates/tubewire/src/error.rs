//! Unified error type for Tubewire.

use tubewire_pipeline::PipelineError;
use tubewire_protocol::ProtocolError;
use tubewire_reconnect::ReconnectError;
use tubewire_session::SessionError;
use tubewire_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `tubewire` meta-crate, you deal with this single
/// error type instead of importing errors from each sub-crate.
/// The `#[from]` attribute on each variant auto-generates `From` impls,
/// so the `?` operator converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum TubewireError {
    /// A transport-level error (connect, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (invalid request, malformed or error reply).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A request failed on its connection.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// The reconnect supervisor refused a request or has stopped.
    #[error(transparent)]
    Reconnect(#[from] ReconnectError),

    /// A session-level error (not connected, unexpected reply).
    #[error(transparent)]
    Session(#[from] SessionError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::ConnectionClosed("gone".into());
        let tubewire_err: TubewireError = err.into();
        assert!(matches!(tubewire_err, TubewireError::Transport(_)));
        assert!(tubewire_err.to_string().contains("gone"));
    }

    #[test]
    fn test_from_protocol_error() {
        let err = ProtocolError::Malformed("bad".into());
        let tubewire_err: TubewireError = err.into();
        assert!(matches!(tubewire_err, TubewireError::Protocol(_)));
    }

    #[test]
    fn test_from_pipeline_error() {
        let err = PipelineError::ConnectionLost("reset".into());
        let tubewire_err: TubewireError = err.into();
        assert!(matches!(tubewire_err, TubewireError::Pipeline(_)));
        assert!(tubewire_err.to_string().contains("reset"));
    }

    #[test]
    fn test_from_reconnect_error() {
        let tubewire_err: TubewireError = ReconnectError::AlreadyConnected.into();
        assert!(matches!(tubewire_err, TubewireError::Reconnect(_)));
    }

    #[test]
    fn test_from_session_error() {
        let tubewire_err: TubewireError = SessionError::NotConnected.into();
        assert!(matches!(tubewire_err, TubewireError::Session(_)));
        assert_eq!(tubewire_err.to_string(), "not connected");
    }
}
