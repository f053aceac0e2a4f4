//! Error types for the protocol layer.
//!
//! A `ProtocolError` always concerns exactly one request: either it could
//! not be encoded, or its reply could not be decoded (which includes the
//! server answering with one of its error words). It never says anything
//! about the health of the connection.

use std::fmt;

use crate::JobId;

/// Errors that can occur while encoding a request or decoding its reply.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The server answered with an error word instead of a result.
    #[error("server replied {0}")]
    Server(ServerError),

    /// The reply was well-formed but not one this command can produce.
    #[error("unexpected reply to {command}: {line:?}")]
    UnexpectedReply {
        /// Wire name of the command that was waiting.
        command: &'static str,
        /// The offending line, terminator stripped.
        line: String,
    },

    /// The reply could not be parsed at all.
    #[error("malformed reply: {0}")]
    Malformed(String),

    /// The request is invalid and was never sent (e.g., a bad tube name).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Error words the server can send in place of a successful reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerError {
    OutOfMemory,
    InternalError,
    BadFormat,
    UnknownCommand,
    /// A `put` body was not followed by `\r\n`.
    ExpectedCrlf,
    /// A `put` body exceeded the server's `max-job-size`.
    JobTooBig,
    /// The server is in drain mode and refuses new jobs.
    Draining,
    NotFound,
    /// `ignore` was asked to drop the last watched tube.
    NotIgnored,
    /// A reserve timeout expired without a job.
    TimedOut,
    /// A reserved job's time-to-run is about to expire.
    DeadlineSoon,
    /// The job was buried instead of stored or released. `put` reports the
    /// id of the buried job; `release` does not.
    Buried(Option<JobId>),
}

impl ServerError {
    /// Maps a general error word (valid in reply to any command).
    pub(crate) fn from_word(word: &str) -> Option<Self> {
        match word {
            "OUT_OF_MEMORY" => Some(Self::OutOfMemory),
            "INTERNAL_ERROR" => Some(Self::InternalError),
            "BAD_FORMAT" => Some(Self::BadFormat),
            "UNKNOWN_COMMAND" => Some(Self::UnknownCommand),
            "EXPECTED_CRLF" => Some(Self::ExpectedCrlf),
            "JOB_TOO_BIG" => Some(Self::JobTooBig),
            "DRAINING" => Some(Self::Draining),
            "NOT_FOUND" => Some(Self::NotFound),
            "NOT_IGNORED" => Some(Self::NotIgnored),
            "TIMED_OUT" => Some(Self::TimedOut),
            "DEADLINE_SOON" => Some(Self::DeadlineSoon),
            _ => None,
        }
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => f.write_str("OUT_OF_MEMORY"),
            Self::InternalError => f.write_str("INTERNAL_ERROR"),
            Self::BadFormat => f.write_str("BAD_FORMAT"),
            Self::UnknownCommand => f.write_str("UNKNOWN_COMMAND"),
            Self::ExpectedCrlf => f.write_str("EXPECTED_CRLF"),
            Self::JobTooBig => f.write_str("JOB_TOO_BIG"),
            Self::Draining => f.write_str("DRAINING"),
            Self::NotFound => f.write_str("NOT_FOUND"),
            Self::NotIgnored => f.write_str("NOT_IGNORED"),
            Self::TimedOut => f.write_str("TIMED_OUT"),
            Self::DeadlineSoon => f.write_str("DEADLINE_SOON"),
            Self::Buried(Some(id)) => write!(f, "BURIED {id}"),
            Self::Buried(None) => f.write_str("BURIED"),
        }
    }
}
