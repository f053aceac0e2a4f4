//! Wire protocol for Tubewire.
//!
//! This crate defines the "language" the client speaks to a beanstalkd
//! work-queue server:
//!
//! - **Requests** ([`Command`], [`PutOptions`], [`JobId`]): every
//!   command the client can issue, as a closed enum.
//! - **Replies** ([`Response`], [`Job`], [`Stats`]): what comes back.
//! - **Codec** ([`Codec`] / [`Decoder`] traits, [`BeanstalkCodec`]): how
//!   requests become bytes and how reply bytes are read back
//!   incrementally, including the "header line, then N raw bytes" shape.
//! - **Errors** ([`ProtocolError`], [`ServerError`]).
//!
//! # Architecture
//!
//! The protocol layer sits between transport (raw bytes) and the
//! pipelined connection. It doesn't know about sockets, queues of
//! in-flight requests, or reconnects.
//!
//! ```text
//! Transport (bytes) → Pipeline (framing, FIFO) → Protocol (Command/Response)
//! ```

mod codec;
mod command;
mod error;
mod reply;

pub use codec::{BeanstalkCodec, Codec, Decoder, Step};
pub use command::{Command, JobId, MAX_TUBE_NAME_LEN, PutOptions, validate_tube_name};
pub use error::{ProtocolError, ServerError};
pub use reply::{Job, ReplyDecoder, Response, Stats};
