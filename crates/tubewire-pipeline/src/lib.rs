//! Pipelined request/reply connections for Tubewire.
//!
//! A beanstalkd connection carries many requests in flight at once and
//! the server answers them strictly in order. This crate provides:
//!
//! 1. **Framing** ([`Pipeline`]): the FIFO of pending requests and the
//!    line/raw state machine that splits the reply stream, including
//!    replies whose header line announces a raw body.
//! 2. **The connection actor** ([`spawn`], [`ConnectionHandle`],
//!    [`ReplyFuture`]): a task that owns one transport, writes requests,
//!    and routes every reply to the caller that issued it.
//!
//! # How it fits in the stack
//!
//! ```text
//! Reconnect supervisor (above)  ← creates one connection per successful connect
//!     ↕
//! Pipeline (this crate)         ← ordering, framing, per-request results
//!     ↕
//! Protocol + Transport (below)  ← codec, raw bytes
//! ```

mod config;
mod connection;
mod error;
mod framing;

pub use config::PipelineConfig;
pub use connection::{ConnectionHandle, ReplyFuture, spawn};
pub use error::{FramingError, PipelineError};
pub use framing::{Framing, Pending, Pipeline, ReplySender};
