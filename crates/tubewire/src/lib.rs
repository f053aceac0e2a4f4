//! # Tubewire
//!
//! A reconnecting, pipelined client for beanstalkd work queues.
//!
//! Tubewire keeps one TCP connection to the server, sends requests without
//! waiting for earlier replies, routes every reply back to the caller that
//! issued it, and transparently reconnects with exponential backoff. After
//! each reconnect it restores the session's tube selection (`use`,
//! `watch`, `ignore`) before letting new commands through.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tubewire::prelude::*;
//!
//! # async fn run() -> Result<(), TubewireError> {
//! let session = ClientBuilder::new()
//!     .endpoint("127.0.0.1", 11300)
//!     .connect()
//!     .await?;
//!
//! session.use_tube("emails").await?;
//! let id = session.put("hello").await?;
//!
//! session.watch("emails").await?;
//! let job = session.reserve().await?;
//! session.delete(job.id).await?;
//! # let _ = id;
//! # Ok(())
//! # }
//! ```
//!
//! ## Layers
//!
//! | Crate | Role |
//! |-------|------|
//! | [`transport`] | byte streams (TCP, in-memory) |
//! | [`protocol`] | commands, replies, incremental decoding |
//! | [`pipeline`] | in-flight FIFO and line/raw framing |
//! | [`reconnect`] | one live connection, backoff |
//! | [`session`] | tube state replay, typed commands |

mod client;
mod error;

pub use client::{ClientBuilder, ClientConfig};
pub use error::TubewireError;

pub use tubewire_pipeline as pipeline;
pub use tubewire_protocol as protocol;
pub use tubewire_reconnect as reconnect;
pub use tubewire_session as session;
pub use tubewire_transport as transport;

/// The types most applications need.
pub mod prelude {
    pub use crate::{ClientBuilder, ClientConfig, TubewireError};
    pub use tubewire_pipeline::PipelineConfig;
    pub use tubewire_protocol::{Command, Job, JobId, PutOptions, Response, ServerError, Stats};
    pub use tubewire_reconnect::BackoffConfig;
    pub use tubewire_session::{Session, SessionConfig, SessionError};
    pub use tubewire_transport::Endpoint;
}
