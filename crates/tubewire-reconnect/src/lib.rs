//! Reconnect supervision for Tubewire.
//!
//! A [`SupervisorHandle`] keeps one pipelined connection to a beanstalkd
//! endpoint alive: it connects on request, waits an exponentially growing
//! delay after every failure, and reports each transition as a
//! [`SupervisorEvent`]. Only one connection (or connection attempt) exists
//! at a time.
//!
//! # Usage
//!
//! ```ignore
//! let supervisor = tubewire_reconnect::spawn(
//!     TcpConnector::new(),
//!     Arc::new(BeanstalkCodec),
//!     BackoffConfig::default(),
//!     PipelineConfig::default(),
//! );
//! let mut events = supervisor.subscribe();
//! supervisor.connect(Endpoint::default()).await?;
//!
//! while let Ok(event) = events.recv().await {
//!     match event {
//!         SupervisorEvent::Connected(conn) => { /* issue requests on conn */ }
//!         SupervisorEvent::Disconnected { reason } => { /* stop using it */ }
//!         SupervisorEvent::GaveUp { .. } => break,
//!     }
//! }
//! ```
//!
//! # Backoff
//!
//! After a failure the supervisor waits the current delay, then multiplies
//! it by [`BackoffConfig::factor`] up to [`BackoffConfig::max`]. A
//! successful connect or an explicit [`SupervisorHandle::retry`] drops it
//! back to [`BackoffConfig::initial`].

mod backoff;
mod config;
mod error;
mod supervisor;

pub use backoff::Backoff;
pub use config::BackoffConfig;
pub use error::ReconnectError;
pub use supervisor::{LinkState, SupervisorEvent, SupervisorHandle, spawn};
