//! Client sessions for Tubewire.
//!
//! A [`Session`] is what applications hold on to. It:
//!
//! 1. **Keeps a connection alive** through the reconnect supervisor.
//! 2. **Remembers tube state** ([`TubeState`]): the tube used for `put` and
//!    the tubes watched for `reserve`, as the caller last asked for them.
//! 3. **Replays that state** on every new connection (`use`, then each
//!    `watch`, then `ignore default` if needed) before reporting ready.
//! 4. **Exposes every command** as a typed method, plus [`Session::send`]
//!    for raw [`Command`](tubewire_protocol::Command)s.
//!
//! # How it fits in the stack
//!
//! ```text
//! Application (above)            ← put / reserve / watch …
//!     ↕
//! Session (this crate)           ← tube state, replay, readiness
//!     ↕
//! Reconnect supervisor (below)   ← one live connection, backoff
//! ```

mod config;
mod error;
mod session;
mod tubes;

pub use config::SessionConfig;
pub use error::SessionError;
pub use session::Session;
pub use tubes::{DEFAULT_TUBE, TubeState};
