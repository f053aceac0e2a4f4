//! Requests: the complete set of commands the client can issue.
//!
//! Every command the codec understands is a variant of [`Command`]. The
//! session layer exposes exactly this vocabulary; nothing is looked up
//! by name at runtime.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ProtocolError;
use crate::reply::Expect;

/// Longest tube name the server accepts, in bytes.
pub const MAX_TUBE_NAME_LEN: usize = 200;

/// Server-assigned job identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scheduling parameters for `put`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutOptions {
    /// Lower is more urgent. Below 1024 counts as "urgent" in server stats.
    pub priority: u32,
    /// How long the job stays delayed before it becomes ready.
    pub delay: Duration,
    /// Time-to-run: how long a worker may hold the job once reserved.
    pub ttr: Duration,
}

impl Default for PutOptions {
    fn default() -> Self {
        Self {
            priority: 1 << 31,
            delay: Duration::ZERO,
            ttr: Duration::from_secs(120),
        }
    }
}

/// A single request to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Put { options: PutOptions, body: Vec<u8> },
    Use(String),
    Reserve,
    ReserveWithTimeout(Duration),
    ReserveJob(JobId),
    Delete(JobId),
    Release { id: JobId, priority: u32, delay: Duration },
    Bury { id: JobId, priority: u32 },
    Touch(JobId),
    Watch(String),
    Ignore(String),
    Peek(JobId),
    PeekReady,
    PeekDelayed,
    PeekBuried,
    Kick(u32),
    KickJob(JobId),
    StatsJob(JobId),
    StatsTube(String),
    Stats,
    ListTubes,
    ListTubeUsed,
    ListTubesWatched,
    PauseTube { tube: String, delay: Duration },
}

impl Command {
    /// Wire names of every supported command, in protocol-document order.
    pub const NAMES: &'static [&'static str] = &[
        "put",
        "use",
        "reserve",
        "reserve-with-timeout",
        "reserve-job",
        "delete",
        "release",
        "bury",
        "touch",
        "watch",
        "ignore",
        "peek",
        "peek-ready",
        "peek-delayed",
        "peek-buried",
        "kick",
        "kick-job",
        "stats-job",
        "stats-tube",
        "stats",
        "list-tubes",
        "list-tube-used",
        "list-tubes-watched",
        "pause-tube",
    ];

    /// The command's wire name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Put { .. } => "put",
            Self::Use(_) => "use",
            Self::Reserve => "reserve",
            Self::ReserveWithTimeout(_) => "reserve-with-timeout",
            Self::ReserveJob(_) => "reserve-job",
            Self::Delete(_) => "delete",
            Self::Release { .. } => "release",
            Self::Bury { .. } => "bury",
            Self::Touch(_) => "touch",
            Self::Watch(_) => "watch",
            Self::Ignore(_) => "ignore",
            Self::Peek(_) => "peek",
            Self::PeekReady => "peek-ready",
            Self::PeekDelayed => "peek-delayed",
            Self::PeekBuried => "peek-buried",
            Self::Kick(_) => "kick",
            Self::KickJob(_) => "kick-job",
            Self::StatsJob(_) => "stats-job",
            Self::StatsTube(_) => "stats-tube",
            Self::Stats => "stats",
            Self::ListTubes => "list-tubes",
            Self::ListTubeUsed => "list-tube-used",
            Self::ListTubesWatched => "list-tubes-watched",
            Self::PauseTube { .. } => "pause-tube",
        }
    }

    /// Serializes the command, including the trailing `\r\n` (and the body
    /// with its own `\r\n` for `put`).
    ///
    /// # Errors
    /// Returns [`ProtocolError::InvalidRequest`] for tube names the server
    /// would reject.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let name = self.name();
        let line = match self {
            Self::Put { options, body } => {
                let mut out = format!(
                    "{name} {} {} {} {}\r\n",
                    options.priority,
                    options.delay.as_secs(),
                    options.ttr.as_secs(),
                    body.len()
                )
                .into_bytes();
                out.extend_from_slice(body);
                out.extend_from_slice(b"\r\n");
                return Ok(out);
            }
            Self::Use(tube)
            | Self::Watch(tube)
            | Self::Ignore(tube)
            | Self::StatsTube(tube) => {
                validate_tube_name(tube)?;
                format!("{name} {tube}")
            }
            Self::ReserveWithTimeout(timeout) => {
                format!("{name} {}", timeout.as_secs())
            }
            Self::ReserveJob(id)
            | Self::Delete(id)
            | Self::Touch(id)
            | Self::Peek(id)
            | Self::KickJob(id)
            | Self::StatsJob(id) => format!("{name} {id}"),
            Self::Release {
                id,
                priority,
                delay,
            } => format!("{name} {id} {priority} {}", delay.as_secs()),
            Self::Bury { id, priority } => format!("{name} {id} {priority}"),
            Self::Kick(bound) => format!("{name} {bound}"),
            Self::PauseTube { tube, delay } => {
                validate_tube_name(tube)?;
                format!("{name} {tube} {}", delay.as_secs())
            }
            Self::Reserve
            | Self::PeekReady
            | Self::PeekDelayed
            | Self::PeekBuried
            | Self::Stats
            | Self::ListTubes
            | Self::ListTubeUsed
            | Self::ListTubesWatched => name.to_string(),
        };
        Ok(format!("{line}\r\n").into_bytes())
    }

    /// What a successful reply to this command looks like.
    pub(crate) fn expect(&self) -> Expect {
        match self {
            Self::Put { .. } => Expect::Inserted,
            Self::Use(_) | Self::ListTubeUsed => Expect::Using,
            Self::Reserve | Self::ReserveWithTimeout(_) | Self::ReserveJob(_) => {
                Expect::Reserved
            }
            Self::Delete(_) => Expect::Deleted,
            Self::Release { .. } => Expect::Released,
            Self::Bury { .. } => Expect::Buried,
            Self::Touch(_) => Expect::Touched,
            Self::Watch(_) | Self::Ignore(_) => Expect::Watching,
            Self::Peek(_)
            | Self::PeekReady
            | Self::PeekDelayed
            | Self::PeekBuried => Expect::Found,
            Self::Kick(_) => Expect::Kicked,
            Self::KickJob(_) => Expect::KickedJob,
            Self::StatsJob(_) | Self::StatsTube(_) | Self::Stats => {
                Expect::Stats
            }
            Self::ListTubes | Self::ListTubesWatched => Expect::Tubes,
            Self::PauseTube { .. } => Expect::Paused,
        }
    }
}

/// Checks a tube name against the server's naming rules: 1–200 bytes of
/// `A-Z a-z 0-9 - + / ; . $ _ ( )`, not starting with `-`.
pub fn validate_tube_name(tube: &str) -> Result<(), ProtocolError> {
    if tube.is_empty() || tube.len() > MAX_TUBE_NAME_LEN {
        return Err(ProtocolError::InvalidRequest(format!(
            "tube name must be 1..={MAX_TUBE_NAME_LEN} bytes, got {}",
            tube.len()
        )));
    }
    if tube.starts_with('-') {
        return Err(ProtocolError::InvalidRequest(format!(
            "tube name {tube:?} must not start with '-'"
        )));
    }
    let allowed = |c: char| c.is_ascii_alphanumeric() || "-+/;.$_()".contains(c);
    if let Some(bad) = tube.chars().find(|c| !allowed(*c)) {
        return Err(ProtocolError::InvalidRequest(format!(
            "tube name {tube:?} contains {bad:?}"
        )));
    }
    Ok(())
}
