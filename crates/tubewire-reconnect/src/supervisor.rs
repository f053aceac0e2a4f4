//! The reconnect supervisor actor.
//!
//! One Tokio task owns the connector, the target endpoint, the backoff
//! schedule and at most one live connection. It moves through four phases:
//!
//! ```text
//!            connect()                 success
//!   Idle ─────────────────► Connecting ────────► Connected
//!    ▲                        │    ▲                 │
//!    │ disconnect() /         │    │ delay elapsed   │ connection
//!    │ retries exhausted      ▼    │ or retry()      │ closed
//!    └──────────────────── Waiting ◄─────────────────┘
//! ```
//!
//! A live connection can also be handed back: [`SupervisorHandle::reject`]
//! closes it as a failed attempt, [`SupervisorHandle::recycle`] closes it
//! and reconnects at once.
//!
//! Every transition into or out of `Connected` is published as a
//! [`SupervisorEvent`] on a broadcast channel, and the current phase is
//! mirrored into a [`LinkState`] watch channel.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tubewire_pipeline::{ConnectionHandle, PipelineConfig};
use tubewire_protocol::Codec;
use tubewire_transport::{Connection, ConnectionId, Connector, Endpoint};

use crate::{Backoff, BackoffConfig, ReconnectError};

/// Capacity of the event broadcast channel.
const EVENT_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// A connect/disconnect transition.
pub enum SupervisorEvent<C: Codec> {
    /// A new connection is up. Requests may be enqueued on it right away.
    Connected(ConnectionHandle<C>),
    /// A connection attempt failed or a live connection closed.
    Disconnected {
        /// Why the link went down.
        reason: String,
    },
    /// `max_retries` consecutive attempts failed; auto-retry is now off.
    GaveUp {
        /// Number of failed attempts in the run that gave up.
        attempts: u32,
    },
}

impl<C: Codec> Clone for SupervisorEvent<C> {
    fn clone(&self) -> Self {
        match self {
            Self::Connected(handle) => Self::Connected(handle.clone()),
            Self::Disconnected { reason } => Self::Disconnected {
                reason: reason.clone(),
            },
            Self::GaveUp { attempts } => Self::GaveUp {
                attempts: *attempts,
            },
        }
    }
}

impl<C: Codec> std::fmt::Debug for SupervisorEvent<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connected(handle) => f.debug_tuple("Connected").field(&handle.id()).finish(),
            Self::Disconnected { reason } => f
                .debug_struct("Disconnected")
                .field("reason", reason)
                .finish(),
            Self::GaveUp { attempts } => f
                .debug_struct("GaveUp")
                .field("attempts", attempts)
                .finish(),
        }
    }
}

/// Where the supervisor currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Not connected and not trying to be.
    Disconnected,
    /// A connection attempt is in progress.
    Connecting,
    /// A connection is live.
    Connected(ConnectionId),
    /// Waiting `delay` before the next attempt.
    Waiting { delay: Duration },
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Commands sent to the supervisor actor.
enum SupervisorCommand {
    Connect {
        endpoint: Endpoint,
        reply: oneshot::Sender<Result<(), ReconnectError>>,
    },
    Retry,
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    /// Close a live connection the caller could not use.
    Reject {
        conn_id: ConnectionId,
        reason: String,
    },
    /// Close a live connection and reconnect at once.
    Recycle { conn_id: ConnectionId },
}

/// Handle to a running supervisor.
///
/// This is cheap to clone. The actor stops once every handle is dropped,
/// closing its live connection on the way out.
pub struct SupervisorHandle<C: Codec> {
    commands: mpsc::UnboundedSender<SupervisorCommand>,
    events: broadcast::Sender<SupervisorEvent<C>>,
    state: watch::Receiver<LinkState>,
}

impl<C: Codec> Clone for SupervisorHandle<C> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            events: self.events.clone(),
            state: self.state.clone(),
        }
    }
}

impl<C: Codec> SupervisorHandle<C> {
    /// Starts connecting to `endpoint`, retrying with backoff on failure.
    ///
    /// Returns once the supervisor has accepted the request, not once the
    /// connection is up; watch [`subscribe`](Self::subscribe) for that.
    ///
    /// # Errors
    /// - [`ReconnectError::AlreadyConnected`] unless the supervisor is idle.
    /// - [`ReconnectError::Shutdown`] if the actor has stopped.
    pub async fn connect(&self, endpoint: Endpoint) -> Result<(), ReconnectError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(SupervisorCommand::Connect { endpoint, reply })
            .map_err(|_| ReconnectError::Shutdown)?;
        rx.await.map_err(|_| ReconnectError::Shutdown)?
    }

    /// Resets the backoff to its floor. If a retry is pending, it happens
    /// now instead of after the delay.
    pub fn retry(&self) -> Result<(), ReconnectError> {
        self.commands
            .send(SupervisorCommand::Retry)
            .map_err(|_| ReconnectError::Shutdown)
    }

    /// Stops retrying and closes the live connection, if any.
    ///
    /// Resolves once the connection has closed and every request pending
    /// on it has failed.
    pub async fn disconnect(&self) -> Result<(), ReconnectError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(SupervisorCommand::Disconnect { reply })
            .map_err(|_| ReconnectError::Shutdown)?;
        rx.await.map_err(|_| ReconnectError::Shutdown)
    }

    /// Closes connection `conn_id` because the caller could not use it,
    /// for example when the server refused the session's setup commands.
    ///
    /// The connection counts as a failed attempt: the backoff keeps
    /// growing and `max_retries` applies as if it had never connected.
    /// Ignored unless `conn_id` is the live connection.
    pub fn reject(
        &self,
        conn_id: ConnectionId,
        reason: impl Into<String>,
    ) -> Result<(), ReconnectError> {
        self.commands
            .send(SupervisorCommand::Reject {
                conn_id,
                reason: reason.into(),
            })
            .map_err(|_| ReconnectError::Shutdown)
    }

    /// Closes connection `conn_id` and connects again without waiting.
    /// Ignored unless `conn_id` is the live connection.
    pub fn recycle(&self, conn_id: ConnectionId) -> Result<(), ReconnectError> {
        self.commands
            .send(SupervisorCommand::Recycle { conn_id })
            .map_err(|_| ReconnectError::Shutdown)
    }

    /// Subscribes to connect/disconnect events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent<C>> {
        self.events.subscribe()
    }

    /// Returns the current link state.
    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    /// Returns a receiver that observes every link state change.
    pub fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.state.clone()
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

/// Spawns a supervisor for connections made by `connector`.
///
/// The supervisor starts idle; call [`SupervisorHandle::connect`].
pub fn spawn<K, C>(
    connector: K,
    codec: Arc<C>,
    backoff: BackoffConfig,
    pipeline: PipelineConfig,
) -> SupervisorHandle<C>
where
    K: Connector,
    C: Codec,
{
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
    let (state_tx, state_rx) = watch::channel(LinkState::Disconnected);

    let actor = Supervisor {
        connector,
        codec,
        pipeline,
        backoff: Backoff::new(backoff),
        commands: commands_rx,
        events: events_tx.clone(),
        state: state_tx,
        endpoint: None,
        auto_retry: false,
        failures: 0,
    };
    tokio::spawn(actor.run());

    SupervisorHandle {
        commands: commands_tx,
        events: events_tx,
        state: state_rx,
    }
}

enum Phase<C: Codec> {
    Idle,
    Connecting,
    Connected {
        handle: ConnectionHandle<C>,
        task: JoinHandle<String>,
        resume: Resume,
    },
    Waiting(Duration),
    Shutdown,
}

/// Retry bookkeeping from just before a successful connect, restored if
/// the connection is rejected.
struct Resume {
    failures: u32,
    backoff: Backoff,
}

/// What woke the actor up while connecting.
enum AttemptEvent<T, E> {
    Finished(Result<T, E>),
    Command(Option<SupervisorCommand>),
}

/// What woke the actor up while connected.
enum LinkEvent {
    Closed(Result<String, tokio::task::JoinError>),
    Command(Option<SupervisorCommand>),
}

/// What woke the actor up while waiting.
enum WaitEvent {
    Elapsed,
    Command(Option<SupervisorCommand>),
}

struct Supervisor<K: Connector, C: Codec> {
    connector: K,
    codec: Arc<C>,
    pipeline: PipelineConfig,
    backoff: Backoff,
    commands: mpsc::UnboundedReceiver<SupervisorCommand>,
    events: broadcast::Sender<SupervisorEvent<C>>,
    state: watch::Sender<LinkState>,
    endpoint: Option<Endpoint>,
    auto_retry: bool,
    /// Consecutive failures since the last successful connect.
    failures: u32,
}

impl<K: Connector, C: Codec> Supervisor<K, C> {
    async fn run(mut self) {
        debug!("reconnect supervisor started");
        let mut phase = Phase::Idle;
        loop {
            phase = match phase {
                Phase::Idle => self.idle().await,
                Phase::Connecting => self.connecting().await,
                Phase::Connected {
                    handle,
                    task,
                    resume,
                } => self.connected(handle, task, resume).await,
                Phase::Waiting(delay) => self.waiting(delay).await,
                Phase::Shutdown => break,
            };
        }
        self.state.send_replace(LinkState::Disconnected);
        debug!("reconnect supervisor stopped");
    }

    async fn idle(&mut self) -> Phase<C> {
        self.state.send_replace(LinkState::Disconnected);
        loop {
            match self.commands.recv().await {
                Some(SupervisorCommand::Connect { endpoint, reply }) => {
                    info!(%endpoint, "connecting");
                    self.endpoint = Some(endpoint);
                    self.auto_retry = true;
                    self.failures = 0;
                    self.backoff.reset();
                    // Visible before the caller hears back.
                    self.state.send_replace(LinkState::Connecting);
                    let _ = reply.send(Ok(()));
                    return Phase::Connecting;
                }
                Some(SupervisorCommand::Retry) => {
                    debug!("retry ignored: not connecting");
                }
                Some(SupervisorCommand::Disconnect { reply }) => {
                    let _ = reply.send(());
                }
                Some(SupervisorCommand::Reject { .. } | SupervisorCommand::Recycle { .. }) => {
                    debug!("no live connection to close");
                }
                None => return Phase::Shutdown,
            }
        }
    }

    async fn connecting(&mut self) -> Phase<C> {
        let Some(endpoint) = self.endpoint.clone() else {
            return Phase::Idle;
        };
        self.state.send_replace(LinkState::Connecting);

        let connector = self.connector.clone();
        let attempt = connector.connect(&endpoint);
        tokio::pin!(attempt);

        loop {
            let event = tokio::select! {
                result = &mut attempt => AttemptEvent::Finished(result),
                cmd = self.commands.recv() => AttemptEvent::Command(cmd),
            };

            match event {
                AttemptEvent::Finished(Ok(transport)) => {
                    let conn_id = transport.id();
                    let (handle, task) = tubewire_pipeline::spawn(
                        transport,
                        Arc::clone(&self.codec),
                        &self.pipeline,
                    );
                    info!(%conn_id, %endpoint, "connected");
                    let resume = Resume {
                        failures: self.failures,
                        backoff: self.backoff.clone(),
                    };
                    self.backoff.reset();
                    self.failures = 0;
                    self.state.send_replace(LinkState::Connected(conn_id));
                    self.emit(SupervisorEvent::Connected(handle.clone()));
                    return Phase::Connected {
                        handle,
                        task,
                        resume,
                    };
                }
                AttemptEvent::Finished(Err(e)) => {
                    let reason = format!("connect to {endpoint} failed: {e}");
                    warn!(%endpoint, error = %e, "connection attempt failed");
                    self.emit(SupervisorEvent::Disconnected { reason });
                    return self.after_failure();
                }
                AttemptEvent::Command(Some(SupervisorCommand::Connect { reply, .. })) => {
                    let _ = reply.send(Err(ReconnectError::AlreadyConnected));
                }
                AttemptEvent::Command(Some(SupervisorCommand::Retry)) => {
                    self.backoff.reset();
                }
                AttemptEvent::Command(Some(
                    SupervisorCommand::Reject { .. } | SupervisorCommand::Recycle { .. },
                )) => {
                    debug!("stale close request ignored");
                }
                AttemptEvent::Command(Some(SupervisorCommand::Disconnect { reply })) => {
                    info!(%endpoint, "connection attempt abandoned");
                    self.auto_retry = false;
                    self.state.send_replace(LinkState::Disconnected);
                    self.emit(SupervisorEvent::Disconnected {
                        reason: "disconnected by client".to_string(),
                    });
                    let _ = reply.send(());
                    return Phase::Idle;
                }
                AttemptEvent::Command(None) => return Phase::Shutdown,
            }
        }
    }

    async fn connected(
        &mut self,
        handle: ConnectionHandle<C>,
        mut task: JoinHandle<String>,
        resume: Resume,
    ) -> Phase<C> {
        let conn_id = handle.id();
        loop {
            let event = tokio::select! {
                result = &mut task => LinkEvent::Closed(result),
                cmd = self.commands.recv() => LinkEvent::Command(cmd),
            };

            match event {
                LinkEvent::Closed(result) => {
                    let reason = close_reason(result);
                    warn!(%conn_id, %reason, "connection lost");
                    self.emit(SupervisorEvent::Disconnected { reason });
                    return self.after_failure();
                }
                LinkEvent::Command(Some(SupervisorCommand::Connect { reply, .. })) => {
                    let _ = reply.send(Err(ReconnectError::AlreadyConnected));
                }
                LinkEvent::Command(Some(SupervisorCommand::Retry)) => {
                    self.backoff.reset();
                }
                LinkEvent::Command(Some(SupervisorCommand::Reject { conn_id: id, reason }))
                    if id == conn_id =>
                {
                    warn!(%conn_id, %reason, "connection rejected");
                    handle.close();
                    let _ = task.await;
                    self.failures = resume.failures;
                    self.backoff = resume.backoff;
                    self.emit(SupervisorEvent::Disconnected { reason });
                    return self.after_failure();
                }
                LinkEvent::Command(Some(SupervisorCommand::Recycle { conn_id: id }))
                    if id == conn_id =>
                {
                    info!(%conn_id, "recycling connection");
                    handle.close();
                    let reason = close_reason(task.await);
                    self.emit(SupervisorEvent::Disconnected { reason });
                    return Phase::Connecting;
                }
                LinkEvent::Command(Some(
                    SupervisorCommand::Reject { .. } | SupervisorCommand::Recycle { .. },
                )) => {
                    debug!(%conn_id, "close request for another connection ignored");
                }
                LinkEvent::Command(Some(SupervisorCommand::Disconnect { reply })) => {
                    self.auto_retry = false;
                    handle.close();
                    let reason = close_reason(task.await);
                    info!(%conn_id, %reason, "disconnected");
                    self.state.send_replace(LinkState::Disconnected);
                    self.emit(SupervisorEvent::Disconnected { reason });
                    let _ = reply.send(());
                    return Phase::Idle;
                }
                LinkEvent::Command(None) => {
                    handle.close();
                    let _ = task.await;
                    return Phase::Shutdown;
                }
            }
        }
    }

    async fn waiting(&mut self, delay: Duration) -> Phase<C> {
        self.state.send_replace(LinkState::Waiting { delay });
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            let event = tokio::select! {
                () = &mut sleep => WaitEvent::Elapsed,
                cmd = self.commands.recv() => WaitEvent::Command(cmd),
            };

            match event {
                WaitEvent::Elapsed => return Phase::Connecting,
                WaitEvent::Command(Some(SupervisorCommand::Retry)) => {
                    debug!("retrying now");
                    self.backoff.reset();
                    return Phase::Connecting;
                }
                WaitEvent::Command(Some(SupervisorCommand::Connect { reply, .. })) => {
                    let _ = reply.send(Err(ReconnectError::AlreadyConnected));
                }
                WaitEvent::Command(Some(SupervisorCommand::Disconnect { reply })) => {
                    info!("pending retry cancelled");
                    self.auto_retry = false;
                    self.state.send_replace(LinkState::Disconnected);
                    let _ = reply.send(());
                    return Phase::Idle;
                }
                WaitEvent::Command(Some(
                    SupervisorCommand::Reject { .. } | SupervisorCommand::Recycle { .. },
                )) => {
                    debug!("stale close request ignored");
                }
                WaitEvent::Command(None) => return Phase::Shutdown,
            }
        }
    }

    /// Decides what follows a failed attempt or a lost connection.
    fn after_failure(&mut self) -> Phase<C> {
        self.failures = self.failures.saturating_add(1);
        if !self.auto_retry {
            return Phase::Idle;
        }
        let failures = self.failures;
        if self
            .backoff
            .config()
            .max_retries
            .is_some_and(|max| failures > max)
        {
            warn!(attempts = self.failures, "giving up on reconnecting");
            self.auto_retry = false;
            // Idle before subscribers hear about it.
            self.state.send_replace(LinkState::Disconnected);
            self.emit(SupervisorEvent::GaveUp {
                attempts: self.failures,
            });
            return Phase::Idle;
        }
        let delay = self.backoff.next_delay();
        warn!(?delay, attempt = self.failures, "reconnect scheduled");
        Phase::Waiting(delay)
    }

    fn emit(&self, event: SupervisorEvent<C>) {
        // No subscribers is fine: the event is simply dropped.
        let _ = self.events.send(event);
    }
}

fn close_reason(result: Result<String, tokio::task::JoinError>) -> String {
    result.unwrap_or_else(|e| format!("connection task failed: {e}"))
}
