//! The public client session.
//!
//! A [`Session`] wraps a reconnect supervisor and remembers which tube the
//! caller uses and which tubes it watches. A background driver task
//! follows the supervisor's events:
//!
//! ```text
//!   Connected(conn) ──► replay use/watch/ignore on conn ──► publish conn, Ready
//!   Disconnected    ──► forget conn, NotReady
//!   GaveUp          ──► forget conn, Idle
//! ```
//!
//! Until the replay has finished, the new connection is not visible to
//! callers: commands fail with [`SessionError::NotConnected`] rather than
//! racing the replay for the tube state. A replay the server refuses hands
//! the connection back to the supervisor as a failed attempt, so a server
//! that keeps refusing eventually trips `max_retries`.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tubewire_pipeline::{ConnectionHandle, PipelineError};
use tubewire_protocol::{BeanstalkCodec, Command, Job, JobId, PutOptions, Response, Stats};
use tubewire_reconnect::{LinkState, ReconnectError, SupervisorEvent, SupervisorHandle};
use tubewire_transport::{Connector, Endpoint};

use crate::{SessionConfig, SessionError, TubeState};

type Conn = ConnectionHandle<BeanstalkCodec>;

/// Unwraps the reply variant a command is expected to produce.
macro_rules! match_reply {
    ($response:expr, $command:literal, $pattern:pat => $value:expr) => {
        match $response {
            $pattern => Ok($value),
            other => Err(SessionError::UnexpectedResponse {
                command: $command,
                response: Box::new(other),
            }),
        }
    };
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Whether callers can issue commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Readiness {
    /// Not connected and not trying: `ready()` fails at once.
    Idle,
    /// Connecting, reconnecting, or replaying: `ready()` waits.
    NotReady,
    /// Connected and replayed.
    Ready,
}

struct Inner {
    tubes: TubeState,
    /// The connection callers may use. `None` until replay completes.
    link: Option<Conn>,
}

struct Shared {
    inner: Mutex<Inner>,
    ready: watch::Sender<Readiness>,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// A beanstalkd client session that survives reconnects.
///
/// Create one with [`Session::new`] (TCP) or [`Session::with_connector`],
/// call [`connect`](Self::connect), then await [`ready`](Self::ready).
/// Dropping the session stops its background tasks and closes the
/// connection.
pub struct Session {
    supervisor: SupervisorHandle<BeanstalkCodec>,
    shared: Arc<Shared>,
    driver: JoinHandle<()>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("link", &self.supervisor.state())
            .field("ready", &*self.shared.ready.borrow())
            .finish()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

impl Session {
    /// Creates a session that connects over TCP.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_connector(tubewire_transport::TcpConnector::new(), config)
    }

    /// Creates a session that opens connections with `connector`.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn with_connector<K: Connector>(connector: K, config: SessionConfig) -> Self {
        let supervisor = tubewire_reconnect::spawn(
            connector,
            Arc::new(BeanstalkCodec),
            config.backoff,
            config.pipeline,
        );
        let (ready, _) = watch::channel(Readiness::Idle);
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                tubes: TubeState::default(),
                link: None,
            }),
            ready,
        });
        let driver = tokio::spawn(drive(
            Arc::clone(&shared),
            supervisor.clone(),
            supervisor.subscribe(),
        ));
        Self {
            supervisor,
            shared,
            driver,
        }
    }

    // -- lifecycle ----------------------------------------------------------

    /// Starts connecting to `endpoint`, reconnecting with backoff whenever
    /// the link drops. Await [`ready`](Self::ready) to know when commands
    /// can be sent.
    ///
    /// # Errors
    /// [`SessionError::AlreadyConnected`] if the session is connected,
    /// connecting, or waiting to reconnect.
    pub async fn connect(&self, endpoint: Endpoint) -> Result<(), SessionError> {
        // Mark not-ready first so a fast Connected event can't be
        // overwritten afterwards. A busy supervisor means a run is already
        // under way, so not-ready stays correct if it turns this down.
        self.shared.ready.send_if_modified(|r| {
            let idle = *r == Readiness::Idle;
            if idle {
                *r = Readiness::NotReady;
            }
            idle
        });
        match self.supervisor.connect(endpoint).await {
            Ok(()) => Ok(()),
            Err(ReconnectError::Shutdown) => {
                self.shared.ready.send_replace(Readiness::Idle);
                Err(SessionError::Shutdown)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Shorthand for [`connect`](Self::connect) with a host and port.
    pub async fn connect_tcp(
        &self,
        host: impl Into<String>,
        port: u16,
    ) -> Result<(), SessionError> {
        self.connect(Endpoint::new(host, port)).await
    }

    /// Waits until the session is connected and its tube state replayed.
    ///
    /// Returns the session itself so calls can be chained:
    /// `session.ready().await?.put(b"job").await?`.
    ///
    /// # Errors
    /// [`SessionError::NotConnected`] if the session is idle (never
    /// connected, disconnected, or gave up reconnecting), or becomes idle
    /// while waiting.
    pub async fn ready(&self) -> Result<&Self, SessionError> {
        let mut rx = self.shared.ready.subscribe();
        let state = rx
            .wait_for(|r| *r != Readiness::NotReady)
            .await
            .map_err(|_| SessionError::Shutdown)?;
        if *state == Readiness::Ready {
            Ok(self)
        } else {
            Err(SessionError::NotConnected)
        }
    }

    /// Returns `true` if commands can be sent right now.
    pub fn is_ready(&self) -> bool {
        *self.shared.ready.borrow() == Readiness::Ready
    }

    /// Stops reconnecting, closes the connection (failing anything in
    /// flight), and resets the tube state to the defaults.
    pub async fn disconnect(&self) -> Result<(), SessionError> {
        self.supervisor.disconnect().await?;
        let mut inner = self.shared.inner.lock().await;
        inner.link = None;
        inner.tubes.reset();
        self.shared.ready.send_replace(Readiness::Idle);
        info!("session disconnected");
        Ok(())
    }

    /// Resets the reconnect delay; a pending reconnect happens now.
    pub fn retry(&self) -> Result<(), SessionError> {
        Ok(self.supervisor.retry()?)
    }

    // -- state --------------------------------------------------------------

    /// The tube `put` writes to, as last requested.
    pub async fn used_tube(&self) -> String {
        self.shared.inner.lock().await.tubes.used().to_string()
    }

    /// The tubes `reserve` reads from, as last requested.
    pub async fn watched_tubes(&self) -> BTreeSet<String> {
        self.shared.inner.lock().await.tubes.watched().clone()
    }

    /// Wire names of every command this session can send.
    pub fn command_names(&self) -> &'static [&'static str] {
        Command::NAMES
    }

    // -- commands -----------------------------------------------------------

    /// Sends any command and returns the server's reply.
    ///
    /// Nothing is sent until the returned future is first polled. From then
    /// on the command holds its place in the pipeline, so futures polled in
    /// order (for example with `join!`) are answered in that order. `use`,
    /// `watch` and `ignore` update the session's tube state as soon as they
    /// are queued, before the server confirms them.
    ///
    /// # Errors
    /// - [`SessionError::NotConnected`] if no ready connection exists;
    ///   nothing was sent and the tube state is unchanged.
    /// - [`SessionError::Request`] for invalid requests, server error
    ///   replies, or a connection lost before the reply arrived.
    pub async fn send(&self, command: Command) -> Result<Response, SessionError> {
        let reply = {
            let mut inner = self.shared.inner.lock().await;
            let link = inner.link.as_ref().ok_or(SessionError::NotConnected)?;
            let reply = link.enqueue(&command)?;
            inner.tubes.apply(&command);
            reply
        };
        Ok(reply.await?)
    }

    /// Queues a job on the used tube with default options.
    pub async fn put(&self, body: impl Into<Vec<u8>>) -> Result<JobId, SessionError> {
        self.put_with(PutOptions::default(), body).await
    }

    /// Queues a job on the used tube.
    pub async fn put_with(
        &self,
        options: PutOptions,
        body: impl Into<Vec<u8>>,
    ) -> Result<JobId, SessionError> {
        let command = Command::Put {
            options,
            body: body.into(),
        };
        match_reply!(self.send(command).await?, "put", Response::Inserted(id) => id)
    }

    /// Switches the tube `put` writes to.
    pub async fn use_tube(&self, tube: impl Into<String>) -> Result<String, SessionError> {
        let command = Command::Use(tube.into());
        match_reply!(self.send(command).await?, "use", Response::Using(tube) => tube)
    }

    /// Waits for a job on any watched tube.
    pub async fn reserve(&self) -> Result<Job, SessionError> {
        match_reply!(self.send(Command::Reserve).await?, "reserve", Response::Reserved(job) => job)
    }

    /// Waits up to `timeout` for a job. Expiry surfaces as
    /// [`ServerError::TimedOut`](tubewire_protocol::ServerError::TimedOut).
    pub async fn reserve_with_timeout(&self, timeout: Duration) -> Result<Job, SessionError> {
        match_reply!(
            self.send(Command::ReserveWithTimeout(timeout)).await?,
            "reserve-with-timeout",
            Response::Reserved(job) => job
        )
    }

    /// Reserves a specific job.
    pub async fn reserve_job(&self, id: JobId) -> Result<Job, SessionError> {
        match_reply!(
            self.send(Command::ReserveJob(id)).await?,
            "reserve-job",
            Response::Reserved(job) => job
        )
    }

    /// Deletes a job.
    pub async fn delete(&self, id: JobId) -> Result<(), SessionError> {
        match_reply!(self.send(Command::Delete(id)).await?, "delete", Response::Deleted => ())
    }

    /// Puts a reserved job back into the ready queue.
    pub async fn release(
        &self,
        id: JobId,
        priority: u32,
        delay: Duration,
    ) -> Result<(), SessionError> {
        let command = Command::Release {
            id,
            priority,
            delay,
        };
        match_reply!(self.send(command).await?, "release", Response::Released => ())
    }

    /// Buries a reserved job.
    pub async fn bury(&self, id: JobId, priority: u32) -> Result<(), SessionError> {
        let command = Command::Bury { id, priority };
        match_reply!(self.send(command).await?, "bury", Response::Buried => ())
    }

    /// Asks for more time on a reserved job.
    pub async fn touch(&self, id: JobId) -> Result<(), SessionError> {
        match_reply!(self.send(Command::Touch(id)).await?, "touch", Response::Touched => ())
    }

    /// Adds a tube to the watch list. Returns how many tubes are watched.
    pub async fn watch(&self, tube: impl Into<String>) -> Result<u32, SessionError> {
        let command = Command::Watch(tube.into());
        match_reply!(self.send(command).await?, "watch", Response::Watching(n) => n)
    }

    /// Removes a tube from the watch list. Returns how many tubes are
    /// watched. Ignoring the last tube fails with `NOT_IGNORED`.
    pub async fn ignore(&self, tube: impl Into<String>) -> Result<u32, SessionError> {
        let command = Command::Ignore(tube.into());
        match_reply!(self.send(command).await?, "ignore", Response::Watching(n) => n)
    }

    /// Looks at a job without reserving it.
    pub async fn peek(&self, id: JobId) -> Result<Job, SessionError> {
        match_reply!(self.send(Command::Peek(id)).await?, "peek", Response::Found(job) => job)
    }

    /// Looks at the next ready job on the used tube.
    pub async fn peek_ready(&self) -> Result<Job, SessionError> {
        match_reply!(self.send(Command::PeekReady).await?, "peek-ready", Response::Found(job) => job)
    }

    /// Looks at the delayed job with the shortest delay on the used tube.
    pub async fn peek_delayed(&self) -> Result<Job, SessionError> {
        match_reply!(
            self.send(Command::PeekDelayed).await?,
            "peek-delayed",
            Response::Found(job) => job
        )
    }

    /// Looks at the next buried job on the used tube.
    pub async fn peek_buried(&self) -> Result<Job, SessionError> {
        match_reply!(
            self.send(Command::PeekBuried).await?,
            "peek-buried",
            Response::Found(job) => job
        )
    }

    /// Kicks up to `bound` buried (or delayed) jobs on the used tube.
    pub async fn kick(&self, bound: u32) -> Result<u64, SessionError> {
        match_reply!(self.send(Command::Kick(bound)).await?, "kick", Response::Kicked(n) => n)
    }

    /// Kicks one buried or delayed job.
    pub async fn kick_job(&self, id: JobId) -> Result<(), SessionError> {
        match_reply!(self.send(Command::KickJob(id)).await?, "kick-job", Response::Kicked(_) => ())
    }

    /// Statistics for one job.
    pub async fn stats_job(&self, id: JobId) -> Result<Stats, SessionError> {
        match_reply!(self.send(Command::StatsJob(id)).await?, "stats-job", Response::Stats(s) => s)
    }

    /// Statistics for one tube.
    pub async fn stats_tube(&self, tube: impl Into<String>) -> Result<Stats, SessionError> {
        let command = Command::StatsTube(tube.into());
        match_reply!(self.send(command).await?, "stats-tube", Response::Stats(s) => s)
    }

    /// Server-wide statistics.
    pub async fn stats(&self) -> Result<Stats, SessionError> {
        match_reply!(self.send(Command::Stats).await?, "stats", Response::Stats(s) => s)
    }

    /// Every tube that exists on the server.
    pub async fn list_tubes(&self) -> Result<Vec<String>, SessionError> {
        match_reply!(self.send(Command::ListTubes).await?, "list-tubes", Response::Tubes(t) => t)
    }

    /// The tube in use, according to the server.
    pub async fn list_tube_used(&self) -> Result<String, SessionError> {
        match_reply!(
            self.send(Command::ListTubeUsed).await?,
            "list-tube-used",
            Response::Using(tube) => tube
        )
    }

    /// The watched tubes, according to the server.
    pub async fn list_tubes_watched(&self) -> Result<Vec<String>, SessionError> {
        match_reply!(
            self.send(Command::ListTubesWatched).await?,
            "list-tubes-watched",
            Response::Tubes(t) => t
        )
    }

    /// Stops handing out jobs from `tube` for `delay`.
    pub async fn pause_tube(
        &self,
        tube: impl Into<String>,
        delay: Duration,
    ) -> Result<(), SessionError> {
        let command = Command::PauseTube {
            tube: tube.into(),
            delay,
        };
        match_reply!(self.send(command).await?, "pause-tube", Response::Paused => ())
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Follows supervisor events until the supervisor goes away.
async fn drive(
    shared: Arc<Shared>,
    supervisor: SupervisorHandle<BeanstalkCodec>,
    mut events: broadcast::Receiver<SupervisorEvent<BeanstalkCodec>>,
) {
    loop {
        match events.recv().await {
            Ok(SupervisorEvent::Connected(conn)) => replay(&shared, &supervisor, conn).await,
            Ok(SupervisorEvent::Disconnected { reason }) => {
                debug!(%reason, "link down");
                let mut inner = shared.inner.lock().await;
                inner.link = None;
                downgrade(&shared.ready);
            }
            Ok(SupervisorEvent::GaveUp { attempts }) => {
                warn!(attempts, "session gave up reconnecting");
                let mut inner = shared.inner.lock().await;
                inner.link = None;
                // A connect issued since then owns the readiness now.
                if supervisor.state() == LinkState::Disconnected {
                    shared.ready.send_replace(Readiness::Idle);
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "session fell behind supervisor events");
                resync(&shared, &supervisor).await;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Ready becomes not-ready; idle stays idle.
fn downgrade(ready: &watch::Sender<Readiness>) {
    ready.send_if_modified(|r| {
        let was_ready = *r == Readiness::Ready;
        if was_ready {
            *r = Readiness::NotReady;
        }
        was_ready
    });
}

/// Re-derives the session's view from the supervisor after events were
/// lost. A connection the session never replayed is recycled so a fresh
/// `Connected` event arrives.
async fn resync(shared: &Shared, supervisor: &SupervisorHandle<BeanstalkCodec>) {
    let mut inner = shared.inner.lock().await;
    let current = inner.link.as_ref().map(|conn| conn.id());
    match supervisor.state() {
        LinkState::Connected(id) if current == Some(id) => {}
        LinkState::Connected(id) => {
            inner.link = None;
            downgrade(&shared.ready);
            info!(conn_id = %id, "recycling connection after lost events");
            if let Err(error) = supervisor.recycle(id) {
                warn!(%error, "could not recycle connection");
            }
        }
        LinkState::Disconnected => {
            inner.link = None;
            shared.ready.send_replace(Readiness::Idle);
        }
        LinkState::Connecting | LinkState::Waiting { .. } => {
            inner.link = None;
            downgrade(&shared.ready);
        }
    }
}

/// Brings `conn` in line with the session's tube state, then makes it the
/// connection callers use.
///
/// If the link drops mid-replay the supervisor reconnects as usual. If the
/// server refuses a step, the connection is rejected as a failed attempt.
/// Either way the next connection gets a fresh replay.
async fn replay(shared: &Shared, supervisor: &SupervisorHandle<BeanstalkCodec>, conn: Conn) {
    let conn_id = conn.id();
    let plan = shared.inner.lock().await.tubes.replay_plan();
    debug!(%conn_id, steps = plan.len(), "replaying tube state");

    for command in &plan {
        let result = match conn.enqueue(command) {
            Ok(reply) => reply.await,
            Err(e) => Err(e),
        };
        if let Err(error) = result {
            warn!(%conn_id, command = command.name(), %error, "tube state replay failed");
            match error {
                PipelineError::ConnectionLost(_) | PipelineError::NotConnected => conn.close(),
                error => {
                    let reason = format!("replaying {} failed: {error}", command.name());
                    if supervisor.reject(conn_id, reason).is_err() {
                        conn.close();
                    }
                }
            }
            return;
        }
    }

    let mut inner = shared.inner.lock().await;
    if !conn.is_open() {
        debug!(%conn_id, "connection closed during replay");
        return;
    }
    inner.link = Some(conn);
    shared.ready.send_replace(Readiness::Ready);
    info!(%conn_id, "session ready");
}

#[cfg(test)]
mod tests {
    use tubewire_reconnect::BackoffConfig;
    use tubewire_transport::memory;

    use super::*;

    fn shared(ready: Readiness, link: Option<Conn>) -> Shared {
        let (ready, _) = watch::channel(ready);
        Shared {
            inner: Mutex::new(Inner {
                tubes: TubeState::default(),
                link,
            }),
            ready,
        }
    }

    fn supervisor<K: Connector>(connector: K) -> SupervisorHandle<BeanstalkCodec> {
        tubewire_reconnect::spawn(
            connector,
            Arc::new(BeanstalkCodec),
            BackoffConfig::default(),
            Default::default(),
        )
    }

    async fn next_connected(
        events: &mut broadcast::Receiver<SupervisorEvent<BeanstalkCodec>>,
    ) -> Conn {
        match events.recv().await.unwrap() {
            SupervisorEvent::Connected(conn) => conn,
            other => panic!("expected Connected, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_resync_recycles_a_connection_the_session_never_saw() {
        let (connector, _listener) = memory::channel();
        let supervisor = supervisor(connector);
        let mut events = supervisor.subscribe();
        supervisor.connect(Endpoint::default()).await.unwrap();
        let unseen = next_connected(&mut events).await;

        let shared = shared(Readiness::NotReady, None);
        resync(&shared, &supervisor).await;

        assert!(matches!(
            events.recv().await.unwrap(),
            SupervisorEvent::Disconnected { .. }
        ));
        let fresh = next_connected(&mut events).await;
        assert_ne!(fresh.id(), unseen.id());
        assert!(!unseen.is_open());
        assert_eq!(*shared.ready.borrow(), Readiness::NotReady);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resync_keeps_the_current_link() {
        let (connector, _listener) = memory::channel();
        let supervisor = supervisor(connector);
        let mut events = supervisor.subscribe();
        supervisor.connect(Endpoint::default()).await.unwrap();
        let conn = next_connected(&mut events).await;

        let shared = shared(Readiness::Ready, Some(conn.clone()));
        resync(&shared, &supervisor).await;

        assert_eq!(*shared.ready.borrow(), Readiness::Ready);
        assert!(shared.inner.lock().await.link.is_some());
        let quiet = tokio::time::timeout(Duration::from_secs(60), events.recv()).await;
        assert!(quiet.is_err(), "no event expected, got {quiet:?}");
        assert!(conn.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resync_with_idle_supervisor_makes_ready_fail_fast() {
        let (connector, _listener) = memory::channel();
        let supervisor = supervisor(connector);

        let shared = shared(Readiness::NotReady, None);
        resync(&shared, &supervisor).await;

        assert_eq!(*shared.ready.borrow(), Readiness::Idle);
    }
}
