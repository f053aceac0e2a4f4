//! End-to-end tests for sessions against the scripted fake server.
//!
//! Time is paused so reconnect delays elapse as soon as the runtime is
//! otherwise idle.

mod support;

use std::collections::BTreeSet;
use std::time::Duration;

use support::FakeServer;
use tubewire_pipeline::PipelineError;
use tubewire_protocol::{JobId, ProtocolError, ServerError};
use tubewire_reconnect::BackoffConfig;
use tubewire_session::{Session, SessionConfig, SessionError};
use tubewire_transport::Endpoint;

// =========================================================================
// Helpers
// =========================================================================

fn config() -> SessionConfig {
    SessionConfig {
        backoff: BackoffConfig::fixed(
            Duration::from_millis(100),
            2.0,
            Duration::from_secs(1),
        ),
        ..Default::default()
    }
}

async fn connected(config: SessionConfig) -> (Session, FakeServer) {
    let (server, connector) = FakeServer::start();
    let session = Session::with_connector(connector, config);
    session.connect(Endpoint::default()).await.unwrap();
    session.ready().await.unwrap();
    (session, server)
}

fn tubes(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|n| n.to_string()).collect()
}

fn lines(conn: u32, expected: &[&str]) -> Vec<(u32, String)> {
    expected.iter().map(|l| (conn, l.to_string())).collect()
}

/// Drops the link and waits until the session has noticed.
async fn drop_link(server: &FakeServer) {
    server.drop_connections();
    tokio::time::sleep(Duration::from_millis(10)).await;
}

// =========================================================================
// Fresh session
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_new_session_has_default_tubes() {
    let (_server, connector) = FakeServer::start();
    let session = Session::with_connector(connector, config());

    assert_eq!(session.used_tube().await, "default");
    assert_eq!(session.watched_tubes().await, tubes(&["default"]));
    assert_eq!(session.command_names().len(), 24);
    assert!(session.command_names().contains(&"reserve-with-timeout"));
}

#[tokio::test(start_paused = true)]
async fn test_commands_before_connect_fail_fast() {
    let (_server, connector) = FakeServer::start();
    let session = Session::with_connector(connector, config());

    assert_eq!(session.ready().await.unwrap_err(), SessionError::NotConnected);
    assert_eq!(session.put("job").await, Err(SessionError::NotConnected));

    // A failed watch leaves the intent untouched.
    assert_eq!(session.watch("jobs").await, Err(SessionError::NotConnected));
    assert_eq!(session.watched_tubes().await, tubes(&["default"]));
}

#[tokio::test(start_paused = true)]
async fn test_connect_twice_is_rejected() {
    let (session, _server) = connected(config()).await;
    assert_eq!(
        session.connect(Endpoint::default()).await,
        Err(SessionError::AlreadyConnected)
    );
    // Still usable.
    assert!(session.is_ready());
}

// =========================================================================
// Commands
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_three_puts_without_awaiting_resolve_in_order() {
    let (session, mut server) = connected(config()).await;

    let (a, b, c) = tokio::join!(session.put("a"), session.put("b"), session.put("c"));

    assert_eq!(a.unwrap(), JobId(1));
    assert_eq!(b.unwrap(), JobId(2));
    assert_eq!(c.unwrap(), JobId(3));
    assert_eq!(
        server.next_lines(3).await,
        lines(
            0,
            &[
                "put 2147483648 0 120 1",
                "put 2147483648 0 120 1",
                "put 2147483648 0 120 1",
            ]
        )
    );
}

#[tokio::test(start_paused = true)]
async fn test_put_reserve_delete_round() {
    let (session, _server) = connected(config()).await;

    let id = session.put("hello").await.unwrap();
    let job = session.reserve().await.unwrap();
    assert_eq!(job.id, id);
    assert_eq!(job.body, b"hello");

    session.delete(id).await.unwrap();
    let missing = session.delete(id).await.unwrap_err();
    assert_eq!(missing.server_error(), Some(&ServerError::NotFound));

    let stats = session.stats().await.unwrap();
    assert_eq!(stats.get("total-jobs").map(String::as_str), Some("1"));
}

#[tokio::test(start_paused = true)]
async fn test_tube_commands_update_state() {
    let (session, _server) = connected(config()).await;

    assert_eq!(session.use_tube("emails").await.unwrap(), "emails");
    assert_eq!(session.watch("emails").await.unwrap(), 2);
    assert_eq!(session.ignore("default").await.unwrap(), 1);

    assert_eq!(session.used_tube().await, "emails");
    assert_eq!(session.watched_tubes().await, tubes(&["emails"]));
    assert_eq!(
        session.list_tubes_watched().await.unwrap(),
        vec!["emails".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn test_invalid_tube_name_fails_without_state_change() {
    let (session, _server) = connected(config()).await;

    let err = session.watch("no spaces").await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Request(PipelineError::Encode(ProtocolError::InvalidRequest(_)))
    ));
    assert_eq!(session.watched_tubes().await, tubes(&["default"]));
}

#[tokio::test(start_paused = true)]
async fn test_ignoring_last_tube_keeps_it() {
    let (session, _server) = connected(config()).await;

    let err = session.ignore("default").await.unwrap_err();
    assert_eq!(err.server_error(), Some(&ServerError::NotIgnored));
    assert_eq!(session.watched_tubes().await, tubes(&["default"]));
}

// =========================================================================
// Reconnect and replay
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_reconnect_replays_use_watch_ignore() {
    let (session, mut server) = connected(config()).await;
    session.use_tube("foo").await.unwrap();
    session.watch("bar").await.unwrap();
    session.ignore("default").await.unwrap();
    server.next_lines(3).await;

    server.drop_connections();

    assert_eq!(
        server.next_lines(3).await,
        lines(1, &["use foo", "watch bar", "ignore default"])
    );
    session.ready().await.unwrap();
    assert_eq!(session.list_tube_used().await.unwrap(), "foo");
    assert_eq!(
        session.list_tubes_watched().await.unwrap(),
        vec!["bar".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_replays_watch_then_ignore_default() {
    let (session, mut server) = connected(config()).await;
    session.watch("jobs").await.unwrap();
    session.ignore("default").await.unwrap();
    server.next_lines(2).await;

    server.drop_connections();

    assert_eq!(
        server.next_lines(2).await,
        lines(1, &["watch jobs", "ignore default"])
    );
    session.ready().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_default_session_replays_nothing() {
    let (session, mut server) = connected(config()).await;

    drop_link(&server).await;
    session.ready().await.unwrap();
    session.list_tube_used().await.unwrap();

    // The first thing on the new connection is our own command.
    assert_eq!(server.next_line().await, (1, "list-tube-used".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_commands_during_replay_are_not_connected() {
    let (session, mut server) = connected(config()).await;
    session.use_tube("foo").await.unwrap();
    server.next_line().await;

    server.hold_replies(true);
    server.drop_connections();
    assert_eq!(server.next_line().await, (1, "use foo".to_string()));

    assert!(!session.is_ready());
    assert_eq!(session.put("early").await, Err(SessionError::NotConnected));
    assert_eq!(session.used_tube().await, "foo");

    server.hold_replies(false);
    session.ready().await.unwrap();
    assert_eq!(session.put("late").await.unwrap(), JobId(1));
}

#[tokio::test(start_paused = true)]
async fn test_link_lost_mid_replay_replays_again_from_scratch() {
    let (session, mut server) = connected(config()).await;
    session.use_tube("foo").await.unwrap();
    session.watch("bar").await.unwrap();
    server.next_lines(2).await;

    // The replay on the second connection stalls after its first step...
    server.hold_replies(true);
    server.drop_connections();
    assert_eq!(server.next_line().await, (1, "use foo".to_string()));

    // ...and that connection dies before answering.
    server.drop_connections();
    server.hold_replies(false);

    assert_eq!(
        server.next_lines(2).await,
        lines(2, &["use foo", "watch bar"])
    );
    session.ready().await.unwrap();
    assert_eq!(session.used_tube().await, "foo");
    assert_eq!(session.list_tube_used().await.unwrap(), "foo");
    assert_eq!(server.next_line().await, (2, "list-tube-used".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_refused_replay_counts_toward_max_retries() {
    let (session, mut server) = connected(SessionConfig {
        backoff: config().backoff.with_max_retries(2),
        ..Default::default()
    })
    .await;

    // The server refuses, but the session records the watch anyway.
    let err = session.watch("refused").await.unwrap_err();
    assert_eq!(err.server_error(), Some(&ServerError::OutOfMemory));
    assert_eq!(session.watched_tubes().await, tubes(&["default", "refused"]));
    server.next_line().await;

    server.drop_connections();

    // Every new connection is handed back after its refused replay until
    // the retry limit is reached.
    assert_eq!(server.next_line().await, (1, "watch refused".to_string()));
    assert_eq!(server.next_line().await, (2, "watch refused".to_string()));
    assert_eq!(session.ready().await.unwrap_err(), SessionError::NotConnected);
    assert!(!session.is_ready());
}

#[tokio::test(start_paused = true)]
async fn test_pending_request_fails_when_link_drops() {
    let (session, mut server) = connected(config()).await;
    server.hold_replies(true);

    let (result, ()) = tokio::join!(session.put("lost"), async {
        server.next_line().await;
        server.drop_connections();
    });

    assert!(matches!(
        result,
        Err(SessionError::Request(PipelineError::ConnectionLost(_)))
    ));

    server.hold_replies(false);
    session.ready().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_gave_up_session_is_not_ready() {
    let (server, connector) = FakeServer::start();
    server.set_accepting(false).await;
    let session = Session::with_connector(
        connector,
        SessionConfig {
            backoff: config().backoff.with_max_retries(1),
            ..Default::default()
        },
    );

    session.connect(Endpoint::default()).await.unwrap();
    assert_eq!(session.ready().await.unwrap_err(), SessionError::NotConnected);
}

#[tokio::test(start_paused = true)]
async fn test_connect_after_giving_up_is_accepted() {
    let (server, connector) = FakeServer::start();
    server.set_accepting(false).await;
    let session = Session::with_connector(
        connector,
        SessionConfig {
            backoff: config().backoff.with_max_retries(0),
            ..Default::default()
        },
    );
    session.connect(Endpoint::default()).await.unwrap();
    assert_eq!(session.ready().await.unwrap_err(), SessionError::NotConnected);

    server.set_accepting(true).await;
    session.connect(Endpoint::default()).await.unwrap();
    session.ready().await.unwrap();
    assert_eq!(session.put("after").await.unwrap(), JobId(1));
}

// =========================================================================
// Disconnect
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_disconnect_resets_state_and_stops() {
    let (session, mut server) = connected(config()).await;
    session.use_tube("foo").await.unwrap();
    session.watch("bar").await.unwrap();
    server.next_lines(2).await;

    session.disconnect().await.unwrap();

    assert_eq!(session.used_tube().await, "default");
    assert_eq!(session.watched_tubes().await, tubes(&["default"]));
    assert_eq!(session.ready().await.unwrap_err(), SessionError::NotConnected);
    assert_eq!(session.put("x").await, Err(SessionError::NotConnected));

    // Connecting again starts from a clean slate: nothing is replayed.
    session.connect(Endpoint::default()).await.unwrap();
    session.ready().await.unwrap();
    session.stats().await.unwrap();
    assert_eq!(server.next_line().await, (1, "stats".to_string()));
}
