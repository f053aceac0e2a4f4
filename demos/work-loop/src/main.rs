//! Producer and worker in one process.
//!
//! Queues a handful of JSON jobs on the `emails` tube, then works through
//! them until the tube stays empty for a second. Kill and restart
//! beanstalkd while it runs to watch the session reconnect and restore its
//! tube selection.
//!
//! ```text
//! cargo run -p work-loop -- 127.0.0.1:11300
//! RUST_LOG=tubewire=debug,work_loop=info cargo run -p work-loop
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tubewire::prelude::*;

const TUBE: &str = "emails";

// ---------------------------------------------------------------------------
// Job payload
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct Email {
    to: String,
    subject: String,
}

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

/// Reads `host:port` from the first argument, defaulting to the local
/// server.
fn endpoint_from_args(mut args: impl Iterator<Item = String>) -> Result<Endpoint, String> {
    let Some(arg) = args.next() else {
        return Ok(Endpoint::default());
    };
    let (host, port) = arg
        .rsplit_once(':')
        .ok_or_else(|| format!("expected host:port, got {arg:?}"))?;
    let port = port
        .parse()
        .map_err(|_| format!("invalid port in {arg:?}"))?;
    Ok(Endpoint::new(host, port))
}

// ---------------------------------------------------------------------------
// Producer and worker
// ---------------------------------------------------------------------------

async fn produce(session: &Session, count: usize) -> Result<(), Box<dyn std::error::Error>> {
    for n in 0..count {
        let email = Email {
            to: format!("user{n}@example.com"),
            subject: format!("Welcome #{n}"),
        };
        let id = session.put(serde_json::to_vec(&email)?).await?;
        info!(%id, to = %email.to, "queued");
    }
    Ok(())
}

async fn work(session: &Session) -> Result<usize, Box<dyn std::error::Error>> {
    let mut done = 0;
    loop {
        match session.reserve_with_timeout(Duration::from_secs(1)).await {
            Ok(job) => {
                match serde_json::from_slice::<Email>(&job.body) {
                    Ok(email) => info!(id = %job.id, to = %email.to, subject = %email.subject, "sending"),
                    Err(e) => warn!(id = %job.id, error = %e, "not an email, dropping"),
                }
                session.delete(job.id).await?;
                done += 1;
            }
            Err(e) if e.server_error() == Some(&ServerError::TimedOut) => return Ok(done),
            Err(SessionError::NotConnected | SessionError::Request(_)) => {
                warn!("link lost, waiting for the session to come back");
                session.ready().await?;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let endpoint = endpoint_from_args(std::env::args().skip(1))?;
    let session = ClientBuilder::new()
        .endpoint(endpoint.host, endpoint.port)
        .connect()
        .await?;

    session.use_tube(TUBE).await?;
    session.watch(TUBE).await?;
    session.ignore("default").await?;

    produce(&session, 5).await?;
    let done = work(&session).await?;
    info!(done, "tube drained");

    session.disconnect().await?;
    Ok(())
}
