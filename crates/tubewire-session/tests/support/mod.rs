//! A small scripted beanstalkd stand-in on the in-memory transport.
//!
//! It understands just enough of the protocol for session tests: tube
//! selection, put/reserve/delete, and a few list commands. Watching the
//! tube `refused` always fails with `OUT_OF_MEMORY`. Every request
//! line it receives is logged with the index of the connection it arrived
//! on, so tests can assert exactly what a session sent after a reconnect.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tubewire_transport::Connection;
use tubewire_transport::memory::{self, MemoryConnection, MemoryConnector, MemoryListener};

struct StoredJob {
    tube: String,
    body: Vec<u8>,
    reserved: bool,
}

#[derive(Default)]
struct Store {
    next_id: u64,
    jobs: BTreeMap<u64, StoredJob>,
}

/// Handle to a running fake server.
pub struct FakeServer {
    lines: mpsc::UnboundedReceiver<(u32, String)>,
    kill: broadcast::Sender<()>,
    gate: watch::Sender<bool>,
    accepting: mpsc::UnboundedSender<(bool, oneshot::Sender<()>)>,
}

impl FakeServer {
    /// Starts a server and returns it with the connector sessions should use.
    pub fn start() -> (Self, MemoryConnector) {
        let (connector, listener) = memory::channel();
        let (lines_tx, lines_rx) = mpsc::unbounded_channel();
        let (kill_tx, _) = broadcast::channel(4);
        let (gate_tx, gate_rx) = watch::channel(true);
        let (accepting_tx, accepting_rx) = mpsc::unbounded_channel();

        tokio::spawn(accept_loop(
            listener,
            accepting_rx,
            lines_tx,
            kill_tx.clone(),
            gate_rx,
        ));

        let server = Self {
            lines: lines_rx,
            kill: kill_tx,
            gate: gate_tx,
            accepting: accepting_tx,
        };
        (server, connector)
    }

    /// Waits for the next request line: `(connection index, line)`.
    /// Connection indices start at 0 and count accepted connections.
    pub async fn next_line(&mut self) -> (u32, String) {
        self.lines.recv().await.expect("fake server stopped")
    }

    /// Waits for the next `n` request lines.
    pub async fn next_lines(&mut self, n: usize) -> Vec<(u32, String)> {
        let mut lines = Vec::with_capacity(n);
        for _ in 0..n {
            lines.push(self.next_line().await);
        }
        lines
    }

    /// Closes every open connection from the server side.
    pub fn drop_connections(&self) {
        let _ = self.kill.send(());
    }

    /// While held, requests are read and logged but not answered.
    pub fn hold_replies(&self, hold: bool) {
        self.gate.send_replace(!hold);
    }

    /// Starts or stops accepting new connections.
    pub async fn set_accepting(&self, accepting: bool) {
        let (ack, done) = oneshot::channel();
        let _ = self.accepting.send((accepting, ack));
        let _ = done.await;
    }
}

async fn accept_loop(
    mut listener: MemoryListener,
    mut accepting: mpsc::UnboundedReceiver<(bool, oneshot::Sender<()>)>,
    lines: mpsc::UnboundedSender<(u32, String)>,
    kill: broadcast::Sender<()>,
    gate: watch::Receiver<bool>,
) {
    let store = Arc::new(Mutex::new(Store::default()));
    let mut index = 0;
    loop {
        tokio::select! {
            conn = listener.accept() => {
                let Some(conn) = conn else { break };
                tokio::spawn(serve(
                    conn,
                    index,
                    Arc::clone(&store),
                    lines.clone(),
                    kill.subscribe(),
                    gate.clone(),
                ));
                index += 1;
            }
            Some((flag, ack)) = accepting.recv() => {
                listener.set_accepting(flag);
                let _ = ack.send(());
            }
        }
    }
}

async fn serve(
    conn: MemoryConnection,
    index: u32,
    store: Arc<Mutex<Store>>,
    lines: mpsc::UnboundedSender<(u32, String)>,
    mut kill: broadcast::Receiver<()>,
    mut gate: watch::Receiver<bool>,
) {
    let mut used = "default".to_string();
    let mut watched = vec!["default".to_string()];
    let mut buf = Vec::new();

    loop {
        let chunk = tokio::select! {
            received = conn.recv() => match received {
                Ok(Some(chunk)) => chunk,
                _ => break,
            },
            _ = kill.recv() => {
                let _ = conn.close().await;
                break;
            }
        };
        buf.extend_from_slice(&chunk);

        let mut out = Vec::new();
        while let Some((line, body)) = take_request(&mut buf) {
            let _ = lines.send((index, line.clone()));
            let mut jobs = store.lock().unwrap();
            out.extend(answer(&line, body, &mut used, &mut watched, &mut jobs));
        }
        if out.is_empty() {
            continue;
        }

        let released = tokio::select! {
            _ = gate.wait_for(|open| *open) => true,
            _ = kill.recv() => false,
        };
        if !released {
            let _ = conn.close().await;
            break;
        }
        if conn.send(&out).await.is_err() {
            break;
        }
    }
}

/// Splits one complete request (line plus `put` body) off the front.
fn take_request(buf: &mut Vec<u8>) -> Option<(String, Option<Vec<u8>>)> {
    let end = buf.windows(2).position(|w| w == b"\r\n")?;
    let line = String::from_utf8_lossy(&buf[..end]).into_owned();
    if line.starts_with("put ") {
        let len: usize = line.rsplit(' ').next()?.parse().ok()?;
        let total = end + 2 + len + 2;
        if buf.len() < total {
            return None;
        }
        let body = buf[end + 2..end + 2 + len].to_vec();
        buf.drain(..total);
        return Some((line, Some(body)));
    }
    buf.drain(..end + 2);
    Some((line, None))
}

fn yaml_list(items: &[String]) -> Vec<u8> {
    let mut yaml = String::from("---\n");
    for item in items {
        yaml.push_str(&format!("- {item}\n"));
    }
    ok_body(yaml.as_bytes())
}

fn ok_body(body: &[u8]) -> Vec<u8> {
    let mut out = format!("OK {}\r\n", body.len()).into_bytes();
    out.extend_from_slice(body);
    out.extend_from_slice(b"\r\n");
    out
}

fn answer(
    line: &str,
    body: Option<Vec<u8>>,
    used: &mut String,
    watched: &mut Vec<String>,
    store: &mut Store,
) -> Vec<u8> {
    let words: Vec<&str> = line.split(' ').collect();
    match (words[0], words.get(1)) {
        ("put", _) => {
            store.next_id += 1;
            let id = store.next_id;
            store.jobs.insert(
                id,
                StoredJob {
                    tube: used.clone(),
                    body: body.unwrap_or_default(),
                    reserved: false,
                },
            );
            format!("INSERTED {id}\r\n").into_bytes()
        }
        ("use", Some(tube)) => {
            *used = tube.to_string();
            format!("USING {used}\r\n").into_bytes()
        }
        // A tube the server refuses, for replay failure tests.
        ("watch", Some(&"refused")) => b"OUT_OF_MEMORY\r\n".to_vec(),
        ("watch", Some(tube)) => {
            if !watched.iter().any(|t| t == tube) {
                watched.push(tube.to_string());
            }
            format!("WATCHING {}\r\n", watched.len()).into_bytes()
        }
        ("ignore", Some(tube)) => {
            if watched.len() == 1 && watched[0] == *tube {
                return b"NOT_IGNORED\r\n".to_vec();
            }
            watched.retain(|t| t != tube);
            format!("WATCHING {}\r\n", watched.len()).into_bytes()
        }
        ("reserve", None) => {
            let ready = store
                .jobs
                .iter_mut()
                .find(|(_, job)| !job.reserved && watched.contains(&job.tube));
            match ready {
                Some((id, job)) => {
                    job.reserved = true;
                    let mut out = format!("RESERVED {id} {}\r\n", job.body.len()).into_bytes();
                    out.extend_from_slice(&job.body);
                    out.extend_from_slice(b"\r\n");
                    out
                }
                None => b"TIMED_OUT\r\n".to_vec(),
            }
        }
        ("delete", Some(id)) => {
            let removed = id
                .parse::<u64>()
                .ok()
                .and_then(|id| store.jobs.remove(&id));
            if removed.is_some() {
                b"DELETED\r\n".to_vec()
            } else {
                b"NOT_FOUND\r\n".to_vec()
            }
        }
        ("list-tube-used", None) => format!("USING {used}\r\n").into_bytes(),
        ("list-tubes-watched", None) => yaml_list(watched),
        ("stats", None) => {
            let yaml = format!("---\ntotal-jobs: {}\n", store.next_id);
            ok_body(yaml.as_bytes())
        }
        _ => b"UNKNOWN_COMMAND\r\n".to_vec(),
    }
}
