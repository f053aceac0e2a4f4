//! Connection actor: one Tokio task that owns a transport and its
//! [`Pipeline`].
//!
//! Callers talk to the actor through a cheap-to-clone
//! [`ConnectionHandle`]. Encoding happens on the caller's side so invalid
//! requests fail synchronously; the encoded bytes and the decoder then
//! travel over an unbounded channel, which both preserves issue order and
//! lets `enqueue` return without awaiting. The actor writes the bytes,
//! queues the decoder, and feeds everything the transport delivers into
//! the pipeline.
//!
//! When the transport closes (or framing breaks), the actor fails every
//! pending request and its task resolves to the close reason, which is how
//! the reconnect supervisor learns about it.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tubewire_protocol::Codec;
use tubewire_transport::{Connection, ConnectionId};

use crate::framing::{Pending, Pipeline, ReplySender};
use crate::{PipelineConfig, PipelineError};

/// Commands sent to a connection actor through its channel.
enum ConnectionCommand<C: Codec> {
    /// Write `bytes` and queue `decoder` for the reply.
    Enqueue {
        command: &'static str,
        bytes: Vec<u8>,
        decoder: C::Decoder,
        reply: ReplySender<C::Reply>,
    },

    /// Close the connection, failing everything in flight.
    Close,
}

/// Handle to a running connection actor.
///
/// Cloning copies an `Arc` and an `mpsc::UnboundedSender`.
pub struct ConnectionHandle<C: Codec> {
    id: ConnectionId,
    codec: Arc<C>,
    commands: mpsc::UnboundedSender<ConnectionCommand<C>>,
}

impl<C: Codec> Clone for ConnectionHandle<C> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            codec: Arc::clone(&self.codec),
            commands: self.commands.clone(),
        }
    }
}

impl<C: Codec> std::fmt::Debug for ConnectionHandle<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("open", &self.is_open())
            .finish()
    }
}

impl<C: Codec> ConnectionHandle<C> {
    /// Returns the transport's connection ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns `false` once the actor has stopped.
    pub fn is_open(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Issues a request.
    ///
    /// The request is encoded immediately and handed to the actor, so
    /// requests issued one after another are written (and answered) in
    /// that order even if the returned futures are awaited later or never.
    ///
    /// # Errors
    /// - [`PipelineError::NotConnected`]: the connection is closed.
    /// - [`PipelineError::Encode`]: the request is invalid; nothing was
    ///   sent.
    pub fn enqueue(
        &self,
        request: &C::Request,
    ) -> Result<ReplyFuture<C::Reply>, PipelineError> {
        if !self.is_open() {
            return Err(PipelineError::NotConnected);
        }
        let command = self.codec.command_name(request);
        let (bytes, decoder) =
            self.codec.encode(request).map_err(PipelineError::Encode)?;
        let (reply, receiver) = oneshot::channel();
        self.commands
            .send(ConnectionCommand::Enqueue {
                command,
                bytes,
                decoder,
                reply,
            })
            .map_err(|_| PipelineError::NotConnected)?;
        Ok(ReplyFuture { command, receiver })
    }

    /// Asks the actor to close the connection. Pending requests fail with
    /// [`PipelineError::ConnectionLost`].
    pub fn close(&self) {
        let _ = self.commands.send(ConnectionCommand::Close);
    }
}

/// Resolves to the reply of one enqueued request.
#[must_use = "the reply is lost if the future is dropped"]
pub struct ReplyFuture<T> {
    command: &'static str,
    receiver: oneshot::Receiver<Result<T, PipelineError>>,
}

impl<T> ReplyFuture<T> {
    /// Wire name of the request this reply belongs to.
    pub fn command(&self) -> &'static str {
        self.command
    }
}

impl<T> Future for ReplyFuture<T> {
    type Output = Result<T, PipelineError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let command = self.command;
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            // The actor dropped the sender without answering: it is gone.
            Poll::Ready(Err(_)) => Poll::Ready(Err(PipelineError::ConnectionLost(
                format!("connection dropped before {command} was answered"),
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Starts a connection actor on `transport`.
///
/// Returns the handle plus the actor's task. The task resolves to the
/// reason the connection ended once it has failed every pending request.
pub fn spawn<T, C>(
    transport: T,
    codec: Arc<C>,
    config: &PipelineConfig,
) -> (ConnectionHandle<C>, JoinHandle<String>)
where
    T: Connection,
    C: Codec,
{
    let id = transport.id();
    let (tx, rx) = mpsc::unbounded_channel();
    let actor = ConnectionActor {
        id,
        transport,
        pipeline: Pipeline::new(config),
        commands: rx,
    };
    let task = tokio::spawn(actor.run());
    let handle = ConnectionHandle {
        id,
        codec,
        commands: tx,
    };
    (handle, task)
}

/// What woke the actor up.
enum Event<C: Codec, E> {
    Command(Option<ConnectionCommand<C>>),
    Received(Result<Option<Vec<u8>>, E>),
}

/// The internal actor state. Runs inside a Tokio task.
struct ConnectionActor<T: Connection, C: Codec> {
    id: ConnectionId,
    transport: T,
    pipeline: Pipeline<C::Decoder>,
    commands: mpsc::UnboundedReceiver<ConnectionCommand<C>>,
}

impl<T: Connection, C: Codec> ConnectionActor<T, C> {
    /// Runs the actor loop until the connection ends.
    async fn run(mut self) -> String {
        let conn_id = self.id;
        tracing::debug!(%conn_id, "connection actor started");

        let reason = loop {
            let event = tokio::select! {
                cmd = self.commands.recv() => Event::Command(cmd),
                received = self.transport.recv() => Event::Received(received),
            };

            match event {
                Event::Command(Some(ConnectionCommand::Enqueue {
                    command,
                    bytes,
                    decoder,
                    reply,
                })) => {
                    // Queue before writing: if the write fails, the
                    // request is failed with everything else below.
                    self.pipeline.push(Pending::new(command, decoder, reply));
                    if let Err(e) = self.transport.send(&bytes).await {
                        break format!("send failed: {e}");
                    }
                }
                Event::Command(Some(ConnectionCommand::Close)) => {
                    break "closed by client".to_string();
                }
                Event::Command(None) => {
                    break "all handles dropped".to_string();
                }
                Event::Received(Ok(Some(data))) => {
                    tracing::trace!(%conn_id, bytes = data.len(), "received");
                    if let Err(e) = self.pipeline.receive(&data) {
                        tracing::warn!(%conn_id, error = %e, "framing error");
                        break e.to_string();
                    }
                }
                Event::Received(Ok(None)) => {
                    break "closed by server".to_string();
                }
                Event::Received(Err(e)) => {
                    break format!("receive failed: {e}");
                }
            }
        };

        // Nothing new may be queued from here on; anything already in the
        // channel was never written and fails like the rest.
        self.commands.close();
        while let Ok(cmd) = self.commands.try_recv() {
            if let ConnectionCommand::Enqueue {
                command,
                decoder,
                reply,
                ..
            } = cmd
            {
                Pending::<C::Decoder>::new(command, decoder, reply)
                    .reject(PipelineError::ConnectionLost(reason.clone()));
            }
        }
        self.pipeline.fail_all(&reason);

        if let Err(e) = self.transport.close().await {
            tracing::trace!(%conn_id, error = %e, "close after shutdown");
        }
        tracing::info!(%conn_id, %reason, "connection closed");
        reason
    }
}
