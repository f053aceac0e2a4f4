//! The pending-request queue and the line/raw framing state machine.
//!
//! This is the sans-io heart of a connection: bytes go in through
//! [`Pipeline::receive`], replies come out through each request's
//! oneshot channel. Nothing here touches a socket, so every ordering and
//! reassembly rule can be tested by feeding byte slices.
//!
//! ```text
//!            decoder says NeedRaw(n)
//!   ┌──────┐ ───────────────────────→ ┌──────────────────┐
//!   │ Line │                          │ Raw { remaining } │
//!   └──────┘ ←─────────────────────── └──────────────────┘
//!            n bytes delivered (ok or error);
//!            surplus is re-read as lines
//! ```

use std::collections::VecDeque;

use tokio::sync::oneshot;
use tubewire_protocol::{Decoder, Step};

use crate::{FramingError, PipelineConfig, PipelineError};

/// Reply channel for one request.
pub type ReplySender<T> = oneshot::Sender<Result<T, PipelineError>>;

/// A request that has been written and is waiting for its reply.
pub struct Pending<D: Decoder> {
    command: &'static str,
    decoder: D,
    reply: ReplySender<D::Output>,
}

impl<D: Decoder> Pending<D> {
    /// Pairs a decoder with the channel its result is delivered on.
    pub fn new(
        command: &'static str,
        decoder: D,
        reply: ReplySender<D::Output>,
    ) -> Self {
        Self {
            command,
            decoder,
            reply,
        }
    }

    /// Wire name of the request.
    pub fn command(&self) -> &'static str {
        self.command
    }

    fn resolve(self, value: D::Output) {
        tracing::trace!(command = self.command, "reply resolved");
        // The caller may have stopped waiting; that's not our problem.
        let _ = self.reply.send(Ok(value));
    }

    pub(crate) fn reject(self, error: PipelineError) {
        tracing::debug!(command = self.command, %error, "request rejected");
        let _ = self.reply.send(Err(error));
    }
}

/// How incoming bytes are currently being split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Split on `\r\n`; each line goes to the head request's decoder.
    Line,
    /// Deliver exactly `remaining` bytes to the head request's decoder.
    Raw { remaining: usize },
}

/// Ordered in-flight requests plus the framing state for one byte stream.
///
/// ## Invariant
///
/// The server answers strictly in request order, so the head of
/// `pending` always owns the next reply. A request that needs a raw body
/// stays at the head until its body has been delivered.
pub struct Pipeline<D: Decoder> {
    pending: VecDeque<Pending<D>>,
    framing: Framing,
    /// Bytes received but not yet consumed: a partial line, a partial raw
    /// body, or anything that arrived after the current frame.
    buffer: Vec<u8>,
    max_line_length: usize,
    max_body_length: usize,
}

impl<D: Decoder> Pipeline<D> {
    /// Creates an empty pipeline in [`Framing::Line`].
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            pending: VecDeque::new(),
            framing: Framing::Line,
            buffer: Vec::new(),
            max_line_length: config.max_line_length,
            max_body_length: config.max_body_length,
        }
    }

    /// Appends a request that has just been written to the wire.
    pub fn push(&mut self, pending: Pending<D>) {
        tracing::trace!(
            command = pending.command,
            in_flight = self.pending.len() + 1,
            "request queued"
        );
        self.pending.push_back(pending);
    }

    /// Number of requests still waiting for a reply.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Returns `true` if no request is waiting.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Current framing mode.
    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Feeds bytes from the transport, resolving every reply they
    /// complete.
    ///
    /// # Errors
    /// Returns a [`FramingError`] when the stream can no longer be
    /// trusted. The caller must close the connection and
    /// [`fail_all`](Self::fail_all).
    pub fn receive(&mut self, data: &[u8]) -> Result<(), FramingError> {
        self.buffer.extend_from_slice(data);

        loop {
            match self.framing {
                Framing::Line => {
                    let Some(end) = find_crlf(&self.buffer) else {
                        if self.buffer.len() > self.max_line_length {
                            return Err(FramingError::LineTooLong {
                                limit: self.max_line_length,
                            });
                        }
                        return Ok(());
                    };
                    if end > self.max_line_length {
                        return Err(FramingError::LineTooLong {
                            limit: self.max_line_length,
                        });
                    }
                    let line: Vec<u8> = self.buffer.drain(..end + 2).collect();
                    self.deliver(&line)?;
                }
                Framing::Raw { remaining } => {
                    if self.buffer.len() < remaining {
                        return Ok(());
                    }
                    let body: Vec<u8> = self.buffer.drain(..remaining).collect();
                    // Whatever the decoder makes of the body, the bytes are
                    // consumed and framing goes back to lines. A rejected
                    // body does not leave the stream stuck in raw mode.
                    self.framing = Framing::Line;
                    self.deliver(&body)?;
                }
            }
        }
    }

    /// Hands one frame to the head request's decoder and acts on the
    /// result.
    fn deliver(&mut self, frame: &[u8]) -> Result<(), FramingError> {
        let Some(mut head) = self.pending.pop_front() else {
            return Err(FramingError::Unsolicited(
                String::from_utf8_lossy(frame).into_owned(),
            ));
        };

        match head.decoder.decode(frame) {
            Ok(Step::Done(value)) => head.resolve(value),
            Ok(Step::NeedRaw(remaining)) if remaining > self.max_body_length => {
                // Keep the head queued so fail_all reports the close.
                self.pending.push_front(head);
                return Err(FramingError::BodyTooLong {
                    announced: remaining,
                    limit: self.max_body_length,
                });
            }
            Ok(Step::NeedRaw(remaining)) => {
                tracing::trace!(
                    command = head.command,
                    remaining,
                    "switching to raw framing"
                );
                self.pending.push_front(head);
                self.framing = Framing::Raw { remaining };
            }
            Err(error) => head.reject(PipelineError::Decode(error)),
        }
        Ok(())
    }

    /// Rejects every pending request, oldest first, with
    /// [`PipelineError::ConnectionLost`] and resets the framing state.
    pub fn fail_all(&mut self, reason: &str) {
        if !self.pending.is_empty() {
            tracing::debug!(
                count = self.pending.len(),
                reason,
                "failing in-flight requests"
            );
        }
        for pending in self.pending.drain(..) {
            pending.reject(PipelineError::ConnectionLost(reason.to_string()));
        }
        self.framing = Framing::Line;
        self.buffer.clear();
    }
}

/// Position of the first `\r\n`, if any.
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}
