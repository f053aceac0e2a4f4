//! Codec and decoder traits, plus the beanstalkd implementation.
//!
//! A "codec" turns a request into wire bytes and hands back a decoder
//! that knows how to read that request's reply. The connection layer
//! only needs something that implements [`Codec`].

use crate::reply::ReplyDecoder;
use crate::{Command, ProtocolError, Response};

/// What a decoder wants after seeing a chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step<T> {
    /// The reply is complete.
    Done(T),
    /// The reply continues with exactly this many raw bytes, which must be
    /// delivered verbatim in the next `decode` call.
    NeedRaw(usize),
}

/// Incremental reply decoder for a single request.
///
/// The first call receives one full line, terminator included. If it
/// returns [`Step::NeedRaw`], the next call receives exactly that many
/// bytes.
pub trait Decoder: Send + 'static {
    /// The decoded reply.
    type Output: Send + 'static;

    /// Feeds the next line or raw chunk.
    ///
    /// # Errors
    /// Returns a [`ProtocolError`] when the chunk is not a valid reply.
    /// The error belongs to this request only.
    fn decode(&mut self, chunk: &[u8]) -> Result<Step<Self::Output>, ProtocolError>;
}

/// Encodes requests and supplies the matching reply decoder.
///
/// ## Trait bounds
///
/// - `Send + Sync + 'static` → one codec is shared (behind an `Arc`) by
///   every connection the reconnect supervisor creates.
pub trait Codec: Send + Sync + 'static {
    /// A request value.
    type Request: Send + 'static;
    /// A decoded reply value.
    type Reply: Send + 'static;
    /// The decoder handed out per request.
    type Decoder: Decoder<Output = Self::Reply>;

    /// Wire name of the request, used for logging and error context.
    fn command_name(&self, request: &Self::Request) -> &'static str;

    /// Every command name this codec can encode.
    fn command_names(&self) -> &'static [&'static str];

    /// Serializes a request and creates the decoder for its reply.
    ///
    /// # Errors
    /// Returns [`ProtocolError::InvalidRequest`] when the request cannot
    /// be sent as-is.
    fn encode(
        &self,
        request: &Self::Request,
    ) -> Result<(Vec<u8>, Self::Decoder), ProtocolError>;
}

// ---------------------------------------------------------------------------
// BeanstalkCodec
// ---------------------------------------------------------------------------

/// The [`Codec`] for beanstalkd's text protocol.
///
/// ## Example
///
/// ```rust
/// use tubewire_protocol::{BeanstalkCodec, Codec, Command, Decoder, Response, Step};
///
/// let codec = BeanstalkCodec;
/// let (bytes, mut decoder) = codec.encode(&Command::Watch("emails".into())).unwrap();
/// assert_eq!(bytes, b"watch emails\r\n");
///
/// let step = decoder.decode(b"WATCHING 2\r\n").unwrap();
/// assert_eq!(step, Step::Done(Response::Watching(2)));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct BeanstalkCodec;

impl Codec for BeanstalkCodec {
    type Request = Command;
    type Reply = Response;
    type Decoder = ReplyDecoder;

    fn command_name(&self, request: &Command) -> &'static str {
        request.name()
    }

    fn command_names(&self) -> &'static [&'static str] {
        Command::NAMES
    }

    fn encode(
        &self,
        request: &Command,
    ) -> Result<(Vec<u8>, ReplyDecoder), ProtocolError> {
        let bytes = request.encode()?;
        Ok((bytes, ReplyDecoder::new(request.name(), request.expect())))
    }
}
