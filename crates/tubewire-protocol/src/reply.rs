//! Replies: what the server sends back, and the incremental decoder that
//! turns reply bytes into a [`Response`].
//!
//! Most replies are one line. Replies that carry a job body or a YAML
//! document are a header line announcing `<bytes>`, followed by exactly
//! `<bytes>` raw bytes and a trailing `\r\n`. The decoder sees the header
//! first and answers [`Step::NeedRaw`] with the number of raw bytes it
//! wants next; the caller feeds them in a second `decode` call.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::codec::{Decoder, Step};
use crate::{JobId, ProtocolError, ServerError};

/// Server statistics as reported by `stats`, `stats-tube` and `stats-job`.
///
/// Values are kept as the text the server sent; callers parse the fields
/// they care about.
pub type Stats = BTreeMap<String, String>;

/// A job as returned by `reserve` and the `peek` family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub body: Vec<u8>,
}

/// A successfully decoded reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Inserted(JobId),
    Using(String),
    Reserved(Job),
    Found(Job),
    Deleted,
    Released,
    Buried,
    Touched,
    /// Number of tubes now on the watch list.
    Watching(u32),
    /// Number of jobs kicked (always 1 for `kick-job`).
    Kicked(u64),
    Paused,
    Stats(Stats),
    Tubes(Vec<String>),
}

/// The success shape a command expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Expect {
    Inserted,
    Using,
    Reserved,
    Found,
    Deleted,
    Released,
    Buried,
    Touched,
    Watching,
    Kicked,
    KickedJob,
    Paused,
    Stats,
    Tubes,
}

/// What the pending raw body will become.
#[derive(Debug, Clone, Copy)]
enum Body {
    Reserved(JobId),
    Found(JobId),
    Stats,
    Tubes,
}

/// Decoder for one reply to one [`Command`](crate::Command).
#[derive(Debug)]
pub struct ReplyDecoder {
    command: &'static str,
    expect: Expect,
    /// Set once a header announced a body; holds the body kind and the
    /// raw byte count requested (body + `\r\n`).
    body: Option<(Body, usize)>,
}

impl ReplyDecoder {
    pub(crate) fn new(command: &'static str, expect: Expect) -> Self {
        Self {
            command,
            expect,
            body: None,
        }
    }

    /// Wire name of the command this decoder answers for.
    pub fn command(&self) -> &'static str {
        self.command
    }

    fn decode_header(
        &mut self,
        chunk: &[u8],
    ) -> Result<Step<Response>, ProtocolError> {
        let line = chunk.strip_suffix(b"\r\n").ok_or_else(|| {
            ProtocolError::Malformed("reply line is missing \\r\\n".into())
        })?;
        let line = std::str::from_utf8(line).map_err(|e| {
            ProtocolError::Malformed(format!("reply line is not UTF-8: {e}"))
        })?;

        let mut words = line.split(' ');
        let word = words.next().unwrap_or_default();

        if let Some(err) = ServerError::from_word(word) {
            return Err(ProtocolError::Server(err));
        }

        let response = match (self.expect, word) {
            (Expect::Inserted, "INSERTED") => {
                Response::Inserted(JobId(arg(&mut words, "job id")?))
            }
            (Expect::Inserted, "BURIED") => {
                let id = JobId(arg(&mut words, "job id")?);
                return Err(ProtocolError::Server(ServerError::Buried(Some(id))));
            }
            (Expect::Using, "USING") => {
                Response::Using(arg(&mut words, "tube name")?)
            }
            (Expect::Reserved, "RESERVED") => {
                let id = JobId(arg(&mut words, "job id")?);
                return self.expect_body(Body::Reserved(id), &mut words);
            }
            (Expect::Found, "FOUND") => {
                let id = JobId(arg(&mut words, "job id")?);
                return self.expect_body(Body::Found(id), &mut words);
            }
            (Expect::Stats, "OK") => {
                return self.expect_body(Body::Stats, &mut words);
            }
            (Expect::Tubes, "OK") => {
                return self.expect_body(Body::Tubes, &mut words);
            }
            (Expect::Deleted, "DELETED") => Response::Deleted,
            (Expect::Released, "RELEASED") => Response::Released,
            (Expect::Released, "BURIED") => {
                return Err(ProtocolError::Server(ServerError::Buried(None)));
            }
            (Expect::Buried, "BURIED") => Response::Buried,
            (Expect::Touched, "TOUCHED") => Response::Touched,
            (Expect::Watching, "WATCHING") => {
                Response::Watching(arg(&mut words, "watch count")?)
            }
            (Expect::Kicked, "KICKED") => {
                Response::Kicked(arg(&mut words, "kick count")?)
            }
            (Expect::KickedJob, "KICKED") => Response::Kicked(1),
            (Expect::Paused, "PAUSED") => Response::Paused,
            _ => {
                return Err(ProtocolError::UnexpectedReply {
                    command: self.command,
                    line: line.to_string(),
                });
            }
        };

        no_more(&mut words, line)?;
        Ok(Step::Done(response))
    }

    fn expect_body<'a>(
        &mut self,
        body: Body,
        words: &mut impl Iterator<Item = &'a str>,
    ) -> Result<Step<Response>, ProtocolError> {
        let len: usize = arg(words, "body length")?;
        let wanted = len.checked_add(2).ok_or_else(|| {
            ProtocolError::Malformed(format!("body length {len} is out of range"))
        })?;
        self.body = Some((body, wanted));
        Ok(Step::NeedRaw(wanted))
    }

    fn decode_body(
        &mut self,
        body: Body,
        wanted: usize,
        chunk: &[u8],
    ) -> Result<Step<Response>, ProtocolError> {
        if chunk.len() != wanted {
            return Err(ProtocolError::Malformed(format!(
                "expected {wanted} body bytes, got {}",
                chunk.len()
            )));
        }
        let data = chunk.strip_suffix(b"\r\n").ok_or_else(|| {
            ProtocolError::Malformed("body is missing its \\r\\n trailer".into())
        })?;

        let response = match body {
            Body::Reserved(id) => Response::Reserved(Job {
                id,
                body: data.to_vec(),
            }),
            Body::Found(id) => Response::Found(Job {
                id,
                body: data.to_vec(),
            }),
            Body::Stats => Response::Stats(parse_stats(data)?),
            Body::Tubes => Response::Tubes(parse_tubes(data)?),
        };
        Ok(Step::Done(response))
    }
}

impl Decoder for ReplyDecoder {
    type Output = Response;

    fn decode(&mut self, chunk: &[u8]) -> Result<Step<Response>, ProtocolError> {
        match self.body.take() {
            None => self.decode_header(chunk),
            Some((body, wanted)) => self.decode_body(body, wanted, chunk),
        }
    }
}

/// Parses the next space-separated argument.
fn arg<'a, T: FromStr>(
    words: &mut impl Iterator<Item = &'a str>,
    what: &str,
) -> Result<T, ProtocolError> {
    let word = words
        .next()
        .ok_or_else(|| ProtocolError::Malformed(format!("missing {what}")))?;
    word.parse()
        .map_err(|_| ProtocolError::Malformed(format!("bad {what}: {word:?}")))
}

fn no_more<'a>(
    words: &mut impl Iterator<Item = &'a str>,
    line: &str,
) -> Result<(), ProtocolError> {
    match words.next() {
        None => Ok(()),
        Some(_) => Err(ProtocolError::Malformed(format!(
            "trailing data in {line:?}"
        ))),
    }
}

fn parse_stats(data: &[u8]) -> Result<Stats, ProtocolError> {
    let map: BTreeMap<String, serde_yaml::Value> = serde_yaml::from_slice(data)
        .map_err(|e| ProtocolError::Malformed(format!("stats YAML: {e}")))?;
    map.into_iter()
        .map(|(key, value)| Ok((key, scalar(value)?)))
        .collect()
}

fn parse_tubes(data: &[u8]) -> Result<Vec<String>, ProtocolError> {
    let list: Vec<serde_yaml::Value> = serde_yaml::from_slice(data)
        .map_err(|e| ProtocolError::Malformed(format!("tube list YAML: {e}")))?;
    list.into_iter().map(scalar).collect()
}

/// Tube names like `2024` arrive as YAML numbers; keep them as text.
fn scalar(value: serde_yaml::Value) -> Result<String, ProtocolError> {
    use serde_yaml::Value;
    match value {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(ProtocolError::Malformed(format!(
            "expected a scalar, got {other:?}"
        ))),
    }
}
