//! Decoding of the upstream's streamed completion body.
//!
//! The body is a sequence of `\n`-terminated lines. Lines starting with
//! `data:` carry either a JSON chunk or the [`SENTINEL`]. The relay forwards
//! only `choices[0].delta.content` from each chunk, as plain text.
//!
//! Decoding happens in three layers, bottom-up:
//!
//! 1. [`Utf8Decoder`] turns network reads into text, holding back the bytes
//!    of a character that is split across two reads.
//! 2. [`EventDecoder`] reassembles lines across reads and classifies them
//!    into [`Event`]s.
//! 3. [`relay`] drives the two over a byte stream and yields fragments.

use std::pin::pin;

use async_stream::stream;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use tracing::{debug, warn};

use super::error::{DecodeError, StreamError};

/// Prefix of a line carrying a payload.
pub const DATA_PREFIX: &str = "data:";

/// Payload that ends the stream.
pub const SENTINEL: &str = "[DONE]";

/// Longest unterminated line held while waiting for its `\n`.
pub const MAX_LINE_LEN: usize = 1024 * 1024;

/// Relayed text fragments of one upstream response.
pub type Fragments = BoxStream<'static, Result<String, StreamError>>;

/// Incremental UTF-8 decoder.
///
/// # Examples
///
/// ```
/// use glm_relay::llm::stream::Utf8Decoder;
///
/// let bytes = "你好".as_bytes();
/// let mut decoder = Utf8Decoder::default();
/// let mut text = decoder.decode(&bytes[..2]).unwrap();
/// text += &decoder.decode(&bytes[2..]).unwrap();
/// assert_eq!(text, "你好");
/// ```
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    /// Decodes `chunk`, prefixed by any bytes held back from the previous call.
    ///
    /// A trailing incomplete character is held back rather than returned.
    ///
    /// # Errors
    ///
    /// [`DecodeError::InvalidUtf8`] if the bytes can never form valid UTF-8.
    pub fn decode(&mut self, chunk: &[u8]) -> Result<String, DecodeError> {
        let mut bytes = std::mem::take(&mut self.pending);
        bytes.extend_from_slice(chunk);

        match String::from_utf8(bytes) {
            Ok(text) => Ok(text),
            Err(e) => {
                let utf8 = e.utf8_error();
                let valid_up_to = utf8.valid_up_to();
                if utf8.error_len().is_some() {
                    return Err(DecodeError::InvalidUtf8 { valid_up_to });
                }
                let mut bytes = e.into_bytes();
                self.pending = bytes.split_off(valid_up_to);
                String::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8 { valid_up_to })
            }
        }
    }

    /// Checks that no partial character is left over at end of input.
    pub fn finish(&mut self) -> Result<(), DecodeError> {
        match std::mem::take(&mut self.pending).len() {
            0 => Ok(()),
            pending => Err(DecodeError::Truncated { pending }),
        }
    }
}

/// A meaningful line of the upstream stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Non-empty text to forward.
    Delta(String),
    /// The sentinel was seen; nothing after it is read.
    Done,
}

#[derive(Debug, Deserialize)]
struct ChunkEvent {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    content: Option<String>,
}

/// Classifies one line (with or without its line terminator).
///
/// Returns `None` for lines that carry nothing to forward: blank lines,
/// non-`data` fields, chunks without content, and malformed JSON. Malformed
/// JSON is logged and otherwise ignored.
pub fn parse_line(line: &str) -> Option<Event> {
    let line = line.trim_end_matches(['\n', '\r']);
    let rest = line.strip_prefix(DATA_PREFIX)?;
    let payload = rest.strip_prefix(' ').unwrap_or(rest);

    if payload.trim_end() == SENTINEL {
        return Some(Event::Done);
    }

    match serde_json::from_str::<ChunkEvent>(payload) {
        Ok(event) => event
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
            .filter(|content| !content.is_empty())
            .map(Event::Delta),
        Err(e) => {
            warn!(error = %e, payload_len = payload.len(), "skipping malformed stream event");
            None
        }
    }
}

/// Reassembles lines across network reads and turns them into [`Event`]s.
#[derive(Debug, Default)]
pub struct EventDecoder {
    utf8: Utf8Decoder,
    line: String,
    done: bool,
}

impl EventDecoder {
    /// Feeds one network read. Returns the events completed by it, in order.
    ///
    /// Once [`Event::Done`] has been returned, the rest of the input is ignored.
    ///
    /// # Errors
    ///
    /// Fails on invalid UTF-8, or with [`DecodeError::LineTooLong`] once the
    /// pending line grows past [`MAX_LINE_LEN`].
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Event>, DecodeError> {
        if self.done {
            return Ok(Vec::new());
        }
        let text = self.utf8.decode(chunk)?;
        self.line.push_str(&text);

        let mut events = Vec::new();
        while let Some(end) = self.line.find('\n') {
            let line: String = self.line.drain(..=end).collect();
            match parse_line(&line) {
                Some(Event::Done) => {
                    self.finish_early();
                    events.push(Event::Done);
                    break;
                }
                Some(event) => events.push(event),
                None => {}
            }
        }
        if self.line.len() > MAX_LINE_LEN {
            return Err(DecodeError::LineTooLong {
                limit: MAX_LINE_LEN,
            });
        }
        Ok(events)
    }

    /// Flushes a final line that had no terminator.
    pub fn finish(&mut self) -> Result<Vec<Event>, DecodeError> {
        if self.done {
            return Ok(Vec::new());
        }
        self.utf8.finish()?;
        let line = std::mem::take(&mut self.line);
        self.done = true;
        Ok(parse_line(&line).into_iter().collect())
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    fn finish_early(&mut self) {
        self.done = true;
        self.line.clear();
        self.utf8 = Utf8Decoder::default();
    }
}

/// Turns an upstream body into a stream of text fragments.
///
/// Each fragment is yielded as soon as the read that completed it has been
/// decoded. The stream ends at the sentinel (without reading further), at the
/// end of the body, or after yielding one [`StreamError`].
pub fn relay<S, E>(body: S) -> impl Stream<Item = Result<String, StreamError>> + Send + 'static
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    stream! {
        let mut body = pin!(body);
        let mut decoder = EventDecoder::default();

        while !decoder.is_done() {
            let events = match body.next().await {
                Some(Ok(chunk)) => decoder.push(&chunk),
                Some(Err(e)) => {
                    yield Err(StreamError::Transport(Box::new(e)));
                    break;
                }
                None => decoder.finish(),
            };

            match events {
                Ok(events) => {
                    for event in events {
                        match event {
                            Event::Delta(text) => {
                                yield Ok(text);
                            }
                            Event::Done => debug!("upstream sent end-of-stream sentinel"),
                        }
                    }
                }
                Err(e) => {
                    yield Err(StreamError::Decode(e));
                    break;
                }
            }
        }
    }
}

/// Converts relayed fragments into response body chunks.
///
/// A [`StreamError`] is logged and ends the body; the caller sees the text
/// forwarded so far followed by a normal end of stream.
pub fn text_body<S>(fragments: S) -> impl Stream<Item = Bytes> + Send + 'static
where
    S: Stream<Item = Result<String, StreamError>> + Send + 'static,
{
    stream! {
        let mut fragments = pin!(fragments);
        while let Some(fragment) = fragments.next().await {
            match fragment {
                Ok(text) => {
                    yield Bytes::from(text);
                }
                Err(e) => {
                    warn!(error = %e, "upstream stream failed, closing response");
                    break;
                }
            }
        }
    }
}
