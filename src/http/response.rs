//! HTTP/1.1 response builder.
//!
//! Provides a fluent builder API for constructing HTTP responses and
//! serializing them for transmission over TCP. A response body is either
//! fully buffered (sent with `Content-Length`) or a stream of byte chunks
//! (sent with `Transfer-Encoding: chunked`).

use std::fmt;
use std::pin::Pin;

use bytes::{BufMut, Bytes, BytesMut};
use futures_util::Stream;
use serde::Serialize;

use super::{Headers, StatusCode};

/// A boxed stream of body chunks, written to the socket as they arrive.
pub type BodyStream = Pin<Box<dyn Stream<Item = Bytes> + Send + 'static>>;

/// The payload of a [`Response`].
pub enum Body {
    Full(Vec<u8>),
    Stream(BodyStream),
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(bytes) => f.debug_tuple("Full").field(&bytes.len()).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// A response serialized for the wire.
///
/// `Streaming` carries the status line and headers; the body chunks are
/// framed by the server with [`encode_chunk`] as they are produced.
pub enum Encoded {
    Complete(BytesMut),
    Streaming { head: BytesMut, body: BodyStream },
}

/// An HTTP/1.1 response, ready to be serialized and sent.
///
/// # Examples
///
/// ```
/// use glm_relay::http::{Response, StatusCode};
/// use glm_relay::http::response::Encoded;
///
/// let response = Response::new(StatusCode::Ok)
///     .header("Content-Type", "application/json")
///     .body(r#"{"status":"ok"}"#);
///
/// let Encoded::Complete(bytes) = response.encode() else { unreachable!() };
/// let text = std::str::from_utf8(&bytes).unwrap();
/// assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
/// assert!(text.contains("Content-Length: 15\r\n"));
/// ```
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Body,
    keep_alive: bool,
}

impl Response {
    /// Creates a new response with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Body::Full(Vec::new()),
            keep_alive: true,
        }
    }

    /// Builds a response with a JSON body and `Content-Type: application/json`.
    ///
    /// Serialization failures produce a `500` with a plain-text body instead.
    pub fn json<T: Serialize>(status: StatusCode, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(bytes) => Self::new(status)
                .header("Content-Type", "application/json")
                .body_bytes(bytes),
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize JSON response");
                Self::new(StatusCode::InternalServerError).body("Server error")
            }
        }
    }

    /// Appends a response header. Multiple calls with the same name are additive.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the response body from a string.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Body::Full(body.into().into_bytes());
        self
    }

    /// Sets the response body from raw bytes.
    #[must_use]
    pub fn body_bytes(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Body::Full(body.into());
        self
    }

    /// Sets a streamed body. Each item is sent as one chunk as soon as it is yielded.
    #[must_use]
    pub fn stream<S>(mut self, body: S) -> Self
    where
        S: Stream<Item = Bytes> + Send + 'static,
    {
        self.body = Body::Stream(Box::pin(body));
        self
    }

    /// Controls whether `Connection: keep-alive` or `Connection: close` is written.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the buffered body, or `None` for a streamed one.
    pub fn body_ref(&self) -> Option<&[u8]> {
        match &self.body {
            Body::Full(bytes) => Some(bytes),
            Body::Stream(_) => None,
        }
    }

    /// Serializes the response using HTTP/1.1 wire format.
    ///
    /// Automatically adds:
    /// - `Content-Type: text/plain; charset=utf-8` when the body is non-empty
    ///   and no `Content-Type` was set;
    /// - `Content-Length: <n>` for buffered bodies, `Transfer-Encoding: chunked`
    ///   for streamed ones;
    /// - `Connection: keep-alive` or `Connection: close`.
    pub fn encode(mut self) -> Encoded {
        let has_body = match &self.body {
            Body::Full(bytes) => !bytes.is_empty(),
            Body::Stream(_) => true,
        };
        if has_body && !self.headers.contains("content-type") {
            self.headers.insert("Content-Type", "text/plain; charset=utf-8");
        }

        let connection = if self.keep_alive {
            "keep-alive"
        } else {
            "close"
        };
        self.headers.set("Connection", connection);

        match self.body {
            Body::Full(body) => {
                self.headers.set("Content-Length", body.len().to_string());
                let mut buf = head(self.status, &self.headers, body.len());
                buf.put(body.as_slice());
                Encoded::Complete(buf)
            }
            Body::Stream(body) => {
                self.headers.remove("content-length");
                self.headers.set("Transfer-Encoding", "chunked");
                Encoded::Streaming {
                    head: head(self.status, &self.headers, 0),
                    body,
                }
            }
        }
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::Ok)
    }
}

// Status line, headers and the blank separator line.
fn head(status: StatusCode, headers: &Headers, body_len: usize) -> BytesMut {
    let mut buf = BytesMut::with_capacity(128 + headers.len() * 64 + body_len);
    buf.put(
        format!(
            "HTTP/1.1 {} {}\r\n",
            status.as_u16(),
            status.canonical_reason()
        )
        .as_bytes(),
    );
    buf.put(headers.to_string().as_bytes());
    buf.put(&b"\r\n"[..]);
    buf
}

/// Frames one body chunk for `Transfer-Encoding: chunked`.
///
/// Returns `None` for an empty chunk, which on the wire would mean end-of-body.
pub fn encode_chunk(chunk: &[u8]) -> Option<BytesMut> {
    if chunk.is_empty() {
        return None;
    }
    let mut buf = BytesMut::with_capacity(chunk.len() + 12);
    buf.put(format!("{:x}\r\n", chunk.len()).as_bytes());
    buf.put(chunk);
    buf.put(&b"\r\n"[..]);
    Some(buf)
}

/// The terminating zero-length chunk.
pub const LAST_CHUNK: &[u8] = b"0\r\n\r\n";
