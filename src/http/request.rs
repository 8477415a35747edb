//! HTTP/1.1 request parsing using the [`httparse`] crate.

use bytes::{Bytes, BytesMut};
use thiserror::Error;

use super::{Headers, Method};

/// Errors that can occur while parsing an HTTP/1.1 request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete, more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid Content-Length header: {value:?}")]
    InvalidContentLength { value: String },

    #[error("both Content-Length and Transfer-Encoding are present")]
    ConflictingFraming,

    #[error("unsupported Transfer-Encoding: {value:?}")]
    UnsupportedTransferEncoding { value: String },

    #[error("malformed chunked body")]
    InvalidChunk,
}

/// How the body of a request is delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    Length(usize),
    Chunked,
}

/// A parsed HTTP/1.1 request.
///
/// Created by [`Request::parse`] from a raw byte buffer. The body is framed by
/// `Content-Length` or by `Transfer-Encoding: chunked`; anything after it
/// belongs to the next request on the connection.
///
/// # Examples
///
/// ```
/// use glm_relay::http::request::Request;
///
/// let raw = b"POST /api/chat?debug=1 HTTP/1.1\r\nHost: localhost\r\nContent-Length: 2\r\n\r\n{}";
/// let (request, _offset) = Request::parse(raw).unwrap();
///
/// assert_eq!(request.method().as_str(), "POST");
/// assert_eq!(request.path(), "/api/chat");
/// assert_eq!(request.body().as_ref(), b"{}");
/// ```
#[derive(Debug)]
pub struct Request {
    method: Method,
    path: String,
    /// HTTP minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    headers: Headers,
    framing: Framing,
    body: Bytes,
    complete: bool,
    // Bytes the body occupies after the header block, chunk framing included.
    wire_len: usize,
}

impl Request {
    /// Maximum number of headers we support per request.
    const MAX_HEADERS: usize = 64;

    /// Parses a raw HTTP/1.1 request from a byte slice.
    ///
    /// Returns the parsed `Request` and the byte offset at which the body begins
    /// in `buf`. If `buf` does not yet hold the whole body the request is not
    /// [`is_complete`](Self::is_complete) and callers read more before
    /// dispatching. A chunked body is decoded only once all of it is buffered.
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`]: the header block is not complete yet.
    /// - [`RequestError::Parse`]: the data is malformed.
    /// - [`RequestError::MissingField`]: method, path, or version is absent.
    /// - [`RequestError::InvalidContentLength`]: `Content-Length` is not a number.
    /// - [`RequestError::ConflictingFraming`]: both `Content-Length` and
    ///   `Transfer-Encoding` are present.
    /// - [`RequestError::UnsupportedTransferEncoding`]: a transfer coding other
    ///   than a single `chunked`.
    /// - [`RequestError::InvalidChunk`]: the chunked body is malformed.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw_req = httparse::Request::new(&mut headers);

        let body_offset = match raw_req.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let method: Method = match raw_req.method {
            Some(m) => match m.parse() {
                Ok(method) => method,
                Err(never) => match never {},
            },
            None => return Err(RequestError::MissingField { field: "method" }),
        };

        let raw_path = raw_req
            .path
            .ok_or(RequestError::MissingField { field: "path" })?;
        let path = match raw_path.split_once('?') {
            Some((path, _query)) => path.to_owned(),
            None => raw_path.to_owned(),
        };

        let version = raw_req
            .version
            .ok_or(RequestError::MissingField { field: "version" })?;

        let mut header_map = Headers::with_capacity(raw_req.headers.len());
        for header in raw_req.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                header_map.insert(header.name, value);
            }
        }

        let framing = framing(&header_map)?;
        let available = &buf[body_offset..];
        let (body, complete, wire_len) = match framing {
            Framing::Length(len) => {
                let body = Bytes::copy_from_slice(&available[..available.len().min(len)]);
                (body, available.len() >= len, len)
            }
            Framing::Chunked => match decode_chunked(available)? {
                Some((body, wire_len)) => (body, true, wire_len),
                None => (Bytes::new(), false, 0),
            },
        };

        Ok((
            Self {
                method,
                path,
                version,
                headers: header_map,
                framing,
                body,
                complete,
                wire_len,
            },
            body_offset,
        ))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request path without the query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the HTTP minor version number (0 = HTTP/1.0, 1 = HTTP/1.1).
    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// The declared `Content-Length`, or 0 when the header is absent or the
    /// body is chunked.
    pub fn content_length(&self) -> usize {
        match self.framing {
            Framing::Length(len) => len,
            Framing::Chunked => 0,
        }
    }

    pub fn is_chunked(&self) -> bool {
        self.framing == Framing::Chunked
    }

    /// Returns `true` once the whole body has been buffered.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Number of bytes after the header block that belong to this request.
    /// Only meaningful once the request [`is_complete`](Self::is_complete).
    pub fn wire_len(&self) -> usize {
        self.wire_len
    }

    /// Returns `true` if the connection should be kept alive after this request.
    ///
    /// HTTP/1.1 defaults to keep-alive. HTTP/1.0 defaults to close unless
    /// `Connection: keep-alive` is explicitly set.
    pub fn is_keep_alive(&self) -> bool {
        match self.headers.get("connection") {
            Some(conn) => conn.eq_ignore_ascii_case("keep-alive"),
            None => self.version == 1,
        }
    }
}

fn framing(headers: &Headers) -> Result<Framing, RequestError> {
    let mut codings = headers
        .iter()
        .filter(|(name, _)| name.eq_ignore_ascii_case("transfer-encoding"))
        .map(|(_, value)| value.trim());

    match (codings.next(), codings.next()) {
        (None, _) => match headers.get("content-length") {
            Some(value) => value
                .trim()
                .parse()
                .map(Framing::Length)
                .map_err(|_| RequestError::InvalidContentLength {
                    value: value.to_owned(),
                }),
            None => Ok(Framing::Length(0)),
        },
        _ if headers.contains("content-length") => Err(RequestError::ConflictingFraming),
        (Some(coding), None) if coding.eq_ignore_ascii_case("chunked") => Ok(Framing::Chunked),
        (Some(coding), _) => Err(RequestError::UnsupportedTransferEncoding {
            value: coding.to_owned(),
        }),
    }
}

/// Decodes a chunked body from the start of `buf`.
///
/// Returns `Ok(None)` until the terminating chunk and trailer section are
/// buffered, then the decoded body and the number of bytes it occupied.
fn decode_chunked(buf: &[u8]) -> Result<Option<(Bytes, usize)>, RequestError> {
    let mut body = BytesMut::new();
    let mut pos = 0;

    loop {
        let (header_len, size) = match httparse::parse_chunk_size(&buf[pos..])
            .map_err(|_| RequestError::InvalidChunk)?
        {
            httparse::Status::Complete(parsed) => parsed,
            httparse::Status::Partial => return Ok(None),
        };
        pos += header_len;
        if size == 0 {
            break;
        }

        let size = usize::try_from(size).map_err(|_| RequestError::InvalidChunk)?;
        let rest = &buf[pos..];
        if rest.len() < size.saturating_add(2) {
            return Ok(None);
        }
        if &rest[size..size + 2] != b"\r\n" {
            return Err(RequestError::InvalidChunk);
        }
        body.extend_from_slice(&rest[..size]);
        pos += size + 2;
    }

    let mut trailers = [httparse::EMPTY_HEADER; Request::MAX_HEADERS];
    match httparse::parse_headers(&buf[pos..], &mut trailers)? {
        httparse::Status::Complete((trailer_len, _)) => Ok(Some((body.freeze(), pos + trailer_len))),
        httparse::Status::Partial => Ok(None),
    }
}
