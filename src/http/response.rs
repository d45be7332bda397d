//! HTTP/1.1 response builder.
//!
//! A [`Response`] carries either a fixed [`Body::Full`] written with
//! `Content-Length`, or a [`Body::Stream`] written with chunked transfer
//! encoding, one chunk per stream item.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use futures::stream::BoxStream;
use serde::Serialize;

use super::{Headers, StatusCode};

/// Boxed error type carried by a failing [`BodyStream`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A body produced incrementally. An `Err` item aborts the response without
/// the chunked terminator, so the peer sees the body end abnormally.
pub type BodyStream = BoxStream<'static, Result<Bytes, BoxError>>;

/// The terminating zero-length chunk of a chunked body.
pub const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

/// A response body.
pub enum Body {
    Full(Bytes),
    Stream(BodyStream),
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Full(bytes) => f.debug_tuple("Full").field(&bytes.len()).finish(),
            Body::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// An HTTP/1.1 response, ready to be serialized and sent.
///
/// # Examples
///
/// ```
/// use prompt_enhancer::http::{Response, StatusCode};
///
/// let response = Response::new(StatusCode::Ok)
///     .header("Content-Type", "application/json")
///     .body(r#"{"ok":true}"#);
///
/// let (head, _body) = response.into_parts();
/// let text = std::str::from_utf8(&head).unwrap();
/// assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
/// assert!(text.contains("Content-Length: 11\r\n"));
/// ```
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Body,
    keep_alive: bool,
}

impl Response {
    /// Creates a response with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Body::Full(Bytes::new()),
            keep_alive: true,
        }
    }

    /// Creates a `application/json` response from any serializable value.
    ///
    /// Serialization failures degrade to a bare `500`.
    pub fn json<T: Serialize>(status: StatusCode, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self::new(status)
                .header("Content-Type", "application/json")
                .body_bytes(body),
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize response body");
                Self::new(StatusCode::InternalServerError)
            }
        }
    }

    /// Creates a streamed `text/plain` response.
    ///
    /// Streamed responses always close the connection afterwards: the server
    /// watches the socket for hang-up while streaming and may discard
    /// anything the peer sends meanwhile.
    pub fn stream(status: StatusCode, body: BodyStream) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Body::Stream(body),
            keep_alive: false,
        }
        .header("Content-Type", "text/plain; charset=utf-8")
    }

    /// Appends a response header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Appends a header in place, for middleware decorating a downstream response.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name, value);
    }

    /// Sets a fixed body from a string.
    #[must_use]
    pub fn body(self, body: impl Into<String>) -> Self {
        self.body_bytes(body.into().into_bytes())
    }

    /// Sets a fixed body from raw bytes.
    #[must_use]
    pub fn body_bytes(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Body::Full(body.into());
        self
    }

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

    pub fn is_streaming(&self) -> bool {
        matches!(self.body, Body::Stream(_))
    }

    pub fn keeps_alive(&self) -> bool {
        self.keep_alive
    }

    /// Consumes the response, returning only its body.
    pub fn into_body(self) -> Body {
        self.body
    }

    /// Serializes the status line and headers, and hands back the body.
    ///
    /// Adds `Content-Type: text/plain; charset=utf-8` to non-empty bodies
    /// that lack one, `Content-Length` for fixed bodies or
    /// `Transfer-Encoding: chunked` for streams, and the `Connection` header.
    pub fn into_parts(mut self) -> (BytesMut, Body) {
        let has_payload = match &self.body {
            Body::Full(bytes) => !bytes.is_empty(),
            Body::Stream(_) => true,
        };
        if has_payload && !self.headers.contains("content-type") {
            self.headers.insert("Content-Type", "text/plain; charset=utf-8");
        }

        match &self.body {
            Body::Full(bytes) => self.headers.set("Content-Length", bytes.len().to_string()),
            Body::Stream(_) => self.headers.set("Transfer-Encoding", "chunked"),
        }

        let connection = if self.keep_alive { "keep-alive" } else { "close" };
        self.headers.set("Connection", connection);

        let mut head = BytesMut::with_capacity(64 + self.headers.len() * 48);
        head.put(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status.as_u16(),
                self.status.canonical_reason()
            )
            .as_bytes(),
        );
        head.put(self.headers.to_string().as_bytes());
        head.put(&b"\r\n"[..]);

        (head, self.body)
    }
}

/// Frames `data` as a single HTTP/1.1 chunk.
///
/// Callers must not pass an empty slice: a zero-length chunk terminates the body.
pub fn encode_chunk(data: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(data.len() + 12);
    buf.put(format!("{:x}\r\n", data.len()).as_bytes());
    buf.put(data);
    buf.put(&b"\r\n"[..]);
    buf
}
