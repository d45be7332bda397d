//! HTTP/1.1 request head parsing using the [`httparse`] crate.

use bytes::Bytes;
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

    #[error("request body exceeds maximum allowed size of {max_bytes} bytes")]
    BodyTooLarge { max_bytes: usize },
}

/// A parsed HTTP/1.1 request.
///
/// [`Request::parse`] reads the head only; the server attaches the body with
/// [`Request::with_body`] once `Content-Length` bytes have arrived.
///
/// # Examples
///
/// ```
/// use prompt_enhancer::http::Request;
///
/// let raw = b"POST /enhance HTTP/1.1\r\nHost: localhost\r\nContent-Length: 2\r\n\r\n{}";
/// let (request, offset) = Request::parse(raw).unwrap();
/// let request = request.with_body(raw[offset..].to_vec());
///
/// assert_eq!(request.method().as_str(), "POST");
/// assert_eq!(request.path(), "/enhance");
/// assert_eq!(request.body().as_ref(), b"{}");
/// ```
#[derive(Debug)]
pub struct Request {
    method: Method,
    path: String,
    query: Option<String>,
    /// HTTP minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    headers: Headers,
    body: Bytes,
}

impl Request {
    const MAX_HEADERS: usize = 64;

    /// Parses a request head from `buf`.
    ///
    /// Returns the request (with an empty body) and the offset at which the
    /// body begins, i.e. just past the `\r\n\r\n` terminator.
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`] if the head has not fully arrived.
    /// - [`RequestError::Parse`] if the bytes are not valid HTTP/1.x.
    /// - [`RequestError::MissingField`] if method, path, or version is absent.
    /// - [`RequestError::InvalidContentLength`] if `Content-Length` is not a number.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw = httparse::Request::new(&mut headers);

        let body_offset = match raw.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let method = match raw
            .method
            .ok_or(RequestError::MissingField { field: "method" })?
            .parse::<Method>()
        {
            Ok(method) => method,
            Err(never) => match never {},
        };

        let target = raw.path.ok_or(RequestError::MissingField { field: "path" })?;
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path.to_owned(), Some(query.to_owned())),
            None => (target.to_owned(), None),
        };

        let version = raw
            .version
            .ok_or(RequestError::MissingField { field: "version" })?;

        let mut header_map = Headers::with_capacity(raw.headers.len());
        for header in raw.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                header_map.insert(header.name, value.trim());
            }
        }

        if let Some(value) = header_map.get("content-length") {
            if value.parse::<usize>().is_err() {
                return Err(RequestError::InvalidContentLength {
                    value: value.to_owned(),
                });
            }
        }

        Ok((
            Self {
                method,
                path,
                query,
                version,
                headers: header_map,
                body: Bytes::new(),
            },
            body_offset,
        ))
    }

    /// Attaches the request body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request path without the query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the raw query string (without the leading `?`), if any.
    pub fn query_string(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns `true` if the connection should stay open after this request.
    ///
    /// HTTP/1.1 defaults to keep-alive; HTTP/1.0 only when asked for.
    pub fn is_keep_alive(&self) -> bool {
        match self.headers.get("connection") {
            Some(conn) if conn.eq_ignore_ascii_case("close") => false,
            Some(conn) if conn.eq_ignore_ascii_case("keep-alive") => true,
            _ => self.version == 1,
        }
    }

    /// Returns the declared body length. Validated during [`parse`](Self::parse).
    pub fn content_length(&self) -> usize {
        self.headers
            .get("content-length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }
}
