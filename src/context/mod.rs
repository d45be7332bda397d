//! Per-request context handed to middleware and route handlers.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::de::DeserializeOwned;

use crate::Request;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// A request plus the bookkeeping attached to it while it travels the pipeline.
pub struct Context {
    request: Request,
    request_id: u64,
}

impl Context {
    /// Wraps a request, assigning it a process-unique id for log correlation.
    pub fn new(request: Request) -> Self {
        Self {
            request,
            request_id: NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    /// Deserializes the request body as JSON.
    pub fn json<T>(&self) -> Result<T, serde_json::Error>
    where
        T: DeserializeOwned,
    {
        serde_json::from_slice(self.request.body())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Prompt {
        text: String,
    }

    fn request_with_body(body: &str) -> Request {
        let raw = format!(
            "POST /enhance HTTP/1.1\r\nContent-Length: {}\r\n\r\n",
            body.len()
        );
        let (request, _) = Request::parse(raw.as_bytes()).unwrap();
        request.with_body(body.as_bytes().to_vec())
    }

    #[test]
    fn decodes_json_body() {
        let ctx = Context::new(request_with_body(r#"{"text":"a cat"}"#));
        let prompt: Prompt = ctx.json().unwrap();
        assert_eq!(prompt.text, "a cat");
    }

    #[test]
    fn malformed_json_is_an_error() {
        let ctx = Context::new(request_with_body("{not json"));
        assert!(ctx.json::<Prompt>().is_err());
    }

    #[test]
    fn request_ids_are_distinct() {
        let a = Context::new(request_with_body(""));
        let b = Context::new(request_with_body(""));
        assert_ne!(a.request_id(), b.request_id());
    }
}
