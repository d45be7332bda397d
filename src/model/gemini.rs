//! Google Gemini over `streamGenerateContent` with server-sent events.

use std::collections::VecDeque;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::sse::SseDecoder;
use super::{GenerativeModel, ModelError, TextStream};

pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

// Finish reasons that mean the answer was withheld rather than completed.
const BLOCKING_FINISH_REASONS: &[&str] = &[
    "SAFETY",
    "RECITATION",
    "BLOCKLIST",
    "PROHIBITED_CONTENT",
    "SPII",
];

/// Streaming client for the Gemini generative language API.
///
/// A missing API key does not stop construction; every call then fails
/// with [`ModelError::MissingCredential`].
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: Option<String>,
    model: String,
    endpoint: String,
}

impl GeminiClient {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            model: DEFAULT_MODEL.to_owned(),
            endpoint: DEFAULT_ENDPOINT.to_owned(),
        }
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Overrides the API base URL, e.g. for a proxy.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn stream_url(&self) -> String {
        format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.endpoint.trim_end_matches('/'),
            self.model
        )
    }
}

#[async_trait]
impl GenerativeModel for GeminiClient {
    fn name(&self) -> &str {
        &self.model
    }

    async fn stream_generate(
        &self,
        instruction: &str,
        prompt: &str,
    ) -> Result<TextStream, ModelError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(ModelError::MissingCredential)?;

        let body = GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: [Part { text: instruction }],
            },
            contents: [Content {
                role: Some("user"),
                parts: [Part { text: prompt }],
            }],
        };

        let response = self
            .http
            .post(self.stream_url())
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let raw = response.text().await.unwrap_or_default();
            return Err(ModelError::Status {
                status: status.as_u16(),
                message: error_message(&raw),
            });
        }

        debug!(model = %self.model, "model stream opened");
        Ok(text_stream(response.bytes_stream()))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    system_instruction: Content<'a>,
    contents: [Content<'a>; 1],
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ChunkPart>,
}

#[derive(Debug, Deserialize)]
struct ChunkPart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: Option<u16>,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

// Pulls the human-readable message out of an API error body.
fn error_message(raw: &str) -> String {
    serde_json::from_str::<ErrorEnvelope>(raw)
        .map(|envelope| envelope.error.message)
        .unwrap_or_else(|_| raw.trim().to_owned())
}

/// Extracts the text increment carried by one SSE `data:` payload.
fn chunk_text(payload: &str) -> Result<String, ModelError> {
    let chunk: GenerateChunk =
        serde_json::from_str(payload).map_err(|e| ModelError::Malformed(e.to_string()))?;

    if let Some(error) = chunk.error {
        return Err(ModelError::Status {
            status: error.code.unwrap_or(500),
            message: error.message,
        });
    }
    if let Some(reason) = chunk.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(ModelError::Blocked(reason));
    }

    let mut text = String::new();
    for candidate in chunk.candidates.into_iter().take(1) {
        let parts = candidate.content.map(|c| c.parts).unwrap_or_default();
        text.extend(parts.into_iter().filter_map(|p| p.text));

        if let Some(reason) = candidate.finish_reason {
            if BLOCKING_FINISH_REASONS.contains(&reason.as_str()) {
                return Err(ModelError::Blocked(reason));
            }
        }
    }
    Ok(text)
}

struct SseState<S> {
    bytes: Pin<Box<S>>,
    decoder: SseDecoder,
    pending: VecDeque<String>,
    done: bool,
}

/// Adapts a raw SSE byte stream into text increments.
///
/// The stream ends after the first error; nothing is yielded past it.
fn text_stream<S, E>(bytes: S) -> TextStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<ModelError> + Send + 'static,
{
    let state = SseState {
        bytes: Box::pin(bytes),
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(payload) = state.pending.pop_front() {
                match chunk_text(&payload) {
                    Ok(text) => return Some((Ok(text), state)),
                    Err(e) => {
                        state.pending.clear();
                        state.done = true;
                        return Some((Err(e), state));
                    }
                }
            }
            if state.done {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(bytes)) => {
                    let events = state.decoder.push(&bytes);
                    state.pending.extend(events);
                }
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(e.into()), state));
                }
                None => {
                    state.done = true;
                    let events = state.decoder.finish();
                    state.pending.extend(events);
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sse(payloads: &[&str]) -> Vec<Result<Bytes, ModelError>> {
        payloads
            .iter()
            .map(|p| Ok(Bytes::from(format!("data: {p}\r\n\r\n"))))
            .collect()
    }

    async fn collect(items: Vec<Result<Bytes, ModelError>>) -> Vec<Result<String, String>> {
        text_stream(stream::iter(items))
            .map(|r| r.map_err(|e| e.to_string()))
            .collect()
            .await
    }

    const HELLO: &str = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"A "}]}}]}"#;
    const WORLD: &str = r#"{"candidates":[{"content":{"parts":[{"text":"cat"},{"text":" sitting."}]},"finishReason":"STOP"}]}"#;

    #[test]
    fn request_body_shape() {
        let body = GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: [Part { text: "Be vivid." }],
            },
            contents: [Content {
                role: Some("user"),
                parts: [Part { text: "a cat" }],
            }],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "Be vivid.");
        assert!(json["systemInstruction"].get("role").is_none());
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["contents"][0]["parts"][0]["text"], "a cat");
    }

    #[test]
    fn stream_url_joins_endpoint_and_model() {
        let client = GeminiClient::new(None).with_endpoint("http://localhost:9/v1beta/");
        assert_eq!(
            client.stream_url(),
            "http://localhost:9/v1beta/models/gemini-1.5-flash:streamGenerateContent?alt=sse"
        );
    }

    #[test]
    fn chunk_text_joins_parts() {
        assert_eq!(chunk_text(WORLD).unwrap(), "cat sitting.");
    }

    #[test]
    fn chunk_text_rejects_blocked_prompts() {
        let payload = r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#;
        assert!(matches!(chunk_text(payload), Err(ModelError::Blocked(r)) if r == "SAFETY"));
    }

    #[test]
    fn chunk_text_surfaces_api_errors() {
        let payload = r#"{"error":{"code":429,"message":"Resource has been exhausted"}}"#;
        assert!(matches!(
            chunk_text(payload),
            Err(ModelError::Status { status: 429, .. })
        ));
    }

    #[test]
    fn error_message_prefers_envelope() {
        assert_eq!(
            error_message(r#"{"error":{"code":400,"message":"API key not valid"}}"#),
            "API key not valid"
        );
        assert_eq!(error_message(" upstream down \n"), "upstream down");
    }

    #[tokio::test]
    async fn text_stream_yields_in_order() {
        let out = collect(sse(&[HELLO, WORLD])).await;
        assert_eq!(
            out,
            vec![Ok::<_, String>("A ".to_owned()), Ok("cat sitting.".to_owned())]
        );
    }

    #[tokio::test]
    async fn text_stream_handles_events_split_across_reads() {
        let raw = format!("data: {HELLO}\n\ndata: {WORLD}\n\n");
        let (a, b) = raw.as_bytes().split_at(17);
        let items = vec![Ok(Bytes::copy_from_slice(a)), Ok(Bytes::copy_from_slice(b))];
        let out = collect(items).await;
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(Result::is_ok));
    }

    #[tokio::test]
    async fn text_stream_stops_at_first_error() {
        let mut items = sse(&[HELLO, "not json", WORLD]);
        items.push(Err(ModelError::Failed("late".into())));
        let out = collect(items).await;
        assert_eq!(out.len(), 2);
        assert!(out[0].is_ok());
        assert!(out[1].as_ref().unwrap_err().contains("malformed"));
    }

    #[tokio::test]
    async fn transport_error_ends_stream() {
        let mut items = sse(&[HELLO]);
        items.push(Err(ModelError::Failed("connection reset".into())));
        let out = collect(items).await;
        assert_eq!(out.len(), 2);
        assert!(out[1].as_ref().unwrap_err().contains("connection reset"));
    }

    #[tokio::test]
    async fn missing_key_fails_without_network() {
        let client = GeminiClient::new(None);
        let result = client.stream_generate("Be vivid.", "a cat").await;
        assert!(matches!(result, Err(ModelError::MissingCredential)));
    }
}
