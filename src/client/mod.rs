//! Client for the enhancer service.
//!
//! Drives a [`PromptSession`] through one enhancement: sends the request,
//! reveals the streamed answer into a `watch` channel the UI renders from,
//! and settles the session on success, failure or cancellation.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::PresetList;
use crate::relay::{EnhanceRequest, ErrorBody};
use crate::reveal::{DEFAULT_FRAME_INTERVAL, RevealDriver, RevealError};
use crate::session::{PromptSession, SessionError};

mod decode;

pub use decode::{DecodeError, Utf8Decoder};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request to the enhancer failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("enhancer rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("response stream ended abnormally: {0}")]
    Interrupted(#[source] reqwest::Error),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("enhancement was cancelled")]
    Aborted,

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Render(#[from] RevealError),
}

/// Talks to a running enhancer service.
///
/// # Examples
///
/// ```rust,no_run
/// use prompt_enhancer::client::EnhanceClient;
/// use prompt_enhancer::session::PromptSession;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let client = EnhanceClient::new("http://127.0.0.1:3000");
/// let mut display = client.subscribe();
///
/// let mut session = PromptSession::new();
/// session.set_text("a cat");
/// client.enhance(&mut session, &CancellationToken::new()).await?;
/// println!("{}", session.text());
/// # let _ = display.changed().await;
/// # Ok(())
/// # }
/// ```
pub struct EnhanceClient {
    http: reqwest::Client,
    base_url: String,
    frame: Duration,
    display: Arc<watch::Sender<String>>,
}

impl EnhanceClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let (display, _) = watch::channel(String::new());
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            frame: DEFAULT_FRAME_INTERVAL,
            display: Arc::new(display),
        }
    }

    /// Sets the delay between revealed characters.
    #[must_use]
    pub fn with_frame_interval(mut self, frame: Duration) -> Self {
        self.frame = frame;
        self
    }

    /// Receives the text as it should currently be displayed.
    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.display.subscribe()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Fetches the selectable presets.
    pub async fn presets(&self) -> Result<PresetList, ClientError> {
        let response = self
            .http
            .get(self.url("/presets"))
            .send()
            .await
            .map_err(ClientError::Request)?;
        let response = reject_unsuccessful(response).await?;
        response.json().await.map_err(ClientError::Request)
    }

    /// Runs one enhancement of the session's text.
    ///
    /// On success the session holds the full answer. On any failure it
    /// shows a fixed error message and the partial answer is discarded.
    /// Cancelling `cancel` drops the response, which closes the connection,
    /// and puts the original text back.
    pub async fn enhance(
        &self,
        session: &mut PromptSession,
        cancel: &CancellationToken,
    ) -> Result<String, ClientError> {
        let request = session.begin_enhance()?;

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(ClientError::Aborted),
            outcome = self.stream_answer(&request, &mut *session) => outcome,
        };

        match &outcome {
            Ok(full) => session.complete(full.clone()),
            Err(ClientError::Aborted) => {
                debug!("enhancement cancelled");
                session.cancel_enhance();
            }
            Err(ClientError::Render(e)) => {
                warn!(error = %e, "failed to render enhancement");
                session.render_failed();
            }
            Err(e) => {
                warn!(error = %e, "enhancement failed");
                session.fail();
            }
        }
        self.display.send_replace(session.text().to_owned());
        outcome
    }

    async fn stream_answer(
        &self,
        request: &EnhanceRequest,
        session: &mut PromptSession,
    ) -> Result<String, ClientError> {
        let response = self
            .http
            .post(self.url("/enhance"))
            .json(request)
            .send()
            .await
            .map_err(ClientError::Request)?;
        let response = reject_unsuccessful(response).await?;

        self.display.send_replace(String::new());
        let mut driver = RevealDriver::new(self.frame, Arc::clone(&self.display));
        let mut decoder = Utf8Decoder::new();
        let mut body = response.bytes_stream();

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(ClientError::Interrupted)?;
            let text = decoder.push(&chunk)?;
            if !text.is_empty() {
                driver.push(&text);
                session.show_partial(driver.cumulative());
            }
        }
        decoder.finish()?;

        Ok(driver.finish().await?)
    }
}

// Turns a non-2xx answer into `Rejected`, using the server's `{error}` message.
async fn reject_unsuccessful(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = match response.json::<ErrorBody>().await {
        Ok(body) => body.error,
        Err(_) => status.canonical_reason().unwrap_or("request failed").to_owned(),
    };
    Err(ClientError::Rejected {
        status: status.as_u16(),
        message,
    })
}
