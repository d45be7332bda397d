//! The enhancement relay.
//!
//! Validates a request, resolves its system instruction, opens one
//! streaming generation call and hands back the text increments in arrival
//! order. The relay keeps no state between calls.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::model::{GenerativeModel, ModelError, TextStream};
use crate::preset::{BASE_PRESET, PresetCatalog, PresetError, PresetSelection};
use crate::{Response, StatusCode};

/// Message returned for blank or unparsable requests.
pub const INVALID_INPUT_MESSAGE: &str = "Invalid input";

/// Message returned when the model fails before the first byte.
pub const UPSTREAM_FAILURE_MESSAGE: &str = "An error occurred while processing your request";

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Ordered, non-empty text fragments of one enhancement.
pub type FragmentStream = TextStream;

/// The `POST /enhance` body.
///
/// Older clients send `input`, `selectedPreset` and `customPreset`; those
/// names are accepted too.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnhanceRequest {
    #[serde(alias = "input")]
    pub text: String,

    #[serde(alias = "selectedPreset", default = "default_preset")]
    pub preset_selection: String,

    #[serde(
        alias = "customPreset",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub custom_instruction: Option<String>,
}

fn default_preset() -> String {
    BASE_PRESET.to_owned()
}

impl EnhanceRequest {
    /// A request for the base instruction alone.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            preset_selection: default_preset(),
            custom_instruction: None,
        }
    }

    #[must_use]
    pub fn with_preset(mut self, preset: impl Into<String>) -> Self {
        self.preset_selection = preset.into();
        self
    }

    #[must_use]
    pub fn with_custom_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.custom_instruction = Some(instruction.into());
        self
    }
}

/// JSON error body: `{"error": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, Error)]
pub enum EnhanceError {
    #[error("prompt text is blank")]
    InvalidInput,

    #[error(transparent)]
    Preset(#[from] PresetError),

    #[error(transparent)]
    Upstream(#[from] ModelError),
}

impl EnhanceError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidInput | Self::Preset(_) => StatusCode::BadRequest,
            Self::Upstream(_) => StatusCode::InternalServerError,
        }
    }

    /// The message a caller may see. Upstream causes stay server-side.
    pub fn public_message(&self) -> String {
        match self {
            Self::InvalidInput => INVALID_INPUT_MESSAGE.to_owned(),
            Self::Preset(e) => e.to_string(),
            Self::Upstream(_) => UPSTREAM_FAILURE_MESSAGE.to_owned(),
        }
    }

    pub fn into_response(self) -> Response {
        Response::json(
            self.status(),
            &ErrorBody {
                error: self.public_message(),
            },
        )
    }
}

/// Turns prompts into enhanced-prompt fragment streams.
pub struct Relay {
    model: Arc<dyn GenerativeModel>,
    catalog: Arc<PresetCatalog>,
    idle_timeout: Duration,
}

impl Relay {
    pub fn new(model: Arc<dyn GenerativeModel>, catalog: Arc<PresetCatalog>) -> Self {
        Self {
            model,
            catalog,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    /// Bounds the wait for each fragment.
    #[must_use]
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn catalog(&self) -> &PresetCatalog {
        &self.catalog
    }

    /// Starts one enhancement.
    ///
    /// Blank text is rejected before the model is contacted. The first
    /// fragment is awaited here, so a model that fails before producing
    /// anything is reported as an error rather than as an empty stream.
    /// Opening the call and every wait for a fragment are each bounded by
    /// the idle timeout.
    pub async fn enhance(&self, request: EnhanceRequest) -> Result<FragmentStream, EnhanceError> {
        if request.text.trim().is_empty() {
            return Err(EnhanceError::InvalidInput);
        }

        let selection = PresetSelection::parse(
            &request.preset_selection,
            request.custom_instruction.as_deref(),
        )?;
        let instruction = self.catalog.resolve(&selection)?;

        debug!(
            model = self.model.name(),
            preset = %request.preset_selection,
            "opening generation stream"
        );
        let opening = self.model.stream_generate(&instruction, &request.text);
        let upstream = tokio::time::timeout(self.idle_timeout, opening)
            .await
            .map_err(|_| ModelError::Idle(self.idle_timeout))??;
        let mut fragments = idle_bounded(upstream, self.idle_timeout);

        match fragments.next().await {
            Some(Ok(first)) => Ok(stream::once(async move { Ok(first) })
                .chain(fragments)
                .boxed()),
            Some(Err(e)) => Err(e.into()),
            None => Ok(stream::empty().boxed()),
        }
    }
}

// Drops empty increments, fails with `ModelError::Idle` when the model goes
// quiet for longer than `idle`, and ends after the first error.
fn idle_bounded(upstream: TextStream, idle: Duration) -> FragmentStream {
    stream::unfold(Some(upstream), move |state| async move {
        let mut upstream = state?;
        loop {
            match tokio::time::timeout(idle, upstream.next()).await {
                Ok(Some(Ok(text))) if text.is_empty() => continue,
                Ok(Some(Ok(text))) => return Some((Ok(text), Some(upstream))),
                Ok(Some(Err(e))) => return Some((Err(e), None)),
                Ok(None) => return None,
                Err(_) => return Some((Err(ModelError::Idle(idle)), None)),
            }
        }
    })
    .boxed()
}
