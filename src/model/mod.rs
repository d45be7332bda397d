//! The generative text model seam.
//!
//! The relay depends only on [`GenerativeModel`]: accept a system
//! instruction and a prompt, return ordered text increments, end the stream
//! when generation is done. [`GeminiClient`] talks to the hosted API;
//! [`ScriptedModel`] replays a fixed script for tests and offline runs.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

pub mod gemini;
pub mod scripted;
pub mod sse;

pub use gemini::GeminiClient;
pub use scripted::{ScriptedModel, Step};

/// Ordered text increments from one generation call.
pub type TextStream = BoxStream<'static, Result<String, ModelError>>;

/// Everything that can go wrong between us and the model.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("no API credential is configured for the generative model")]
    MissingCredential,

    #[error("request to the generative model failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("generative model answered {status}: {message}")]
    Status { status: u16, message: String },

    #[error("malformed response from the generative model: {0}")]
    Malformed(String),

    #[error("generation was blocked: {0}")]
    Blocked(String),

    #[error("no data from the generative model for {0:?}")]
    Idle(Duration),

    #[error("generative model failed: {0}")]
    Failed(String),
}

/// A hosted (or simulated) model that streams generated text.
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    /// Model identifier, for logs.
    fn name(&self) -> &str;

    /// Opens one streaming generation call.
    ///
    /// `instruction` configures the model's behaviour; `prompt` is the text
    /// to transform. Errors that happen before any increment is available
    /// may be returned here or as the first stream item.
    async fn stream_generate(
        &self,
        instruction: &str,
        prompt: &str,
    ) -> Result<TextStream, ModelError>;
}
