//! # prompt-enhancer
//!
//! A streaming relay that rewrites image-generation prompts with a hosted
//! generative text model, plus the client-side state needed to show the
//! rewrite as it arrives.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use prompt_enhancer::middleware::{LoggerMiddleware, Pipeline};
//! use prompt_enhancer::model::GeminiClient;
//! use prompt_enhancer::preset::PresetCatalog;
//! use prompt_enhancer::relay::Relay;
//! use prompt_enhancer::{Server, api};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let model = Arc::new(GeminiClient::new(std::env::var("GEMINI_API_KEY").ok()));
//!     let relay = Relay::new(model, Arc::new(PresetCatalog::builtin()?));
//!     let pipeline = Pipeline::new(api::router(Arc::new(relay))).layer(LoggerMiddleware);
//!
//!     let server = Server::bind("127.0.0.1:3000").await?;
//!     server.serve(pipeline, CancellationToken::new()).await?;
//!     Ok(())
//! }
//! ```

// ── HTTP server ───────────────────────────────────────────────────────────────
pub mod context;
pub mod http;
pub mod middleware;
pub mod router;
pub mod security;
pub mod server;

// ── Enhancement service ───────────────────────────────────────────────────────
pub mod api;
pub mod config;
pub mod model;
pub mod preset;
pub mod relay;

// ── Client side ───────────────────────────────────────────────────────────────
pub mod client;
pub mod reveal;
pub mod session;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use router::Router;
pub use server::{Server, ServerError};
