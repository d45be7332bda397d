use std::error::Error;
use std::sync::Arc;

use prompt_enhancer::Server;
use prompt_enhancer::api;
use prompt_enhancer::config::{Config, LogFormat};
use prompt_enhancer::middleware::{LoggerMiddleware, Pipeline};
use prompt_enhancer::model::GeminiClient;
use prompt_enhancer::preset::PresetCatalog;
use prompt_enhancer::relay::Relay;
use prompt_enhancer::security::CorsMiddleware;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = Config::from_env()?;
    init_tracing(config.log_format);

    let catalog = match &config.presets_path {
        Some(path) => PresetCatalog::from_path(path)?,
        None => PresetCatalog::builtin()?,
    };
    info!(presets = catalog.len(), "preset catalog loaded");

    if config.api_key.is_none() {
        warn!("GEMINI_API_KEY is not set; every enhancement will fail");
    }
    let model = GeminiClient::new(config.api_key.clone())
        .with_model(config.model.clone())
        .with_endpoint(config.api_endpoint.clone());
    let relay =
        Relay::new(Arc::new(model), Arc::new(catalog)).with_idle_timeout(config.idle_timeout);

    let mut pipeline = Pipeline::new(api::router(Arc::new(relay))).layer(LoggerMiddleware);
    if !config.allowed_origins.is_empty() {
        pipeline = pipeline.layer(CorsMiddleware::new(config.allowed_origins.clone()));
    }

    let server = Server::bind(&config.bind).await?;
    info!(address = %server.local_addr(), model = %config.model, "prompt enhancer ready");

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl-C, shutting down");
                on_signal.cancel();
            }
            Err(e) => error!(error = %e, "failed to listen for Ctrl-C"),
        }
    });

    server.serve(pipeline, shutdown).await?;
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Pretty => builder.compact().init(),
        LogFormat::Json => builder.json().with_ansi(false).init(),
    }
}
