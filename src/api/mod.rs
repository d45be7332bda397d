//! HTTP endpoints of the enhancer service.
//!
//! - `POST /enhance` streams the enhanced prompt as `text/plain` chunks.
//! - `GET /presets` lists the selectable preset names.

use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::context::Context;
use crate::http::BoxError;
use crate::preset::CUSTOM_PRESET;
use crate::relay::{EnhanceError, EnhanceRequest, Relay};
use crate::{Response, Router, StatusCode};

/// The `GET /presets` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetList {
    pub presets: Vec<String>,
    /// Name of the sentinel that selects a caller-supplied instruction.
    pub custom: String,
}

/// Builds the service's routes around a shared relay.
pub fn router(relay: Arc<Relay>) -> Router {
    let mut router = Router::new();

    let enhance_relay = Arc::clone(&relay);
    router.post("/enhance", move |ctx: Context| {
        let relay = Arc::clone(&enhance_relay);
        async move { enhance(&relay, ctx).await }
    });

    router.get("/presets", move |_ctx: Context| {
        let relay = Arc::clone(&relay);
        async move { presets(&relay) }
    });

    router
}

async fn enhance(relay: &Relay, ctx: Context) -> Response {
    let request_id = ctx.request_id();
    let request = match ctx.json::<EnhanceRequest>() {
        Ok(request) => request,
        Err(e) => {
            warn!(request_id, error = %e, "unparsable enhance request");
            return EnhanceError::InvalidInput.into_response();
        }
    };

    match relay.enhance(request).await {
        Ok(fragments) => {
            let body = fragments
                .map(move |fragment| match fragment {
                    Ok(text) => Ok(Bytes::from(text)),
                    Err(e) => {
                        error!(request_id, error = %e, "model failed mid-stream");
                        Err(BoxError::from(e))
                    }
                })
                .boxed();
            Response::stream(StatusCode::Ok, body)
        }
        Err(EnhanceError::Upstream(e)) => {
            error!(request_id, error = %e, "model failed before the first fragment");
            EnhanceError::Upstream(e).into_response()
        }
        Err(e) => {
            warn!(request_id, error = %e, "enhance request rejected");
            e.into_response()
        }
    }
}

fn presets(relay: &Relay) -> Response {
    let catalog = relay.catalog();
    let list = PresetList {
        presets: catalog.names().map(str::to_owned).collect(),
        custom: CUSTOM_PRESET.to_owned(),
    };
    Response::json(StatusCode::Ok, &list)
}
