//! Request routing: map an exact path and method to a handler.
//!
//! The service exposes a handful of fixed endpoints, so patterns are literal
//! paths. A trailing slash is ignored on both the route and the request.
//! A path that exists under another method answers `405` with an `Allow`
//! header; an unknown path answers `404`.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::json;

use crate::context::Context;
use crate::{Method, Response, StatusCode};

/// Type-erased async handler.
pub type Handler = Arc<dyn Fn(Context) -> BoxFuture<'static, Response> + Send + Sync + 'static>;

/// Conversion trait for async handler functions.
///
/// Any `Fn(Context) -> impl Future<Output = Response> + Send` that is also
/// `Send + Sync + 'static` implements this via the blanket impl below.
pub trait IntoHandler: Send + Sync + 'static {
    fn call(&self, ctx: Context) -> BoxFuture<'static, Response>;
}

impl<T, F> IntoHandler for T
where
    T: Fn(Context) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    fn call(&self, ctx: Context) -> BoxFuture<'static, Response> {
        Box::pin((self)(ctx))
    }
}

struct Route {
    method: Method,
    path: String,
    handler: Handler,
}

/// Dispatches requests to the first route whose method and path match.
///
/// # Examples
///
/// ```rust,no_run
/// use prompt_enhancer::{Router, Response, StatusCode};
///
/// let mut router = Router::new();
/// router.get("/presets", |_ctx| async { Response::new(StatusCode::Ok) });
/// router.post("/enhance", |_ctx| async { Response::new(StatusCode::Ok) });
/// assert_eq!(router.len(), 2);
/// ```
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for `GET` requests on `path`.
    pub fn get(&mut self, path: &str, handler: impl IntoHandler) {
        self.add_route(Method::Get, path, handler);
    }

    /// Registers a handler for `POST` requests on `path`.
    pub fn post(&mut self, path: &str, handler: impl IntoHandler) {
        self.add_route(Method::Post, path, handler);
    }

    fn add_route(&mut self, method: Method, path: &str, handler: impl IntoHandler) {
        let handler: Handler = Arc::new(move |ctx| handler.call(ctx));
        self.routes.push(Route {
            method,
            path: normalize(path).to_owned(),
            handler,
        });
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Dispatches `ctx` to the matching route.
    pub async fn route(&self, ctx: Context) -> Response {
        let path = normalize(ctx.request().path()).to_owned();
        let method = ctx.request().method().clone();

        let mut allowed = Vec::new();
        for route in self.routes.iter().filter(|r| r.path == path) {
            if route.method == method {
                return (route.handler)(ctx).await;
            }
            allowed.push(route.method.as_str());
        }

        if allowed.is_empty() {
            Response::json(StatusCode::NotFound, &json!({ "error": "Not found" }))
        } else {
            Response::json(
                StatusCode::MethodNotAllowed,
                &json!({ "error": "Method not allowed" }),
            )
            .header("Allow", allowed.join(", "))
        }
    }
}

fn normalize(path: &str) -> &str {
    if path.len() > 1 {
        path.trim_end_matches('/')
    } else {
        path
    }
}
