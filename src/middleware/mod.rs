//! Middleware pipeline: composable logic wrapped around the router.
//!
//! - [`Middleware`]: trait implemented by every layer.
//! - [`Next`]: cursor into the remaining chain; the router sits at its end.
//! - [`Pipeline`]: the ordered stack plus the router, shared by every connection.
//! - [`LoggerMiddleware`]: one structured log line per request.

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::time::Instant;
use tracing::info;

use crate::{Request, Response, context::Context, router::Router};

/// A type-erased, reference-counted middleware function.
pub type MiddlewareHandler =
    Arc<dyn Fn(Context, Next) -> BoxFuture<'static, Response> + Send + Sync + 'static>;

/// Converts a [`Middleware`] implementation into a [`MiddlewareHandler`].
pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    Arc::new(move |ctx: Context, next: Next| middleware.handle(ctx, next))
}

/// A cursor into the remaining middleware chain for a single request.
///
/// Consumed by [`Next::run`], so a layer can forward at most once.
pub struct Next {
    middlewares: Arc<Vec<MiddlewareHandler>>,
    index: usize,
    router: Arc<Router>,
}

impl Next {
    /// Invokes the next layer, or the router once every layer has run.
    pub async fn run(mut self, ctx: Context) -> Response {
        match self.middlewares.get(self.index).cloned() {
            Some(handler) => {
                self.index += 1;
                handler(ctx, self).await
            }
            None => self.router.route(ctx).await,
        }
    }
}

/// The core trait for middleware.
///
/// A layer may pass through (`next.run(ctx).await`), short-circuit by
/// returning its own [`Response`], or decorate the downstream response.
pub trait Middleware: Send + Sync {
    fn handle(&self, ctx: Context, next: Next) -> BoxFuture<'static, Response>;
}

/// An ordered middleware stack in front of a [`Router`].
///
/// Layers run in the order they were added: the first added sees the
/// request first and the response last.
///
/// # Examples
///
/// ```rust,no_run
/// use prompt_enhancer::{Router, middleware::{LoggerMiddleware, Pipeline}};
///
/// let pipeline = Pipeline::new(Router::new()).layer(LoggerMiddleware);
/// ```
pub struct Pipeline {
    middlewares: Arc<Vec<MiddlewareHandler>>,
    router: Arc<Router>,
}

impl Pipeline {
    pub fn new(router: Router) -> Self {
        Self {
            middlewares: Arc::new(Vec::new()),
            router: Arc::new(router),
        }
    }

    /// Appends a layer to the stack.
    #[must_use]
    pub fn layer<M>(mut self, middleware: M) -> Self
    where
        M: Middleware + 'static,
    {
        Arc::make_mut(&mut self.middlewares).push(from_middleware(Arc::new(middleware)));
        self
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Runs `request` through every layer and the router.
    pub async fn handle(&self, request: Request) -> Response {
        let next = Next {
            middlewares: Arc::clone(&self.middlewares),
            index: 0,
            router: Arc::clone(&self.router),
        };
        next.run(Context::new(request)).await
    }
}

/// Logs the method, path and query along with status and latency once the
/// handler has answered.
///
/// For streamed responses the latency is time to first byte: the line is
/// written when the response head is ready, not when the body ends.
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> BoxFuture<'static, Response> {
        Box::pin(async move {
            let start = Instant::now();
            let request_id = ctx.request_id();
            let method = ctx.request().method().to_string();
            let path = ctx.request().path().to_owned();
            let query = ctx.request().query_string().map(str::to_owned);

            let response = next.run(ctx).await;

            info!(
                request_id,
                %method,
                %path,
                query = query.as_deref(),
                status = response.status().as_u16(),
                streaming = response.is_streaming(),
                elapsed = ?start.elapsed(),
                "request handled"
            );

            response
        })
    }
}
