use std::sync::Arc;

use futures::future::BoxFuture;

use crate::{
    Method, Response, StatusCode,
    context::Context,
    middleware::{Middleware, Next},
};

/// CORS middleware for a browser client hosted on another origin.
///
/// - Requests without an `Origin` header, or from an origin not in the
///   allow-list, pass through unmodified.
/// - `OPTIONS` preflights from an allowed origin are answered with
///   `204 No Content` without reaching the router.
/// - Other requests from an allowed origin get `Access-Control-*` headers
///   appended to the downstream response, including streamed ones.
/// - A specific (non-`*`) origin is echoed back together with `Vary: Origin`.
///
/// # Examples
///
/// ```rust
/// use prompt_enhancer::security::CorsMiddleware;
///
/// let cors = CorsMiddleware::new(["https://prompts.example"]);
/// ```
pub struct CorsMiddleware {
    policy: Arc<CorsPolicy>,
}

struct CorsPolicy {
    origins: Vec<String>,
    methods: String,
    headers: String,
}

impl CorsPolicy {
    // The value for `Access-Control-Allow-Origin`, if the origin is allowed.
    fn allow(&self, origin: &str) -> Option<String> {
        if self.origins.iter().any(|o| o == "*") {
            Some("*".to_owned())
        } else if self.origins.iter().any(|o| o == origin) {
            Some(origin.to_owned())
        } else {
            None
        }
    }

    fn decorate(&self, response: &mut Response, allow_origin: &str) {
        response.add_header("Access-Control-Allow-Origin", allow_origin);
        response.add_header("Access-Control-Allow-Methods", self.methods.as_str());
        response.add_header("Access-Control-Allow-Headers", self.headers.as_str());
        if allow_origin != "*" {
            response.add_header("Vary", "Origin");
        }
    }
}

impl CorsMiddleware {
    /// Allows the given origins (`"*"` for any) to call `GET` and `POST`
    /// endpoints with a `Content-Type` header.
    pub fn new<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            policy: Arc::new(CorsPolicy {
                origins: origins.into_iter().map(Into::into).collect(),
                methods: "GET, POST, OPTIONS".to_owned(),
                headers: "Content-Type".to_owned(),
            }),
        }
    }
}

impl Middleware for CorsMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> BoxFuture<'static, Response> {
        let policy = Arc::clone(&self.policy);

        Box::pin(async move {
            let allow_origin = ctx
                .request()
                .headers()
                .get("origin")
                .and_then(|origin| policy.allow(origin));
            let Some(allow_origin) = allow_origin else {
                return next.run(ctx).await;
            };

            if ctx.request().method() == &Method::Options {
                let mut response =
                    Response::new(StatusCode::NoContent).header("Access-Control-Max-Age", "3600");
                policy.decorate(&mut response, &allow_origin);
                return response;
            }

            let mut response = next.run(ctx).await;
            policy.decorate(&mut response, &allow_origin);
            response
        })
    }
}
