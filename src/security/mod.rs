//! Browser-facing security middleware.
//!
//! Only cross-origin access is handled here; authentication and rate
//! limiting are outside this service's scope.

mod cors;

pub use cors::CorsMiddleware;
