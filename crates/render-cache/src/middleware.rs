//! Axum integration: put the render cache in front of any router.
//!
//! ```ignore
//! let app = Router::new()
//!     .route("/", get(index))
//!     .layer(axum::middleware::from_fn_with_state(cache, render_cache_layer));
//! ```

use crate::engine::{Outcome, RenderCache};
use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;

/// Serve crawler requests from the render cache; everything else, and any
/// request the cache could not answer, goes to the wrapped application.
pub async fn render_cache_layer(
    State(cache): State<RenderCache>,
    request: Request<Body>,
    next: Next,
) -> Response {
    match cache.handle(request).await {
        Outcome::Handled(response) => response,
        Outcome::Passthrough(request) => next.run(request).await,
    }
}
