//! Error types for the render cache.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use page_cache::InvalidPartition;

/// Failures of the render tier. Fatal for the request being served, never
/// for the process.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// Failed to launch or connect to the browser.
    #[error("browser launch failed: {0}")]
    BrowserLaunch(String),

    /// Failed to open or navigate a page.
    #[error("navigation failed: {0}")]
    Navigation(String),

    /// Failed to read the rendered DOM.
    #[error("content retrieval failed: {0}")]
    ContentRetrieval(String),

    /// Render did not finish in time.
    #[error("render timeout after {0}ms")]
    Timeout(u64),

    /// Failed to strip or compress the rendered markup.
    #[error("post-processing failed: {0}")]
    PostProcess(String),
}

/// Failures talking to the remote page store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("store returned HTTP {status} for {op}")]
    Status { op: &'static str, status: u16 },

    #[error("store returned an unreadable {op} response: {detail}")]
    Malformed { op: &'static str, detail: String },

    #[error("page {0} has no absolute expiration to persist")]
    MissingExpiration(String),

    /// Catch-all for custom [`PageStore`](crate::store::PageStore) backends.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Invalid configuration, detected before anything is used.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid secret: {0}")]
    Secret(#[from] InvalidPartition),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),

    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Gzip encode/decode failure.
#[derive(Debug, thiserror::Error)]
#[error("gzip {op} failed: {source}")]
pub struct CodecError {
    pub op: &'static str,
    #[source]
    pub source: std::io::Error,
}

/// Any error surfaced by the render cache's public operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::Render(_) | Error::Store(_) => StatusCode::BAD_GATEWAY,
            Error::Config(_) | Error::Codec(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
