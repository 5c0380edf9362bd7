use crate::backend::BackendError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use page_cache::InvalidPartition;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("You must send \"secret\" and \"hash\" as query parameters")]
    MissingKey,

    #[error("Invalid storage key: {0}")]
    InvalidKey(#[from] InvalidPartition),

    #[error("Invalid request body. Must include \"secret\" and \"page\". ({0})")]
    InvalidBody(String),

    #[error("Page does not exist")]
    NotFound,

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingKey | ApiError::InvalidKey(_) | ApiError::InvalidBody(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "storage backend failed");
        }
        (status, self.to_string()).into_response()
    }
}
