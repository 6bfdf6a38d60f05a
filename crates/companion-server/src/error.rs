//! Error mapping for the HTTP surface.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use companion_search::SearchError;
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Errors a request handler can produce.
///
/// Every variant renders as `{"error": <message>}` with the mapped status.
#[derive(Error, Debug)]
pub enum ApiError {
    /// No `Authorization` header on an authenticated surface
    #[error("Authorization header is missing")]
    MissingAuth,

    /// The bearer token did not match the configured companion token
    #[error("Invalid companion token")]
    InvalidToken,

    /// The request payload is unusable
    #[error("{0}")]
    Input(String),

    /// Forwarding to the upstream LLM failed before a response arrived
    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    /// Retrieval failed
    #[error(transparent)]
    Search(#[from] SearchError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingAuth | ApiError::InvalidToken => StatusCode::UNAUTHORIZED,
            ApiError::Input(_) => StatusCode::BAD_REQUEST,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            // Notes-API failures during retrieval are upstream failures too
            ApiError::Search(SearchError::Notes(_)) => StatusCode::BAD_GATEWAY,
            ApiError::Search(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("request failed: {self}");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
