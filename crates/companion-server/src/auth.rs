//! Shared-token authentication middleware.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::ApiError;
use crate::state::AppState;

/// Validate the bearer token on incoming requests.
///
/// With no `companion_token` configured, authentication is disabled and
/// every request passes. Otherwise the request must carry
/// `Authorization: Bearer <token>` with the exact configured value.
pub async fn require_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.config.server.companion_token.as_deref() else {
        return next.run(request).await;
    };

    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    let Some(header) = header else {
        return ApiError::MissingAuth.into_response();
    };

    match header.split_whitespace().nth(1) {
        Some(token) if token == expected => next.run(request).await,
        _ => ApiError::InvalidToken.into_response(),
    }
}
