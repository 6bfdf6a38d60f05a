//! Request forwarding to the upstream OpenAI-compatible API.
//!
//! Caller headers travel upstream minus the hop-by-hop set, and the
//! `Authorization` header is always replaced with the configured upstream
//! token (or removed when none is configured) so caller credentials never
//! leak. Streaming payloads are relayed chunk by chunk with no total
//! timeout; everything else is bounded at 30 seconds.

use axum::body::Body;
use axum::http::header::{
    HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE,
    HOST, TRANSFER_ENCODING,
};
use axum::http::{Method, StatusCode};
use axum::response::Response;
use serde_json::Value;
use tracing::debug;

use crate::error::ApiError;
use crate::state::AppState;

/// Headers never copied between the caller and the upstream.
const HOP_BY_HOP: [HeaderName; 5] = [
    AUTHORIZATION,
    CONNECTION,
    CONTENT_LENGTH,
    HOST,
    TRANSFER_ENCODING,
];

/// Forward a request to `endpoint` under the configured upstream URL.
///
/// A payload with `stream: true` switches to the streaming relay: the
/// upstream body is piped through verbatim as `text/event-stream`.
pub async fn forward(
    state: &AppState,
    endpoint: &str,
    method: Method,
    caller_headers: &HeaderMap,
    payload: Option<Value>,
) -> Result<Response, ApiError> {
    let url = join_url(&state.config.openai.url, endpoint);
    let headers = upstream_headers(caller_headers, state.config.openai.token.as_deref());

    let stream = method == Method::POST
        && payload
            .as_ref()
            .and_then(|p| p.get("stream"))
            .and_then(Value::as_bool)
            .unwrap_or(false);

    debug!(%url, stream, "forwarding request upstream");

    let client = if stream { &state.streaming } else { &state.bounded };
    let mut request = client.request(method, &url).headers(headers);
    if let Some(payload) = &payload {
        request = request.json(payload);
    }

    let upstream = request.send().await?;
    let status = StatusCode::from_u16(upstream.status().as_u16())
        .unwrap_or(StatusCode::BAD_GATEWAY);

    if stream {
        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
        return Ok(response);
    }

    let response_headers = upstream.headers().clone();
    let body = upstream.bytes().await?;

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    for (name, value) in &response_headers {
        if HOP_BY_HOP.contains(name) {
            continue;
        }
        response.headers_mut().append(name.clone(), value.clone());
    }

    Ok(response)
}

/// Join the upstream base URL with an endpoint path.
fn join_url(base: &str, endpoint: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), endpoint)
}

/// Caller headers with the hop-by-hop set removed and `Authorization`
/// replaced by the configured upstream token.
fn upstream_headers(caller: &HeaderMap, upstream_token: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in caller {
        if HOP_BY_HOP.contains(name) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    if let Some(token) = upstream_token {
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}")) {
            headers.insert(AUTHORIZATION, value);
        }
    }

    headers
}
