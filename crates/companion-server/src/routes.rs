//! OpenAI-compatible endpoints.
//!
//! Two families under `/openai`: the RAG family rewrites the prompt with
//! retrieved context before forwarding, the direct family forwards payloads
//! unchanged. Both forward to the configured upstream API and require the
//! companion token when one is set.

use axum::extract::State;
use axum::http::{HeaderMap, Method};
use axum::middleware;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use companion_search::DEFAULT_CONTEXT_LIMIT;
use serde_json::{json, Value};
use tracing::debug;

use crate::auth::require_token;
use crate::error::ApiError;
use crate::proxy::forward;
use crate::state::AppState;

/// Build the full application router.
pub fn router(state: AppState) -> Router {
    let openai = Router::new()
        .route("/rag/v1/chat/completions", post(chat_completions_rag))
        .route("/direct/v1/chat/completions", post(chat_completions_direct))
        .route("/rag/v1/completions", post(completions_rag))
        .route("/direct/v1/completions", post(completions_direct))
        .route("/rag/v1/embeddings", post(embeddings))
        .route("/direct/v1/embeddings", post(embeddings))
        .route("/rag/v1/models", get(models))
        .route("/direct/v1/models", get(models))
        .route("/direct/v1/retrieve", post(retrieve))
        .layer(middleware::from_fn_with_state(state.clone(), require_token));

    Router::new()
        .route("/health", get(health))
        .nest("/openai", openai)
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

/// Chat completion with automatic RAG prompt injection.
///
/// The last `user` message is the query; its content is replaced with the
/// retrieval-augmented prompt before forwarding.
async fn chat_completions_rag(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut payload): Json<Value>,
) -> Result<Response, ApiError> {
    let tokenizer_model = take_tokenizer_model(&mut payload);
    let model = tokenizer_model.or_else(|| payload_model(&payload));

    let query = last_user_message(&payload)
        .ok_or_else(|| ApiError::Input("No user message provided".to_string()))?;

    let prompt = state
        .retriever
        .build_prompt(&query, DEFAULT_CONTEXT_LIMIT, model.as_deref())
        .await?;
    set_last_user_message(&mut payload, &prompt);

    forward(&state, "chat/completions", Method::POST, &headers, Some(payload)).await
}

/// Direct proxy to the upstream chat completion endpoint.
async fn chat_completions_direct(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Result<Response, ApiError> {
    forward(&state, "chat/completions", Method::POST, &headers, Some(payload)).await
}

/// Raw completion with automatic RAG prompt injection.
///
/// The query comes from the `prompt` field, which is replaced in place.
async fn completions_rag(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut payload): Json<Value>,
) -> Result<Response, ApiError> {
    let tokenizer_model = take_tokenizer_model(&mut payload);
    let model = tokenizer_model.or_else(|| payload_model(&payload));

    let query = payload
        .get("prompt")
        .and_then(Value::as_str)
        .filter(|p| !p.is_empty())
        .map(String::from)
        .ok_or_else(|| ApiError::Input("No prompt provided".to_string()))?;

    let prompt = state
        .retriever
        .build_prompt(&query, DEFAULT_CONTEXT_LIMIT, model.as_deref())
        .await?;
    payload["prompt"] = json!(prompt);

    forward(&state, "completions", Method::POST, &headers, Some(payload)).await
}

/// Direct proxy to the upstream completion endpoint.
async fn completions_direct(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Result<Response, ApiError> {
    forward(&state, "completions", Method::POST, &headers, Some(payload)).await
}

/// Pass-through embedding generation. No prompts injected.
async fn embeddings(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Result<Response, ApiError> {
    forward(&state, "embeddings", Method::POST, &headers, Some(payload)).await
}

/// Pass-through model listing.
async fn models(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    forward(&state, "models", Method::GET, &headers, None).await
}

/// Return the context for a query so the caller can assemble its own prompt.
async fn retrieve(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let query = payload
        .get("prompt")
        .and_then(Value::as_str)
        .filter(|p| !p.is_empty())
        .map(String::from)
        .ok_or_else(|| ApiError::Input("No user message provided".to_string()))?;
    let model = payload_model(&payload);

    let context = state
        .retriever
        .context(&query, DEFAULT_CONTEXT_LIMIT, model.as_deref())
        .await?;

    Ok(Json(json!({ "context": context })))
}

/// Pop the `tokenizerModel` override from the payload.
///
/// Third-party model runners use names the tokenizer hub cannot resolve;
/// this field names the hub model to count tokens with, and must not reach
/// the upstream API.
fn take_tokenizer_model(payload: &mut Value) -> Option<String> {
    let model = payload
        .as_object_mut()?
        .remove("tokenizerModel")?
        .as_str()
        .map(String::from);
    if let Some(model) = &model {
        debug!("tokenizer model override: {model}");
    }
    model
}

/// The `model` field of the payload.
fn payload_model(payload: &Value) -> Option<String> {
    payload
        .get("model")
        .and_then(Value::as_str)
        .map(String::from)
}

/// Content of the last `user` message, when present and non-empty.
fn last_user_message(payload: &Value) -> Option<String> {
    payload
        .get("messages")?
        .as_array()?
        .iter()
        .rev()
        .find(|m| m.get("role").and_then(Value::as_str) == Some("user"))?
        .get("content")
        .and_then(Value::as_str)
        .filter(|content| !content.is_empty())
        .map(String::from)
}

/// Replace the content of the last `user` message.
fn set_last_user_message(payload: &mut Value, content: &str) {
    let Some(messages) = payload.get_mut("messages").and_then(Value::as_array_mut) else {
        return;
    };
    if let Some(message) = messages
        .iter_mut()
        .rev()
        .find(|m| m.get("role").and_then(Value::as_str) == Some("user"))
    {
        message["content"] = json!(content);
    }
}
