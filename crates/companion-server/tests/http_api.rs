//! HTTP surface tests: auth gate, RAG rewriting, forwarding and streaming.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use companion_config::CompanionConfig;
use companion_search::{render_prompt, Result as SearchResult, Retriever, ScoredBlock};
use companion_server::{router, AppState};
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Retriever double returning fixed context segments.
struct StubRetriever {
    segments: Vec<String>,
}

impl StubRetriever {
    fn with_segments(segments: &[&str]) -> Self {
        Self {
            segments: segments.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[async_trait]
impl Retriever for StubRetriever {
    async fn search(&self, _query: &str, _limit: u64) -> SearchResult<Vec<ScoredBlock>> {
        Ok(vec![])
    }

    async fn context(
        &self,
        _query: &str,
        _limit: usize,
        _tokenizer_model: Option<&str>,
    ) -> SearchResult<Vec<String>> {
        Ok(self.segments.clone())
    }

    async fn build_prompt(
        &self,
        query: &str,
        _limit: usize,
        _tokenizer_model: Option<&str>,
    ) -> SearchResult<String> {
        Ok(render_prompt(query, &self.segments))
    }
}

/// Serve the app on an ephemeral port and return its base URL.
async fn spawn_app(config: CompanionConfig, retriever: StubRetriever) -> String {
    let state = AppState::new(Arc::new(config), Arc::new(retriever)).unwrap();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{addr}")
}

fn config_for(upstream: &MockServer) -> CompanionConfig {
    let mut config = CompanionConfig::default();
    config.openai.url = upstream.uri();
    config
}

#[tokio::test]
async fn health_needs_no_token() {
    let upstream = MockServer::start().await;
    let mut config = config_for(&upstream);
    config.server.companion_token = Some("x".to_string());

    let base = spawn_app(config, StubRetriever::with_segments(&[])).await;
    let response = reqwest::get(format!("{base}/health")).await.unwrap();

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({ "status": "healthy" }));
}

#[tokio::test]
async fn missing_token_is_rejected() {
    let upstream = MockServer::start().await;
    let mut config = config_for(&upstream);
    config.server.companion_token = Some("x".to_string());

    let base = spawn_app(config, StubRetriever::with_segments(&[])).await;
    let response = reqwest::get(format!("{base}/openai/direct/v1/models"))
        .await
        .unwrap();

    assert_eq!(response.status(), 401);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Authorization header is missing");
}

#[tokio::test]
async fn wrong_token_is_rejected() {
    let upstream = MockServer::start().await;
    let mut config = config_for(&upstream);
    config.server.companion_token = Some("x".to_string());

    let base = spawn_app(config, StubRetriever::with_segments(&[])).await;
    let response = reqwest::Client::new()
        .get(format!("{base}/openai/direct/v1/models"))
        .header("Authorization", "Bearer wrong")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 401);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Invalid companion token");
}

#[tokio::test]
async fn valid_token_passes_through_to_upstream() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] })))
        .mount(&upstream)
        .await;

    let mut config = config_for(&upstream);
    config.server.companion_token = Some("x".to_string());

    let base = spawn_app(config, StubRetriever::with_segments(&[])).await;
    let response = reqwest::Client::new()
        .get(format!("{base}/openai/direct/v1/models"))
        .header("Authorization", "Bearer x")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({ "data": [] }));
}

#[tokio::test]
async fn no_configured_token_disables_auth() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] })))
        .mount(&upstream)
        .await;

    let base = spawn_app(config_for(&upstream), StubRetriever::with_segments(&[])).await;
    let response = reqwest::get(format!("{base}/openai/direct/v1/models"))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn rag_chat_rewrites_only_the_last_user_message() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "cmpl-1" })))
        .mount(&upstream)
        .await;

    let base = spawn_app(
        config_for(&upstream),
        StubRetriever::with_segments(&["seg1", "seg2"]),
    )
    .await;

    let response = reqwest::Client::new()
        .post(format!("{base}/openai/rag/v1/chat/completions"))
        .json(&json!({
            "model": "gpt-3.5-turbo",
            "messages": [
                { "role": "system", "content": "s" },
                { "role": "user", "content": "what is X?" }
            ]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let requests = upstream.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let forwarded: Value = serde_json::from_slice(&requests[0].body).unwrap();

    assert_eq!(forwarded["messages"][0]["content"], "s");
    assert_eq!(
        forwarded["messages"][1]["content"],
        "Additional context:\n\nseg1\n\nseg2\n\nQuestion: what is X?\n\nAnswer: \n\n"
    );
}

#[tokio::test]
async fn rag_chat_pops_tokenizer_model_before_forwarding() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&upstream)
        .await;

    let base = spawn_app(config_for(&upstream), StubRetriever::with_segments(&[])).await;
    reqwest::Client::new()
        .post(format!("{base}/openai/rag/v1/chat/completions"))
        .json(&json!({
            "model": "llama3",
            "tokenizerModel": "gpt-4",
            "messages": [{ "role": "user", "content": "q" }]
        }))
        .send()
        .await
        .unwrap();

    let requests = upstream.received_requests().await.unwrap();
    let forwarded: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert!(forwarded.get("tokenizerModel").is_none());
    assert_eq!(forwarded["model"], "llama3");
}

#[tokio::test]
async fn rag_chat_without_user_message_is_bad_request() {
    let upstream = MockServer::start().await;
    let base = spawn_app(config_for(&upstream), StubRetriever::with_segments(&[])).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/openai/rag/v1/chat/completions"))
        .json(&json!({ "messages": [{ "role": "system", "content": "s" }] }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "No user message provided");
}

#[tokio::test]
async fn rag_completions_rewrites_the_prompt_field() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&upstream)
        .await;

    let base = spawn_app(
        config_for(&upstream),
        StubRetriever::with_segments(&["ctx"]),
    )
    .await;

    let response = reqwest::Client::new()
        .post(format!("{base}/openai/rag/v1/completions"))
        .json(&json!({ "model": "gpt-3.5-turbo", "prompt": "tell me" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let requests = upstream.received_requests().await.unwrap();
    let forwarded: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(
        forwarded["prompt"],
        "Additional context:\n\nctx\n\nQuestion: tell me\n\nAnswer: \n\n"
    );
}

#[tokio::test]
async fn rag_completions_without_prompt_is_bad_request() {
    let upstream = MockServer::start().await;
    let base = spawn_app(config_for(&upstream), StubRetriever::with_segments(&[])).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/openai/rag/v1/completions"))
        .json(&json!({ "model": "gpt-3.5-turbo" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "No prompt provided");
}

#[tokio::test]
async fn direct_chat_forwards_payload_unchanged() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&upstream)
        .await;

    let payload = json!({
        "model": "gpt-4",
        "messages": [{ "role": "user", "content": "untouched" }],
        "temperature": 0.2
    });

    let base = spawn_app(config_for(&upstream), StubRetriever::with_segments(&["x"])).await;
    reqwest::Client::new()
        .post(format!("{base}/openai/direct/v1/chat/completions"))
        .json(&payload)
        .send()
        .await
        .unwrap();

    let requests = upstream.received_requests().await.unwrap();
    let forwarded: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(forwarded, payload);
}

#[tokio::test]
async fn caller_credentials_are_replaced_upstream() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&upstream)
        .await;

    let mut config = config_for(&upstream);
    config.server.companion_token = Some("companion-secret".to_string());
    config.openai.token = Some("upstream-secret".to_string());

    let base = spawn_app(config, StubRetriever::with_segments(&[])).await;
    reqwest::Client::new()
        .post(format!("{base}/openai/direct/v1/chat/completions"))
        .header("Authorization", "Bearer companion-secret")
        .json(&json!({ "messages": [] }))
        .send()
        .await
        .unwrap();

    let requests = upstream.received_requests().await.unwrap();
    let auth = requests[0]
        .headers
        .get("authorization")
        .expect("authorization header present upstream");
    assert_eq!(auth, "Bearer upstream-secret");
}

#[tokio::test]
async fn caller_credentials_are_stripped_when_no_upstream_token() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&upstream)
        .await;

    let mut config = config_for(&upstream);
    config.server.companion_token = Some("companion-secret".to_string());

    let base = spawn_app(config, StubRetriever::with_segments(&[])).await;
    reqwest::Client::new()
        .post(format!("{base}/openai/direct/v1/chat/completions"))
        .header("Authorization", "Bearer companion-secret")
        .json(&json!({ "messages": [] }))
        .send()
        .await
        .unwrap();

    let requests = upstream.received_requests().await.unwrap();
    assert!(requests[0].headers.get("authorization").is_none());
}

#[tokio::test]
async fn streaming_bytes_are_relayed_verbatim() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(b"abbccc".to_vec(), "text/event-stream"),
        )
        .mount(&upstream)
        .await;

    let base = spawn_app(config_for(&upstream), StubRetriever::with_segments(&[])).await;
    let response = reqwest::Client::new()
        .post(format!("{base}/openai/direct/v1/chat/completions"))
        .json(&json!({
            "stream": true,
            "messages": [{ "role": "user", "content": "q" }]
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(
        response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok()),
        Some("text/event-stream")
    );
    let body = response.bytes().await.unwrap();
    assert_eq!(body.as_ref(), b"abbccc");
}

#[tokio::test]
async fn upstream_error_status_is_forwarded() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(429).set_body_json(json!({ "error": "rate limited" })),
        )
        .mount(&upstream)
        .await;

    let base = spawn_app(config_for(&upstream), StubRetriever::with_segments(&[])).await;
    let response = reqwest::Client::new()
        .post(format!("{base}/openai/direct/v1/chat/completions"))
        .json(&json!({ "messages": [] }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 429);
}

#[tokio::test]
async fn retrieve_returns_the_context_list() {
    let upstream = MockServer::start().await;
    let base = spawn_app(
        config_for(&upstream),
        StubRetriever::with_segments(&["seg1", "seg2"]),
    )
    .await;

    let response = reqwest::Client::new()
        .post(format!("{base}/openai/direct/v1/retrieve"))
        .json(&json!({ "prompt": "what is X?" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({ "context": ["seg1", "seg2"] }));
}

#[tokio::test]
async fn retrieve_without_prompt_is_bad_request() {
    let upstream = MockServer::start().await;
    let base = spawn_app(config_for(&upstream), StubRetriever::with_segments(&[])).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/openai/direct/v1/retrieve"))
        .json(&json!({ "model": "gpt-4" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
}
