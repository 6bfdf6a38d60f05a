//! Shared application state.

use std::sync::Arc;
use std::time::Duration;

use companion_config::CompanionConfig;
use companion_search::Retriever;

/// Total timeout for non-streaming upstream requests.
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// State shared by every request handler.
#[derive(Clone)]
pub struct AppState {
    /// Process configuration
    pub config: Arc<CompanionConfig>,

    /// Retrieval engine behind its seam, so tests can substitute a stub
    pub retriever: Arc<dyn Retriever>,

    /// Client for bounded upstream requests (30 s total)
    pub bounded: reqwest::Client,

    /// Client for streaming relays; connects like the bounded client but
    /// never cuts a running stream
    pub streaming: reqwest::Client,
}

impl AppState {
    /// Build the state with its two upstream clients.
    pub fn new(
        config: Arc<CompanionConfig>,
        retriever: Arc<dyn Retriever>,
    ) -> Result<Self, reqwest::Error> {
        let bounded = reqwest::Client::builder()
            .timeout(UPSTREAM_TIMEOUT)
            .build()?;
        let streaming = reqwest::Client::builder()
            .connect_timeout(UPSTREAM_TIMEOUT)
            .build()?;

        Ok(Self {
            config,
            retriever,
            bounded,
            streaming,
        })
    }
}
