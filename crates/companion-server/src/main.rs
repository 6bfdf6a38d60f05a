//! SiYuan AI Companion server.
//!
//! Wires the notes client, embedder, vector index and retrieval engine
//! together, starts the periodic index sweep and serves the
//! OpenAI-compatible surface.
//!
//! # Usage
//!
//! ```bash
//! # All configuration comes from the environment (see companion-config)
//! SIYUAN_URL=http://localhost:6806 siyuan-companion --listen 0.0.0.0:8000
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use companion_config::CompanionConfig;
use companion_notes::NotesClient;
use companion_search::{
    Embedder, Indexer, MiniLmEmbedder, QdrantIndex, RetrievalEngine, TokenizerRegistry,
    VectorIndex,
};
use companion_server::{router, AppState};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// SiYuan AI Companion - RAG sidecar with an OpenAI-compatible proxy
#[derive(Parser, Debug)]
#[command(name = "siyuan-companion")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Address to serve the companion API on
    #[arg(long, env = "COMPANION_LISTEN", default_value = "0.0.0.0:8000")]
    listen: SocketAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = CompanionConfig::from_env().context("invalid configuration")?;

    let filter = EnvFilter::try_new(&config.logging.level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let notes = Arc::new(
        NotesClient::new(&config.siyuan.url, config.siyuan.token.as_deref())
            .context("failed to build SiYuan client")?,
    );

    let embedder = MiniLmEmbedder::new().context("failed to initialise embedder")?;
    {
        // Load the model in the background so the first request or sweep
        // does not pay the download cost inline.
        let embedder = embedder.clone();
        tokio::spawn(async move {
            if let Err(e) = embedder.warmup().await {
                warn!("embedder warmup failed, will retry on first use: {e}");
            }
        });
    }
    let embedder: Arc<dyn Embedder> = Arc::new(embedder);

    // The collection must be usable before anything is served; failing here
    // exits non-zero.
    let index: Arc<dyn VectorIndex> = Arc::new(
        QdrantIndex::connect(
            &config.qdrant.location,
            &config.qdrant.collection_name,
            embedder.dim(),
        )
        .await
        .context("failed to connect to Qdrant")?,
    );
    index
        .ensure_collection()
        .await
        .context("failed to ensure the vector collection")?;

    let tokenizers = Arc::new(TokenizerRegistry::new());
    let retriever = Arc::new(RetrievalEngine::new(
        Arc::clone(&index),
        Arc::clone(&embedder),
        Arc::clone(&notes),
        Arc::clone(&tokenizers),
    ));

    let indexer = Arc::new(Indexer::new(
        Arc::clone(&notes),
        Arc::clone(&index),
        Arc::clone(&embedder),
        &config.indexer.cursor_path,
    ));
    if config.indexer.force_update_index {
        indexer
            .clear_cursor()
            .context("failed to remove the cursor file")?;
    }
    let sweep_interval = config.indexer.interval();
    tokio::spawn(Arc::clone(&indexer).run(sweep_interval));

    let state = AppState::new(Arc::new(config), retriever)
        .context("failed to build upstream HTTP clients")?;
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(cli.listen)
        .await
        .with_context(|| format!("failed to bind {}", cli.listen))?;
    info!("listening on {}", cli.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {e}");
    }
}
