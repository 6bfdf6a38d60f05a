//! Vector indexing and retrieval for SiYuan note blocks.
//!
//! This crate owns the companion's RAG core:
//!
//! - **Store**: a Qdrant collection of block points keyed by a deterministic
//!   64-bit id, so re-indexing a block replaces its prior version.
//! - **Embedder**: a local all-MiniLM-L6-v2 sentence encoder on Candle.
//! - **Tokenizers**: cached per-model token counters with a safe fallback.
//! - **Segmenter**: markdown-aware recursive splitting under a token budget.
//! - **Retrieval**: search, context assembly and prompt construction.
//! - **Indexer**: the scheduled delta sweep with its durable cursor.

pub mod embedder;
pub mod error;
pub mod indexer;
pub mod retrieval;
pub mod schema;
pub mod segmenter;
pub mod store;
pub mod tokenizer;

// Re-exports for convenience
pub use embedder::{Embedder, MiniLmEmbedder, EMBEDDING_DIM};
pub use error::{Result, SearchError};
pub use indexer::{Indexer, SweepStats};
pub use retrieval::{
    dedup_segments, render_prompt, RetrievalEngine, Retriever, ScoredBlock,
    DEFAULT_CONTEXT_LIMIT, DEFAULT_SEARCH_LIMIT,
};
pub use schema::{BlockPayload, BlockPoint, SearchHit};
pub use segmenter::{segment, MAX_SEGMENT_TOKENS};
pub use store::{QdrantIndex, VectorIndex};
pub use tokenizer::{TokenCounter, TokenizerRegistry, DEFAULT_TOKENIZER_MODEL};
