//! Retrieval and context assembly.
//!
//! For a user query: embed it, search the block index, fetch the markdown of
//! every referenced document concurrently, segment each document around its
//! matched blocks and assemble the deduplicated context list or the final
//! prompt.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use companion_notes::NotesClient;
use futures::future::try_join_all;
use tracing::debug;

use crate::embedder::Embedder;
use crate::error::{Result, SearchError};
use crate::segmenter::{segment, MAX_SEGMENT_TOKENS};
use crate::store::VectorIndex;
use crate::tokenizer::TokenizerRegistry;

/// Default number of hits for a similarity search
pub const DEFAULT_SEARCH_LIMIT: u64 = 5;

/// Default number of hits used to assemble context
pub const DEFAULT_CONTEXT_LIMIT: usize = 3;

/// A search hit flattened to its block fields
#[derive(Debug, Clone)]
pub struct ScoredBlock {
    /// Block id
    pub block_id: String,
    /// Document the block belongs to
    pub document_id: String,
    /// Plain-text block content
    pub content: String,
    /// Similarity score
    pub score: f32,
}

/// Query-time retrieval operations.
///
/// The seam the HTTP layer depends on; production uses [`RetrievalEngine`].
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Most similar indexed blocks for `query`.
    async fn search(&self, query: &str, limit: u64) -> Result<Vec<ScoredBlock>>;

    /// Context segments for `query`, at most `2 * limit` after dedup.
    ///
    /// `tokenizer_model` scopes token counting to the request; `None` uses
    /// the process default.
    async fn context(
        &self,
        query: &str,
        limit: usize,
        tokenizer_model: Option<&str>,
    ) -> Result<Vec<String>>;

    /// The full prompt for `query`: retrieved context followed by the
    /// question/answer scaffolding.
    async fn build_prompt(
        &self,
        query: &str,
        limit: usize,
        tokenizer_model: Option<&str>,
    ) -> Result<String>;
}

/// Production retriever over the vector index, embedder and notes client.
pub struct RetrievalEngine {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    notes: Arc<NotesClient>,
    tokenizers: Arc<TokenizerRegistry>,
    max_segment_tokens: usize,
}

impl RetrievalEngine {
    /// Create an engine with the default segment budget.
    pub fn new(
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        notes: Arc<NotesClient>,
        tokenizers: Arc<TokenizerRegistry>,
    ) -> Self {
        Self {
            index,
            embedder,
            notes,
            tokenizers,
            max_segment_tokens: MAX_SEGMENT_TOKENS,
        }
    }

    /// Override the per-segment token budget.
    pub fn with_segment_budget(mut self, max_segment_tokens: usize) -> Self {
        self.max_segment_tokens = max_segment_tokens;
        self
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embedder.encode(vec![query.to_string()]).await?;
        if vectors.is_empty() {
            return Err(SearchError::Embedding(
                "embedder returned no vector for the query".to_string(),
            ));
        }
        Ok(vectors.remove(0))
    }
}

#[async_trait]
impl Retriever for RetrievalEngine {
    async fn search(&self, query: &str, limit: u64) -> Result<Vec<ScoredBlock>> {
        let vector = self.embed_query(query).await?;
        let hits = self.index.query(vector, limit).await?;

        Ok(hits
            .into_iter()
            .map(|hit| ScoredBlock {
                block_id: hit.payload.block_id,
                document_id: hit.payload.document_id,
                content: hit.payload.content,
                score: hit.score,
            })
            .collect())
    }

    async fn context(
        &self,
        query: &str,
        limit: usize,
        tokenizer_model: Option<&str>,
    ) -> Result<Vec<String>> {
        let hits = self.search(query, limit as u64).await?;
        if hits.is_empty() {
            return Ok(Vec::new());
        }

        // Group matched block contents by document, first-seen order.
        let mut documents: Vec<(String, Vec<String>)> = Vec::new();
        for hit in hits {
            if hit.content.trim().is_empty() {
                continue;
            }
            match documents.iter_mut().find(|(id, _)| *id == hit.document_id) {
                Some((_, matching)) => matching.push(hit.content),
                None => documents.push((hit.document_id, vec![hit.content])),
            }
        }

        let counter = match tokenizer_model {
            Some(model) => self.tokenizers.counter_for(model),
            None => self.tokenizers.current(),
        };

        let fetches = documents
            .iter()
            .map(|(document_id, _)| self.notes.document_markdown(document_id));
        let markdowns = try_join_all(fetches).await?;

        let mut segments = Vec::new();
        for ((document_id, matching), markdown) in documents.into_iter().zip(markdowns) {
            let document_segments =
                segment(&markdown, &matching, &counter, self.max_segment_tokens)?;
            debug!(
                document_id = %document_id,
                count = document_segments.len(),
                "segmented document for context"
            );
            segments.extend(document_segments);
        }

        Ok(dedup_segments(segments, 2 * limit))
    }

    async fn build_prompt(
        &self,
        query: &str,
        limit: usize,
        tokenizer_model: Option<&str>,
    ) -> Result<String> {
        let context = self.context(query, limit, tokenizer_model).await?;
        Ok(render_prompt(query, &context))
    }
}

/// Drop duplicate segments (keeping first occurrence) and cap the list.
pub fn dedup_segments(segments: Vec<String>, max: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut unique: Vec<String> = segments
        .into_iter()
        .filter(|segment| seen.insert(segment.clone()))
        .collect();
    unique.truncate(max);
    unique
}

/// Render the prompt envelope around the retrieved context.
///
/// The exact shape is part of the companion's contract with its callers:
/// `Additional context:` and the `Question:`/`Answer:` scaffolding are
/// always present, with every context segment followed by one blank line.
pub fn render_prompt(query: &str, context: &[String]) -> String {
    let mut prompt = String::from("Additional context:\n\n");
    for segment in context {
        prompt.push_str(segment);
        prompt.push_str("\n\n");
    }
    prompt.push_str("Question: ");
    prompt.push_str(query);
    prompt.push_str("\n\nAnswer: \n\n");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_prompt_without_context() {
        let prompt = render_prompt("anything", &[]);
        assert_eq!(prompt, "Additional context:\n\nQuestion: anything\n\nAnswer: \n\n");
    }

    #[test]
    fn test_render_prompt_with_context() {
        let context = vec!["seg1".to_string(), "seg2".to_string()];
        let prompt = render_prompt("what is X?", &context);
        assert_eq!(
            prompt,
            "Additional context:\n\nseg1\n\nseg2\n\nQuestion: what is X?\n\nAnswer: \n\n"
        );
    }

    #[test]
    fn test_render_prompt_shape() {
        let context = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let prompt = render_prompt("q", &context);
        assert!(prompt.starts_with("Additional context:\n\n"));
        assert!(prompt.ends_with("\n\nAnswer: \n\n"));
        assert!(prompt.contains("Question: q"));
    }

    #[test]
    fn test_dedup_segments_removes_duplicates() {
        let segments = vec![
            "a".to_string(),
            "b".to_string(),
            "a".to_string(),
            "c".to_string(),
        ];
        assert_eq!(dedup_segments(segments, 10), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_dedup_segments_truncates() {
        let segments = vec![
            "a".to_string(),
            "b".to_string(),
            "c".to_string(),
            "d".to_string(),
        ];
        assert_eq!(dedup_segments(segments, 2), vec!["a", "b"]);
    }
}
