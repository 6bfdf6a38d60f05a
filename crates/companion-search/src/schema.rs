//! Point and payload types for the block index.

use serde::{Deserialize, Serialize};

/// Payload field names stored alongside each point
pub mod fields {
    /// Block id in the knowledge base
    pub const BLOCK_ID: &str = "block_id";
    /// Id of the document (root block) the block belongs to
    pub const DOCUMENT_ID: &str = "document_id";
    /// Plain-text block content
    pub const CONTENT: &str = "content";
}

/// Metadata payload for an indexed block
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlockPayload {
    /// Block id in the knowledge base
    pub block_id: String,
    /// Document the block belongs to
    pub document_id: String,
    /// Plain-text block content
    pub content: String,
}

/// A point to upsert into the collection
#[derive(Debug, Clone)]
pub struct BlockPoint {
    /// Deterministic point id, derived from the block id
    pub id: u64,
    /// Vector embedding of the block content
    pub vector: Vec<f32>,
    /// Metadata payload
    pub payload: BlockPayload,
}

impl BlockPoint {
    /// Derive the point id for a block.
    ///
    /// The first 8 bytes of the MD5 digest of the block id, read as a
    /// big-endian unsigned integer. Stable across processes, so a re-indexed
    /// block always replaces its previous point.
    pub fn point_id(block_id: &str) -> u64 {
        let digest = md5::compute(block_id.as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest.0[..8]);
        u64::from_be_bytes(prefix)
    }
}

/// Search result from a vector query
#[derive(Debug, Clone)]
pub struct SearchHit {
    /// Point id
    pub id: u64,
    /// Similarity score
    pub score: f32,
    /// Block payload
    pub payload: BlockPayload,
}
