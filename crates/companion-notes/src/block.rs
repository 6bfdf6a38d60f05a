//! Block rows returned by the kernel's SQL endpoint.

use serde::{Deserialize, Serialize};

/// A single row of the kernel's `blocks` table.
///
/// Only the columns the companion consumes are modelled; unknown columns are
/// ignored during deserialization.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Block {
    /// Block id
    pub id: String,

    /// Parent block id; empty for top-level blocks of a document
    #[serde(default)]
    pub parent_id: String,

    /// Id of the document (root block) this block belongs to
    #[serde(default)]
    pub root_id: String,

    /// Plain-text content with markdown stripped
    #[serde(default)]
    pub content: String,

    /// Local update timestamp, `YYYYMMDDHHMMSS`
    #[serde(default)]
    pub updated: String,

    /// Sibling order within the parent
    #[serde(default)]
    pub sort: i64,
}

/// Order blocks the way they read in the document.
///
/// Blocks with an empty `parent_id` are roots. Siblings sort by their `sort`
/// value ascending, and a block's children follow it immediately, before its
/// next sibling.
pub fn sort_blocks(blocks: Vec<Block>) -> Vec<Block> {
    use std::collections::HashMap;

    let mut children: HashMap<String, Vec<Block>> = HashMap::new();
    let mut roots = Vec::new();

    for block in blocks {
        if block.parent_id.is_empty() {
            roots.push(block);
        } else {
            children
                .entry(block.parent_id.clone())
                .or_default()
                .push(block);
        }
    }

    fn walk(mut level: Vec<Block>, children: &mut std::collections::HashMap<String, Vec<Block>>) -> Vec<Block> {
        level.sort_by_key(|b| b.sort);
        let mut ordered = Vec::new();
        for block in level {
            let kids = children.remove(&block.id).unwrap_or_default();
            ordered.push(block);
            ordered.extend(walk(kids, children));
        }
        ordered
    }

    walk(roots, &mut children)
}
