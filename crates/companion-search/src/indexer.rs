//! Incremental block indexer.
//!
//! One sweep pulls every block updated since the persisted cursor, embeds
//! the batch and upserts it in a single call, then advances the cursor to
//! the sweep's start time. The cursor is written only after the upsert
//! succeeds, so a failed sweep re-considers the same window on the next
//! tick; idempotent upserts make the at-least-once replay harmless.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use companion_notes::NotesClient;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::embedder::Embedder;
use crate::error::{Result, SearchError};
use crate::schema::{BlockPayload, BlockPoint};
use crate::store::VectorIndex;

/// Summary of one index sweep
#[derive(Debug, Clone, Default)]
pub struct SweepStats {
    /// Blocks returned by the delta query
    pub blocks_seen: usize,
    /// Points written to the vector store
    pub points_upserted: usize,
    /// Whether the sweep was skipped because another one was running
    pub coalesced: bool,
}

/// Scheduled delta indexer for note blocks
pub struct Indexer {
    notes: Arc<NotesClient>,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    cursor_path: PathBuf,
    sweep_gate: Mutex<()>,
}

impl Indexer {
    /// Create an indexer persisting its cursor at `cursor_path`.
    pub fn new(
        notes: Arc<NotesClient>,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        cursor_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            notes,
            index,
            embedder,
            cursor_path: cursor_path.into(),
            sweep_gate: Mutex::new(()),
        }
    }

    /// Path of the cursor file.
    pub fn cursor_path(&self) -> &Path {
        &self.cursor_path
    }

    /// Read the cursor. A missing or unreadable file counts as 0, which
    /// makes the next sweep consider every block.
    pub fn read_cursor(&self) -> u64 {
        match std::fs::read_to_string(&self.cursor_path) {
            Ok(raw) => match raw.trim().parse::<u64>() {
                Ok(value) => value,
                Err(_) => {
                    warn!(
                        "cursor file {} is not a timestamp, treating as 0",
                        self.cursor_path.display()
                    );
                    0
                }
            },
            Err(_) => 0,
        }
    }

    fn write_cursor(&self, epoch_secs: u64) -> Result<()> {
        std::fs::write(&self.cursor_path, epoch_secs.to_string())?;
        Ok(())
    }

    /// Delete the cursor file, forcing the next sweep to reindex everything.
    pub fn clear_cursor(&self) -> Result<()> {
        match std::fs::remove_file(&self.cursor_path) {
            Ok(()) => {
                info!("cursor file removed, next sweep reindexes all blocks");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Run one sweep.
    ///
    /// At most one sweep runs at a time; a sweep that fires while another is
    /// in flight returns immediately with `coalesced` set.
    pub async fn sweep(&self) -> Result<SweepStats> {
        let Ok(_guard) = self.sweep_gate.try_lock() else {
            debug!("index sweep already running, skipping this tick");
            return Ok(SweepStats {
                coalesced: true,
                ..Default::default()
            });
        };

        let cursor = self.read_cursor();
        let sweep_start = epoch_now();

        let blocks = self.notes.blocks_updated_after(cursor).await?;
        let mut stats = SweepStats {
            blocks_seen: blocks.len(),
            ..Default::default()
        };

        if !blocks.is_empty() {
            let texts: Vec<String> = blocks.iter().map(|b| b.content.clone()).collect();
            let vectors = self.embedder.encode(texts).await?;
            if vectors.len() != blocks.len() {
                return Err(SearchError::Embedding(format!(
                    "embedder returned {} vectors for {} blocks",
                    vectors.len(),
                    blocks.len()
                )));
            }

            let points: Vec<BlockPoint> = blocks
                .into_iter()
                .zip(vectors)
                .map(|(block, vector)| BlockPoint {
                    id: BlockPoint::point_id(&block.id),
                    vector,
                    payload: BlockPayload {
                        block_id: block.id,
                        document_id: block.root_id,
                        content: block.content,
                    },
                })
                .collect();

            stats.points_upserted = points.len();
            self.index.upsert(points).await?;
        }

        self.write_cursor(sweep_start)?;
        info!(
            blocks = stats.blocks_seen,
            upserted = stats.points_upserted,
            "index sweep complete"
        );

        Ok(stats)
    }

    /// Index a single block.
    pub async fn add_block(
        &self,
        block_id: &str,
        document_id: &str,
        content: &str,
    ) -> Result<()> {
        let mut vectors = self.embedder.encode(vec![content.to_string()]).await?;
        if vectors.is_empty() {
            return Err(SearchError::Embedding(
                "embedder returned no vector for the block".to_string(),
            ));
        }

        let point = BlockPoint {
            id: BlockPoint::point_id(block_id),
            vector: vectors.remove(0),
            payload: BlockPayload {
                block_id: block_id.to_string(),
                document_id: document_id.to_string(),
                content: content.to_string(),
            },
        };

        self.index.upsert(vec![point]).await
    }

    /// Remove a single block from the index.
    pub async fn delete_block(&self, block_id: &str) -> Result<()> {
        self.index.delete(vec![BlockPoint::point_id(block_id)]).await
    }

    /// Administrative reset: drop every point and recreate the collection
    /// with identical configuration.
    pub async fn reset(&self) -> Result<()> {
        self.index.drop_and_recreate().await
    }

    /// Run sweeps forever: once immediately, then every `period`.
    ///
    /// Failures are logged and retried on the next tick; they never tear
    /// down the schedule.
    pub async fn run(self: Arc<Self>, period: Duration) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(e) = self.sweep().await {
                warn!("index sweep failed, will retry next tick: {e}");
            }
        }
    }
}

fn epoch_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
