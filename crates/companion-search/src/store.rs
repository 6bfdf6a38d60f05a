//! Qdrant-backed vector index for note blocks.
//!
//! A thin facade over the Qdrant client: one cosine collection whose
//! dimension is fixed at creation time. Upserts are keyed by the
//! deterministic point id, so re-indexing a block replaces its prior point.

use async_trait::async_trait;
use qdrant_client::qdrant::{
    point_id::PointIdOptions, vectors_config::Config, CreateCollectionBuilder,
    DeletePointsBuilder, Distance, PointId, PointStruct, PointsIdsList, SearchPointsBuilder,
    UpsertPointsBuilder, VectorParams, VectorsConfig,
};
use qdrant_client::{Payload, Qdrant};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::{Result, SearchError};
use crate::schema::{fields, BlockPayload, BlockPoint, SearchHit};

/// Operations the rest of the system needs from a vector index.
///
/// The production implementation is [`QdrantIndex`]; tests substitute an
/// in-memory double.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Create the collection if absent; no-op when it already exists.
    async fn ensure_collection(&self) -> Result<()>;

    /// Insert-or-replace points, atomic per point id.
    async fn upsert(&self, points: Vec<BlockPoint>) -> Result<()>;

    /// Delete points by id.
    async fn delete(&self, ids: Vec<u64>) -> Result<()>;

    /// Nearest-neighbour search.
    async fn query(&self, vector: Vec<f32>, limit: u64) -> Result<Vec<SearchHit>>;

    /// Drop the collection and recreate it with identical configuration.
    async fn drop_and_recreate(&self) -> Result<()>;
}

/// Qdrant client wrapper for the block index
pub struct QdrantIndex {
    client: Qdrant,
    collection: String,
    dim: u64,
}

impl QdrantIndex {
    /// Connect to the Qdrant server at `location`.
    ///
    /// The connection is probed immediately so a misconfigured location
    /// fails at startup rather than on the first sweep.
    pub async fn connect(
        location: &str,
        collection: impl Into<String>,
        dim: usize,
    ) -> Result<Self> {
        info!("connecting to Qdrant at {location}");

        let client = Qdrant::from_url(location)
            .build()
            .map_err(|e| SearchError::Connection(format!("failed to build Qdrant client: {e}")))?;

        client
            .list_collections()
            .await
            .map_err(|e| SearchError::Connection(format!("failed to connect to Qdrant: {e}")))?;

        Ok(Self {
            client,
            collection: collection.into(),
            dim: dim as u64,
        })
    }

    /// Collection this index writes to.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    async fn create_collection(&self) -> Result<()> {
        info!(
            "creating collection '{}' (dim={}, distance=Cosine)",
            self.collection, self.dim
        );

        let vectors_config = VectorsConfig {
            config: Some(Config::Params(VectorParams {
                size: self.dim,
                distance: Distance::Cosine.into(),
                ..Default::default()
            })),
        };

        self.client
            .create_collection(
                CreateCollectionBuilder::new(&self.collection).vectors_config(vectors_config),
            )
            .await?;

        Ok(())
    }

    /// Dimension of the existing collection, when it can be read.
    async fn existing_dimension(&self) -> Result<Option<u64>> {
        let info = self.client.collection_info(&self.collection).await?;

        let size = info
            .result
            .and_then(|r| r.config)
            .and_then(|c| c.params)
            .and_then(|p| p.vectors_config)
            .and_then(|v| v.config)
            .and_then(|c| match c {
                Config::Params(params) => Some(params.size),
                Config::ParamsMap(_) => None,
            });

        Ok(size)
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn ensure_collection(&self) -> Result<()> {
        if self.client.collection_exists(&self.collection).await? {
            debug!("collection '{}' already exists", self.collection);

            if let Some(actual) = self.existing_dimension().await? {
                if actual != self.dim {
                    return Err(SearchError::DimensionMismatch {
                        expected: self.dim as usize,
                        actual: actual as usize,
                    });
                }
            }
            return Ok(());
        }

        self.create_collection().await
    }

    async fn upsert(&self, points: Vec<BlockPoint>) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }

        debug!("upserting {} points to '{}'", points.len(), self.collection);

        let qdrant_points = points
            .into_iter()
            .map(|p| {
                let payload = Payload::try_from(json!({
                    fields::BLOCK_ID: p.payload.block_id,
                    fields::DOCUMENT_ID: p.payload.document_id,
                    fields::CONTENT: p.payload.content,
                }))
                .map_err(|e| SearchError::Qdrant(format!("failed to build payload: {e}")))?;
                Ok(PointStruct::new(p.id, p.vector, payload))
            })
            .collect::<Result<Vec<_>>>()?;

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, qdrant_points).wait(true))
            .await?;

        Ok(())
    }

    async fn delete(&self, ids: Vec<u64>) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let ids: Vec<PointId> = ids.into_iter().map(PointId::from).collect();
        self.client
            .delete_points(
                DeletePointsBuilder::new(&self.collection)
                    .points(PointsIdsList { ids })
                    .wait(true),
            )
            .await?;

        Ok(())
    }

    async fn query(&self, vector: Vec<f32>, limit: u64) -> Result<Vec<SearchHit>> {
        let response = match self
            .client
            .search_points(
                SearchPointsBuilder::new(&self.collection, vector, limit).with_payload(true),
            )
            .await
        {
            Ok(response) => response,
            // An index with nothing searchable reports "not found"; that is
            // an empty result, not a failure.
            Err(e) if e.to_string().to_lowercase().contains("not found") => {
                warn!("search against '{}' found no index: {e}", self.collection);
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let hits = response
            .result
            .into_iter()
            .filter_map(|point| {
                let id = match point.id?.point_id_options? {
                    PointIdOptions::Num(n) => n,
                    PointIdOptions::Uuid(_) => return None,
                };

                let get_string = |key: &str| -> String {
                    point
                        .payload
                        .get(key)
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_string())
                        .unwrap_or_default()
                };

                Some(SearchHit {
                    id,
                    score: point.score,
                    payload: BlockPayload {
                        block_id: get_string(fields::BLOCK_ID),
                        document_id: get_string(fields::DOCUMENT_ID),
                        content: get_string(fields::CONTENT),
                    },
                })
            })
            .collect();

        Ok(hits)
    }

    async fn drop_and_recreate(&self) -> Result<()> {
        info!("dropping and recreating collection '{}'", self.collection);

        if self.client.collection_exists(&self.collection).await? {
            self.client.delete_collection(&self.collection).await?;
        }
        self.create_collection().await
    }
}
