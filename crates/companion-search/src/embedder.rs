//! Local sentence embedder using Candle.
//!
//! Encodes block text with `sentence-transformers/all-MiniLM-L6-v2`
//! (384 dimensions) and L2-normalises the pooled output, so cosine
//! similarity in the vector store works on unit vectors.
//!
//! GPU acceleration via compile-time features:
//! - `--features metal` for macOS Metal/MPS
//! - `--features cuda` for NVIDIA CUDA

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig, DTYPE};
use hf_hub::{api::sync::Api, Repo, RepoType};
use once_cell::sync::OnceCell;
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer};
use tracing::{debug, info};

use crate::error::{Result, SearchError};

/// Embedding dimension of all-MiniLM-L6-v2
pub const EMBEDDING_DIM: usize = 384;

/// Sentence-embedding model on HuggingFace Hub
const MODEL_ID: &str = "sentence-transformers/all-MiniLM-L6-v2";

/// Text-to-vector encoder.
///
/// Implementations must be safe under concurrent calls; the process holds a
/// single embedder shared by the indexer and every request handler.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Encode a batch of texts into unit-norm vectors of [`Embedder::dim`] length.
    async fn encode(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    /// Dimension of the produced vectors.
    fn dim(&self) -> usize;
}

/// Candle-backed local embedder.
///
/// Uses `Arc` for interior clonability, which is required for
/// `spawn_blocking` to move the embedder into the blocking task. The model
/// is loaded lazily on first use via `OnceCell`.
#[derive(Clone)]
pub struct MiniLmEmbedder {
    inner: Arc<MiniLmInner>,
}

struct MiniLmInner {
    model: OnceCell<LoadedModel>,
    device: Device,
}

struct LoadedModel {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
}

impl MiniLmEmbedder {
    /// Create a new embedder.
    ///
    /// Device is selected automatically: Metal > CUDA > CPU.
    pub fn new() -> Result<Self> {
        let device = select_device()?;
        Ok(Self {
            inner: Arc::new(MiniLmInner {
                model: OnceCell::new(),
                device,
            }),
        })
    }

    /// Create with a specific device
    pub fn with_device(device: Device) -> Self {
        Self {
            inner: Arc::new(MiniLmInner {
                model: OnceCell::new(),
                device,
            }),
        }
    }

    /// Whether the model weights have been loaded yet
    pub fn is_loaded(&self) -> bool {
        self.inner.model.get().is_some()
    }

    /// Preload the model so the first request does not pay the load cost.
    pub async fn warmup(&self) -> Result<()> {
        let embedder = self.clone();
        tokio::task::spawn_blocking(move || embedder.ensure_model().map(|_| ()))
            .await
            .map_err(|e| SearchError::Embedding(format!("warmup task panicked: {e}")))?
    }

    fn ensure_model(&self) -> Result<&LoadedModel> {
        self.inner
            .model
            .get_or_try_init(|| load_model(&self.inner.device))
    }

    fn encode_sync(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        debug!("encoding {} texts", texts.len());
        let loaded = self.ensure_model()?;
        encode_with_model(&loaded.model, &loaded.tokenizer, &loaded.device, texts)
    }
}

#[async_trait]
impl Embedder for MiniLmEmbedder {
    async fn encode(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let embedder = self.clone();
        tokio::task::spawn_blocking(move || embedder.encode_sync(&texts))
            .await
            .map_err(|e| SearchError::Embedding(format!("blocking task panicked: {e}")))?
    }

    fn dim(&self) -> usize {
        EMBEDDING_DIM
    }
}

/// Select the best available device for inference
fn select_device() -> Result<Device> {
    #[cfg(feature = "metal")]
    {
        match Device::new_metal(0) {
            Ok(device) => {
                info!("using Metal/MPS GPU acceleration");
                return Ok(device);
            }
            Err(e) => {
                debug!("Metal not available: {e}");
            }
        }
    }

    #[cfg(feature = "cuda")]
    {
        match Device::new_cuda(0) {
            Ok(device) => {
                info!("using CUDA GPU acceleration");
                return Ok(device);
            }
            Err(e) => {
                debug!("CUDA not available: {e}");
            }
        }
    }

    info!("using CPU (no GPU acceleration available)");
    Ok(Device::Cpu)
}

/// Download model files from HuggingFace Hub
fn download_model_files() -> Result<(PathBuf, PathBuf, PathBuf)> {
    let api =
        Api::new().map_err(|e| SearchError::Embedding(format!("failed to create HF API: {e}")))?;
    let repo = Repo::with_revision(MODEL_ID.to_string(), RepoType::Model, "main".to_string());
    let api_repo = api.repo(repo);

    let config = api_repo
        .get("config.json")
        .map_err(|e| SearchError::Embedding(format!("failed to download config.json: {e}")))?;
    let tokenizer = api_repo
        .get("tokenizer.json")
        .map_err(|e| SearchError::Embedding(format!("failed to download tokenizer.json: {e}")))?;
    let weights = api_repo
        .get("model.safetensors")
        .map_err(|e| SearchError::Embedding(format!("failed to download model.safetensors: {e}")))?;

    Ok((config, tokenizer, weights))
}

/// Load the sentence-embedding model
fn load_model(device: &Device) -> Result<LoadedModel> {
    info!("loading embedding model ({MODEL_ID})...");

    let (config_path, tokenizer_path, weights_path) = download_model_files()?;

    let config_str = std::fs::read_to_string(&config_path)
        .map_err(|e| SearchError::Embedding(format!("failed to read config: {e}")))?;
    let config: BertConfig = serde_json::from_str(&config_str)
        .map_err(|e| SearchError::Embedding(format!("failed to parse config: {e}")))?;

    let tokenizer = Tokenizer::from_file(&tokenizer_path)
        .map_err(|e| SearchError::Embedding(format!("failed to load tokenizer: {e}")))?;

    let vb = unsafe {
        VarBuilder::from_mmaped_safetensors(&[weights_path], DTYPE, device)
            .map_err(|e| SearchError::Embedding(format!("failed to load weights: {e}")))?
    };

    let model = BertModel::load(vb, &config)
        .map_err(|e| SearchError::Embedding(format!("failed to create model: {e}")))?;

    info!("embedding model loaded (dim={EMBEDDING_DIM})");

    Ok(LoadedModel {
        model,
        tokenizer,
        device: device.clone(),
    })
}

/// L2 normalize embeddings
fn normalize_l2(v: &Tensor) -> Result<Tensor> {
    v.broadcast_div(&v.sqr()?.sum_keepdim(1)?.sqrt()?)
        .map_err(|e| SearchError::Embedding(format!("L2 normalization failed: {e}")))
}

/// Mean pooling with attention mask
fn mean_pool(embeddings: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
    let attention_mask_expanded = attention_mask.to_dtype(DType::F32)?.unsqueeze(2)?;

    let sum_mask = attention_mask_expanded.sum(1)?;
    let masked_embeddings = embeddings.broadcast_mul(&attention_mask_expanded)?;
    let summed = masked_embeddings.sum(1)?;

    summed
        .broadcast_div(&sum_mask)
        .map_err(|e| SearchError::Embedding(format!("mean pooling failed: {e}")))
}

/// Encode texts with the loaded model
fn encode_with_model(
    model: &BertModel,
    tokenizer: &Tokenizer,
    device: &Device,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    let mut tokenizer = tokenizer.clone();
    let padding = PaddingParams {
        strategy: PaddingStrategy::BatchLongest,
        ..Default::default()
    };
    tokenizer.with_padding(Some(padding));

    let inputs: Vec<&str> = texts.iter().map(String::as_str).collect();
    let encodings = tokenizer
        .encode_batch(inputs, true)
        .map_err(|e| SearchError::Embedding(format!("tokenization failed: {e}")))?;

    let token_ids: Vec<Tensor> = encodings
        .iter()
        .map(|enc| Tensor::new(enc.get_ids(), device))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| SearchError::Embedding(format!("failed to create token tensor: {e}")))?;

    let attention_masks: Vec<Tensor> = encodings
        .iter()
        .map(|enc| Tensor::new(enc.get_attention_mask(), device))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| SearchError::Embedding(format!("failed to create attention mask: {e}")))?;

    let token_ids = Tensor::stack(&token_ids, 0)
        .map_err(|e| SearchError::Embedding(format!("failed to stack tokens: {e}")))?;
    let attention_mask = Tensor::stack(&attention_masks, 0)
        .map_err(|e| SearchError::Embedding(format!("failed to stack masks: {e}")))?;
    let token_type_ids = token_ids
        .zeros_like()
        .map_err(|e| SearchError::Embedding(format!("failed to create type ids: {e}")))?;

    let embeddings = model
        .forward(&token_ids, &token_type_ids, Some(&attention_mask))
        .map_err(|e| SearchError::Embedding(format!("forward pass failed: {e}")))?;

    let pooled = mean_pool(&embeddings, &attention_mask)?;
    let normalized = normalize_l2(&pooled)?;

    let result: Vec<Vec<f32>> = (0..normalized.dim(0)?)
        .map(|i| normalized.get(i)?.to_vec1::<f32>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| SearchError::Embedding(format!("failed to convert embeddings: {e}")))?;

    Ok(result)
}
