//! Per-model token counters.
//!
//! Counting rules, in order:
//! 1. Model names starting with `gpt` use the OpenAI BPE for that model
//!    (embedded vocabularies, no network needed).
//! 2. Any other name is treated as a HuggingFace Hub repo and its
//!    `tokenizer.json` is fetched.
//! 3. When the hub load fails, a BERT-base tokenizer is used instead and a
//!    warning logged; if even that is unreachable the embedded `cl100k`
//!    vocabulary keeps counting working offline.
//!
//! Counters are cached per model name. The registry also carries the
//! process-wide default model, but callers that know the request's model
//! should pass it explicitly so concurrent requests with different models
//! do not race on the default.

use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use hf_hub::{api::sync::Api, Repo, RepoType};
use once_cell::sync::OnceCell;
use tiktoken_rs::{cl100k_base, get_bpe_from_model, CoreBPE};
use tokenizers::Tokenizer;
use tracing::{debug, warn};

/// Default tokenizer model
pub const DEFAULT_TOKENIZER_MODEL: &str = "gpt-3.5-turbo";

/// Hub tokenizer used when the requested model cannot be loaded
const FALLBACK_MODEL: &str = "bert-base-uncased";

/// A token counter for one model.
pub enum TokenCounter {
    /// OpenAI BPE encoding
    OpenAi(Arc<CoreBPE>),
    /// HuggingFace tokenizer
    Hub(Box<Tokenizer>),
}

impl TokenCounter {
    /// Number of tokens in `text`.
    ///
    /// Special tokens are not added, so the empty string always counts 0.
    pub fn count(&self, text: &str) -> usize {
        match self {
            TokenCounter::OpenAi(bpe) => bpe.encode_ordinary(text).len(),
            TokenCounter::Hub(tokenizer) => match tokenizer.encode(text, false) {
                Ok(encoding) => encoding.get_ids().len(),
                Err(e) => {
                    warn!("tokenization failed, counting as empty: {e}");
                    0
                }
            },
        }
    }
}

/// Cache of token counters keyed by model name.
pub struct TokenizerRegistry {
    cache: DashMap<String, Arc<TokenCounter>>,
    selected: RwLock<String>,
}

impl Default for TokenizerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenizerRegistry {
    /// Create a registry with the default model selected.
    pub fn new() -> Self {
        Self {
            cache: DashMap::new(),
            selected: RwLock::new(DEFAULT_TOKENIZER_MODEL.to_string()),
        }
    }

    /// Set the process-wide default model. Selecting the current model is a
    /// no-op.
    pub fn select(&self, model: &str) {
        let mut selected = match self.selected.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *selected != model {
            debug!("tokenizer model selected: {model}");
            *selected = model.to_string();
        }
    }

    /// Currently selected default model.
    pub fn selected_model(&self) -> String {
        match self.selected.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Counter for the currently selected default model.
    pub fn current(&self) -> Arc<TokenCounter> {
        self.counter_for(&self.selected_model())
    }

    /// Counter for `model`, loading and caching it on first use.
    ///
    /// Never fails: unknown models degrade through the fallback chain.
    pub fn counter_for(&self, model: &str) -> Arc<TokenCounter> {
        if let Some(counter) = self.cache.get(model) {
            return Arc::clone(counter.value());
        }

        let counter = Arc::new(load_counter(model));
        self.cache.insert(model.to_string(), Arc::clone(&counter));
        counter
    }
}

/// Load a counter for `model` following the fallback chain.
fn load_counter(model: &str) -> TokenCounter {
    if model.starts_with("gpt") {
        match get_bpe_from_model(model) {
            Ok(bpe) => return TokenCounter::OpenAi(Arc::new(bpe)),
            Err(e) => {
                warn!("no OpenAI encoding for '{model}', using cl100k: {e}");
                return cl100k_counter();
            }
        }
    }

    match load_hub_tokenizer(model) {
        Ok(tokenizer) => TokenCounter::Hub(Box::new(tokenizer)),
        Err(e) => {
            warn!("failed to load tokenizer '{model}', falling back to {FALLBACK_MODEL}: {e}");
            match load_hub_tokenizer(FALLBACK_MODEL) {
                Ok(tokenizer) => TokenCounter::Hub(Box::new(tokenizer)),
                Err(e) => {
                    warn!("failed to load fallback tokenizer, using cl100k: {e}");
                    cl100k_counter()
                }
            }
        }
    }
}

/// Fetch a `tokenizer.json` from the HuggingFace Hub.
fn load_hub_tokenizer(model: &str) -> std::result::Result<Tokenizer, String> {
    let api = Api::new().map_err(|e| e.to_string())?;
    let repo = Repo::with_revision(model.to_string(), RepoType::Model, "main".to_string());
    let path = api.repo(repo).get("tokenizer.json").map_err(|e| e.to_string())?;
    Tokenizer::from_file(&path).map_err(|e| e.to_string())
}

/// The embedded cl100k encoding, shared across fallbacks.
fn cl100k_counter() -> TokenCounter {
    static CL100K: OnceCell<Arc<CoreBPE>> = OnceCell::new();
    let bpe = CL100K
        .get_or_init(|| Arc::new(cl100k_base().expect("failed to initialize cl100k tokenizer")));
    TokenCounter::OpenAi(Arc::clone(bpe))
}
