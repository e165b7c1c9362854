//! BERT-family embedding backend using Candle.
//!
//! A model source is either a local directory holding `config.json`,
//! `tokenizer.json` and `model.safetensors`, or `hf:<repo>` which downloads
//! those three files from the Hugging Face Hub into the local cache.
//!
//! BERT encoders keep no key-value state between evaluations, so clearing
//! memory only discards the last pooled vector. Pooling is always mean over
//! the evaluated tokens; the trained context is `max_position_embeddings`.

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config};
use hf_hub::api::sync::Api;
use llembed_core::{
    Backend, EmbedError, LoadError, LoadParams, LoadTarget, ModelSession, PoolingType, Token,
    TokenBatch,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokenizers::Tokenizer;
use tracing::{debug, info};

/// Prefix marking a Hugging Face Hub repository source.
pub const HF_PREFIX: &str = "hf:";

const CONFIG_FILE: &str = "config.json";
const TOKENIZER_FILE: &str = "tokenizer.json";
const WEIGHTS_FILE: &str = "model.safetensors";

/// Backend running BERT encoders on the CPU with Candle.
#[derive(Debug)]
pub struct CandleBackend {
    device: Device,
}

impl CandleBackend {
    /// Create a CPU backend.
    #[must_use]
    pub fn new() -> Self {
        Self {
            device: Device::Cpu,
        }
    }
}

impl Default for CandleBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Subset of the BERT config needed for capacity and width.
#[derive(Debug, Deserialize)]
struct Dimensions {
    hidden_size: usize,
    max_position_embeddings: usize,
}

/// Local paths of the three files making up a model.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ModelFiles {
    config: PathBuf,
    tokenizer: PathBuf,
    weights: PathBuf,
}

impl ModelFiles {
    fn resolve(source: &Path) -> Result<Self, LoadError> {
        match source.to_str().and_then(|s| s.strip_prefix(HF_PREFIX)) {
            Some(repo) => Self::download(repo),
            None => Self::in_directory(source),
        }
    }

    fn in_directory(source: &Path) -> Result<Self, LoadError> {
        // A path to the weights file itself names its directory
        let dir = if source.is_file() {
            source.parent().unwrap_or(Path::new("."))
        } else {
            source
        };

        let files = Self {
            config: dir.join(CONFIG_FILE),
            tokenizer: dir.join(TOKENIZER_FILE),
            weights: dir.join(WEIGHTS_FILE),
        };
        for path in [&files.config, &files.tokenizer, &files.weights] {
            if !path.is_file() {
                return Err(LoadError::Model(format!(
                    "missing model file: {}",
                    path.display()
                )));
            }
        }
        Ok(files)
    }

    fn download(repo: &str) -> Result<Self, LoadError> {
        if repo.is_empty() {
            return Err(LoadError::Model("empty Hugging Face repository id".to_string()));
        }
        info!("Fetching {repo} from the Hugging Face Hub");

        let api = Api::new()
            .map_err(|e| LoadError::Model(format!("Failed to create HF API: {e}")))?;
        let repo = api.model(repo.to_string());

        let get = |name: &str| {
            debug!("Downloading {name}...");
            repo.get(name)
                .map_err(|e| LoadError::Model(format!("Failed to download {name}: {e}")))
        };

        Ok(Self {
            config: get(CONFIG_FILE)?,
            tokenizer: get(TOKENIZER_FILE)?,
            weights: get(WEIGHTS_FILE)?,
        })
    }
}

impl Backend for CandleBackend {
    fn name(&self) -> &str {
        "candle"
    }

    fn load(
        &self,
        target: LoadTarget<'_>,
        params: &LoadParams,
    ) -> Result<Box<dyn ModelSession>, LoadError> {
        let LoadTarget::File(source) = target else {
            return Err(LoadError::Model(
                "candle backend cannot load models from memory".to_string(),
            ));
        };

        let files = ModelFiles::resolve(source)?;

        debug!("Loading tokenizer...");
        let mut tokenizer = Tokenizer::from_file(&files.tokenizer)
            .map_err(|e| LoadError::Model(format!("Failed to load tokenizer: {e}")))?;
        // Truncation happens in the pipeline, against the context capacity
        tokenizer
            .with_truncation(None)
            .map_err(|e| LoadError::Model(format!("Failed to configure tokenizer: {e}")))?;
        tokenizer.with_padding(None);

        debug!("Loading config...");
        let config_str = std::fs::read_to_string(&files.config)
            .map_err(|e| LoadError::Model(format!("Failed to read config: {e}")))?;
        let config: Config = serde_json::from_str(&config_str)
            .map_err(|e| LoadError::Model(format!("Failed to parse config: {e}")))?;
        let dims: Dimensions = serde_json::from_str(&config_str)
            .map_err(|e| LoadError::Model(format!("Failed to parse config: {e}")))?;

        debug!("Loading model weights (mmap={})...", params.use_mmap);
        let vb = if params.use_mmap {
            // SAFETY: the weights file is opened read-only and must not be
            // modified while the model is alive.
            #[allow(unsafe_code)]
            unsafe {
                VarBuilder::from_mmaped_safetensors(&[&files.weights], DType::F32, &self.device)
                    .map_err(|e| LoadError::Model(format!("Failed to load weights: {e}")))?
            }
        } else {
            let data = std::fs::read(&files.weights)
                .map_err(|e| LoadError::Model(format!("Failed to read weights: {e}")))?;
            VarBuilder::from_buffered_safetensors(data, DType::F32, &self.device)
                .map_err(|e| LoadError::Model(format!("Failed to load weights: {e}")))?
        };

        let n_ctx_train = u32::try_from(dims.max_position_embeddings).unwrap_or(u32::MAX);
        let model = BertModel::load(vb, &config).map_err(|e| LoadError::Context {
            message: format!("Failed to create BERT model: {e}"),
            n_ctx_train,
        })?;

        let n_ctx = params.n_ctx.min(n_ctx_train);
        if n_ctx < params.n_ctx {
            debug!(
                "Requested context {} exceeds position embeddings; using {n_ctx}",
                params.n_ctx
            );
        }
        debug!(
            "Candle schedules its own threads; requested {} ignored",
            params.n_threads
        );

        info!(
            "Candle model loaded: dimensions={}, trained_context={n_ctx_train}",
            dims.hidden_size
        );

        Ok(Box::new(CandleSession {
            model,
            tokenizer,
            device: self.device.clone(),
            n_ctx_train,
            n_ctx,
            n_embd: dims.hidden_size,
            pooled: None,
        }))
    }
}

struct CandleSession {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    n_ctx_train: u32,
    n_ctx: u32,
    n_embd: usize,
    pooled: Option<Vec<f32>>,
}

impl CandleSession {
    fn forward(&self, ids: Vec<u32>) -> candle_core::Result<Vec<f32>> {
        let input_ids = Tensor::new(ids.as_slice(), &self.device)?.unsqueeze(0)?;
        let token_type_ids = input_ids.zeros_like()?;
        let attention_mask = input_ids.ones_like()?;

        let output = self
            .model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))?;

        // Every position is attended, so the masked mean is a plain mean
        output.mean(1)?.squeeze(0)?.to_vec1::<f32>()
    }
}

impl ModelSession for CandleSession {
    fn n_ctx_train(&self) -> u32 {
        self.n_ctx_train
    }

    fn n_embd(&self) -> usize {
        self.n_embd
    }

    fn n_ctx(&self) -> u32 {
        self.n_ctx
    }

    fn pooling_type(&self) -> PoolingType {
        PoolingType::Mean
    }

    fn tokenize(
        &self,
        text: &str,
        add_bos: bool,
        _special: bool,
    ) -> Result<Vec<Token>, EmbedError> {
        let encoding = self
            .tokenizer
            .encode(text, add_bos)
            .map_err(|e| EmbedError::Tokenize(format!("Tokenization failed: {e}")))?;

        encoding
            .get_ids()
            .iter()
            .map(|&id| {
                Token::try_from(id)
                    .map_err(|_| EmbedError::Tokenize(format!("token id {id} out of range")))
            })
            .collect()
    }

    fn clear_memory(&mut self) {
        self.pooled = None;
    }

    fn decode(&mut self, batch: &TokenBatch) -> Result<(), EmbedError> {
        if batch.is_empty() {
            return Err(EmbedError::Decode("empty batch".to_string()));
        }
        if batch.len() > self.n_ctx as usize {
            return Err(EmbedError::Decode(format!(
                "{} tokens exceed context of {}",
                batch.len(),
                self.n_ctx
            )));
        }

        let ids = batch
            .tokens()
            .map(|t| {
                u32::try_from(t).map_err(|_| EmbedError::Decode(format!("invalid token {t}")))
            })
            .collect::<Result<Vec<u32>, _>>()?;

        let pooled = self
            .forward(ids)
            .map_err(|e| EmbedError::Decode(format!("Model forward failed: {e}")))?;
        self.pooled = Some(pooled);
        Ok(())
    }

    fn sequence_embedding(&self, seq_id: i32) -> Option<&[f32]> {
        if seq_id == 0 {
            self.pooled.as_deref()
        } else {
            None
        }
    }
}
