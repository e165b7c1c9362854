//! Core data types for llembed.
//!
//! This module contains the data structures shared by the engine, the C
//! boundary and the CLI:
//!
//! ## Sources
//! - [`ModelSource`]: Where model weights come from (filesystem path or staged memory)
//! - [`LoadTarget`]: A resolved source handed to a backend
//! - [`PreparedTarget`]: A target readied once per build
//!
//! ## Configuration
//! - [`LoadParams`]: Parameters for one model+context load
//! - [`SessionConfig`]: Immutable configuration of a built session
//! - [`Normalization`]: Normalization applied to pooled vectors
//!
//! ## Inference
//! - [`PoolingType`]: Pooling strategy reported by a context
//! - [`TokenBatch`]: Tokens submitted to one forward evaluation
//! - [`Embedding`]: The caller-owned result of one embedding call

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::EmbedError;

/// Reserved source string meaning "load from the staged memory buffer".
pub const MEMORY_SOURCE: &str = "memory:";

/// Context and batch size used by the capacity probe.
pub const PROBE_CONTEXT_SIZE: u32 = 512;

/// Token identifier in the model vocabulary.
pub type Token = i32;

// ============================================================================
// Sources
// ============================================================================

/// Where model weights are loaded from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelSource {
    /// A filesystem path (or a backend-specific locator such as `hf:<repo>`)
    Path(PathBuf),
    /// The buffer staged by the memory preloader
    Memory,
}

impl ModelSource {
    /// Parse a source string, recognising the [`MEMORY_SOURCE`] sentinel.
    #[must_use]
    pub fn parse(source: &str) -> Self {
        if source == MEMORY_SOURCE {
            Self::Memory
        } else {
            Self::Path(PathBuf::from(source))
        }
    }

    /// Whether this source refers to the staged memory buffer.
    #[must_use]
    pub fn is_memory(&self) -> bool {
        matches!(self, Self::Memory)
    }
}

impl fmt::Display for ModelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => write!(f, "{}", path.display()),
            Self::Memory => f.write_str(MEMORY_SOURCE),
        }
    }
}

impl From<&str> for ModelSource {
    fn from(source: &str) -> Self {
        Self::parse(source)
    }
}

/// A source resolved against the staging area, borrowed for one load.
#[derive(Debug, Clone, Copy)]
pub enum LoadTarget<'a> {
    /// Load from a file or backend-specific locator
    File(&'a Path),
    /// Load from staged bytes
    Memory(&'a [u8]),
}

/// A load target readied once for the probe and build passes of one session.
///
/// Backends that cannot read staged bytes directly park them in a file and
/// keep it alive through `guard`; the file goes away when this is dropped.
pub enum PreparedTarget<'a> {
    /// Loaded as resolved
    Direct(LoadTarget<'a>),
    /// Loaded from `path`, which lives as long as `guard`
    Spilled {
        path: PathBuf,
        guard: Box<dyn Send>,
    },
}

impl PreparedTarget<'_> {
    /// The target to hand to [`crate::Backend::load`].
    #[must_use]
    pub fn target(&self) -> LoadTarget<'_> {
        match self {
            Self::Direct(target) => *target,
            Self::Spilled { path, .. } => LoadTarget::File(path),
        }
    }
}

impl fmt::Debug for PreparedTarget<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct(target) => f.debug_tuple("Direct").field(target).finish(),
            Self::Spilled { path, .. } => f.debug_struct("Spilled").field("path", path).finish(),
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Normalization applied to the pooled vector.
///
/// Only the Euclidean mode is supported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Normalization {
    /// Divide by the L2 norm (mode 2)
    #[default]
    Euclidean,
}

impl Normalization {
    /// Numeric mode as understood by llama.cpp's `embd_normalize`.
    #[must_use]
    pub fn mode(self) -> i32 {
        match self {
            Self::Euclidean => 2,
        }
    }
}

/// Parameters for loading one model and creating its context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadParams {
    /// Context size in tokens
    pub n_ctx: u32,
    /// Logical batch size
    pub n_batch: u32,
    /// Physical micro-batch size
    pub n_ubatch: u32,
    /// Threads for evaluation
    pub n_threads: i32,
    /// Layers offloaded to the GPU
    pub n_gpu_layers: u32,
    /// Memory-map the weights file
    pub use_mmap: bool,
    /// Enable embedding extraction
    pub embeddings: bool,
}

impl LoadParams {
    /// Minimal footprint parameters for the capacity probe.
    #[must_use]
    pub fn probe(n_threads: i32) -> Self {
        Self {
            n_ctx: PROBE_CONTEXT_SIZE,
            n_batch: PROBE_CONTEXT_SIZE,
            n_ubatch: PROBE_CONTEXT_SIZE,
            n_threads: coerce_threads(n_threads),
            n_gpu_layers: 0,
            use_mmap: false,
            embeddings: true,
        }
    }
}

/// Coerce a requested thread count to at least one.
#[must_use]
pub fn coerce_threads(n_threads: i32) -> i32 {
    n_threads.max(1)
}

/// Immutable configuration of a built session.
///
/// `n_batch` and `n_ubatch` always equal `n_ctx`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Model source descriptor
    pub source: ModelSource,
    /// Threads for evaluation (>= 1)
    pub n_threads: i32,
    /// Context length, taken from the model's trained context
    pub n_ctx: u32,
    /// Batch length
    pub n_batch: u32,
    /// Micro-batch length
    pub n_ubatch: u32,
    /// Normalization applied to pooled vectors
    pub normalization: Normalization,
    /// Layers offloaded to the GPU
    pub n_gpu_layers: u32,
    /// Memory-map the weights file
    pub use_mmap: bool,
}

impl SessionConfig {
    /// Build the final configuration from a probed trained context length.
    #[must_use]
    pub fn from_capacity(source: ModelSource, n_threads: i32, n_ctx_train: u32) -> Self {
        Self {
            source,
            n_threads: coerce_threads(n_threads),
            n_ctx: n_ctx_train,
            n_batch: n_ctx_train,
            n_ubatch: n_ctx_train,
            normalization: Normalization::Euclidean,
            n_gpu_layers: 0,
            use_mmap: false,
        }
    }

    /// Load parameters for the second-pass build.
    #[must_use]
    pub fn load_params(&self) -> LoadParams {
        LoadParams {
            n_ctx: self.n_ctx,
            n_batch: self.n_batch,
            n_ubatch: self.n_ubatch,
            n_threads: self.n_threads,
            n_gpu_layers: self.n_gpu_layers,
            use_mmap: self.use_mmap,
            embeddings: true,
        }
    }
}

// ============================================================================
// Inference
// ============================================================================

/// Pooling strategy of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolingType {
    /// Not reported; the runtime decides
    Unspecified,
    /// No pooling: only per-token outputs exist
    None,
    Mean,
    Cls,
    Last,
    Rank,
}

impl PoolingType {
    /// Map llama.cpp's numeric pooling type.
    #[must_use]
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            0 => Self::None,
            1 => Self::Mean,
            2 => Self::Cls,
            3 => Self::Last,
            4 => Self::Rank,
            _ => Self::Unspecified,
        }
    }
}

/// One token slot in a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchEntry {
    pub token: Token,
    pub pos: i32,
    pub seq_id: i32,
    /// Request output extraction for this position
    pub output: bool,
}

/// Tokens submitted to one forward evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenBatch {
    entries: Vec<BatchEntry>,
}

impl TokenBatch {
    /// Single-sequence batch with every position marked for output.
    ///
    /// Pooling reads all positions, unlike generation where only the last
    /// token needs logits.
    #[must_use]
    pub fn single_sequence(tokens: &[Token], seq_id: i32) -> Self {
        let entries = tokens
            .iter()
            .zip(0_i32..)
            .map(|(&token, pos)| BatchEntry {
                token,
                pos,
                seq_id,
                output: true,
            })
            .collect();
        Self { entries }
    }

    #[must_use]
    pub fn entries(&self) -> &[BatchEntry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Token ids in position order.
    pub fn tokens(&self) -> impl Iterator<Item = Token> + '_ {
        self.entries.iter().map(|e| e.token)
    }
}

/// A caller-owned embedding produced by one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    /// Normalized vector of the model's native width
    pub values: Vec<f32>,
    /// Tokens actually evaluated
    pub token_count: usize,
    /// Token count before truncation, if the input was truncated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncated_from: Option<usize>,
}

impl Embedding {
    /// Number of dimensions.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// Whether the input was truncated to fit the context.
    #[must_use]
    pub fn was_truncated(&self) -> bool {
        self.truncated_from.is_some()
    }

    /// Euclidean norm of the vector.
    #[must_use]
    pub fn norm(&self) -> f32 {
        self.values.iter().map(|v| v * v).sum::<f32>().sqrt()
    }

    /// Euclidean distance to another embedding.
    pub fn euclidean_distance(&self, other: &Self) -> Result<f32, EmbedError> {
        self.check_dimension(other)?;
        Ok(self
            .values
            .iter()
            .zip(&other.values)
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f32>()
            .sqrt())
    }

    /// Cosine similarity to another embedding; zero if either vector is zero.
    pub fn cosine_similarity(&self, other: &Self) -> Result<f32, EmbedError> {
        self.check_dimension(other)?;
        let dot: f32 = self.values.iter().zip(&other.values).map(|(a, b)| a * b).sum();
        let denom = self.norm() * other.norm();
        if denom > 0.0 {
            Ok(dot / denom)
        } else {
            Ok(0.0)
        }
    }

    fn check_dimension(&self, other: &Self) -> Result<(), EmbedError> {
        if self.dimension() == other.dimension() {
            Ok(())
        } else {
            Err(EmbedError::DimensionMismatch {
                left: self.dimension(),
                right: other.dimension(),
            })
        }
    }
}
