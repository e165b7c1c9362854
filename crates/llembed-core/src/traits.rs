//! Backend traits for llembed.
//!
//! This module defines the seam between the embedding pipeline and the
//! tensor runtime that actually parses weights and evaluates tokens:
//!
//! - [`Backend`]: Loads a model and creates its execution context
//! - [`ModelSession`]: A loaded model+context pair driven by the pipeline
//!
//! Backends own the runtime details (llama.cpp, candle, or a test double);
//! everything about capacity, truncation and normalization lives above them.

use crate::error::{EmbedError, LoadError};
use crate::types::{LoadParams, LoadTarget, PoolingType, PreparedTarget, Token, TokenBatch};

// ============================================================================
// Backend
// ============================================================================

/// A runtime capable of loading models.
///
/// Dropping a backend releases any runtime-wide resources it holds, so a
/// session keeps its backend alive for as long as its model.
pub trait Backend: Send {
    /// Short backend identifier.
    fn name(&self) -> &str;

    /// Whether [`LoadTarget::Memory`] is accepted by [`Backend::load`].
    fn supports_memory_source(&self) -> bool {
        false
    }

    /// Ready a target for the loads of one build.
    fn prepare<'a>(&self, target: LoadTarget<'a>) -> Result<PreparedTarget<'a>, LoadError> {
        Ok(PreparedTarget::Direct(target))
    }

    /// Load a model and create its context.
    ///
    /// On a context failure the model is dropped before returning.
    fn load(
        &self,
        target: LoadTarget<'_>,
        params: &LoadParams,
    ) -> Result<Box<dyn ModelSession>, LoadError>;
}

impl<B: Backend + ?Sized> Backend for Box<B> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn supports_memory_source(&self) -> bool {
        (**self).supports_memory_source()
    }

    fn prepare<'a>(&self, target: LoadTarget<'a>) -> Result<PreparedTarget<'a>, LoadError> {
        (**self).prepare(target)
    }

    fn load(
        &self,
        target: LoadTarget<'_>,
        params: &LoadParams,
    ) -> Result<Box<dyn ModelSession>, LoadError> {
        (**self).load(target, params)
    }
}

// ============================================================================
// Model session
// ============================================================================

/// A loaded model together with its execution context.
///
/// Dropping it releases the context first, then the model.
pub trait ModelSession: Send {
    /// Context length the model was trained with.
    fn n_ctx_train(&self) -> u32;

    /// Native embedding width.
    fn n_embd(&self) -> usize;

    /// Token capacity of the execution context.
    fn n_ctx(&self) -> u32;

    /// Pooling strategy configured on the context.
    fn pooling_type(&self) -> PoolingType;

    /// Tokenize text into vocabulary ids.
    fn tokenize(&self, text: &str, add_bos: bool, special: bool)
        -> Result<Vec<Token>, EmbedError>;

    /// Drop all key-value memory held by the context.
    fn clear_memory(&mut self);

    /// Run one forward evaluation over the batch.
    fn decode(&mut self, batch: &TokenBatch) -> Result<(), EmbedError>;

    /// Raw pooled embedding of a sequence from the last evaluation.
    fn sequence_embedding(&self, seq_id: i32) -> Option<&[f32]>;
}
