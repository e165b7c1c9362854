//! Embedding extraction pipeline.
//!
//! One call runs: tokenize → truncate to context → single-sequence batch →
//! clear key-value memory → decode → check pooling → normalize the pooled
//! vector of sequence 0.

use llembed_core::{EmbedError, Embedding, ModelSession, PoolingType, SessionConfig, TokenBatch};
use tracing::{debug, error, warn};

use crate::normalize::normalize_into;

/// Sequence id used for the single sequence in every batch.
pub const SEQUENCE_ID: i32 = 0;

/// Embed `text` with an already built model+context.
///
/// Every failure is local to this call; `model` remains usable.
pub fn embed(
    model: &mut dyn ModelSession,
    config: &SessionConfig,
    text: &str,
) -> Result<Embedding, EmbedError> {
    if text.is_empty() {
        return Err(EmbedError::EmptyInput);
    }

    let mut tokens = model.tokenize(text, true, true)?;
    if tokens.is_empty() {
        debug!("Input produced no tokens");
        return Err(EmbedError::NoTokens);
    }

    let capacity = model.n_ctx() as usize;
    let mut truncated_from = None;
    if tokens.len() > capacity {
        warn!(
            "Input text exceeds maximum context length ({} tokens). Truncating to {} tokens.",
            tokens.len(),
            capacity
        );
        truncated_from = Some(tokens.len());
        tokens.truncate(capacity);
    }

    if tokens.len() > config.n_batch as usize {
        error!(
            "Token count ({}) exceeds batch size ({}) after truncation",
            tokens.len(),
            config.n_batch
        );
        return Err(EmbedError::BatchOverflow {
            tokens: tokens.len(),
            capacity: config.n_batch,
        });
    }

    let batch = TokenBatch::single_sequence(&tokens, SEQUENCE_ID);

    model.clear_memory();

    if let Err(e) = model.decode(&batch) {
        error!("Decode failed: {e}");
        return Err(e);
    }

    if model.pooling_type() == PoolingType::None {
        warn!("Model does not have a pooling type; a pooling model is required");
        return Err(EmbedError::NoPooling);
    }

    let n_embd = model.n_embd();
    let mut output: Vec<f32> = Vec::new();
    if output.try_reserve_exact(n_embd).is_err() {
        error!("Failed to allocate {n_embd} floats for the embedding");
        return Err(EmbedError::Allocation { len: n_embd });
    }
    output.resize(n_embd, 0.0);

    let Some(raw) = model
        .sequence_embedding(SEQUENCE_ID)
        .and_then(|raw| raw.get(..n_embd))
    else {
        error!("Failed to get sequence embeddings");
        return Err(EmbedError::MissingSequenceEmbedding {
            seq_id: SEQUENCE_ID,
        });
    };

    normalize_into(raw, &mut output, config.normalization);

    debug!(
        "Embedded {} tokens into {} dimensions",
        batch.len(),
        output.len()
    );

    Ok(Embedding {
        values: output,
        token_count: batch.len(),
        truncated_from,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use llembed_core::{Backend, LoadParams, LoadTarget, ModelSource};
    use std::path::Path;

    const TEST_DIM: usize = 32;

    fn load(backend: &MockBackend, n_ctx: u32) -> Box<dyn ModelSession> {
        let params = LoadParams {
            n_ctx,
            n_batch: n_ctx,
            n_ubatch: n_ctx,
            ..LoadParams::probe(1)
        };
        backend
            .load(LoadTarget::File(Path::new("mock.gguf")), &params)
            .unwrap()
    }

    fn config(n_ctx: u32) -> SessionConfig {
        SessionConfig::from_capacity(ModelSource::parse("mock.gguf"), 1, n_ctx)
    }

    fn norm(values: &[f32]) -> f32 {
        values.iter().map(|v| v * v).sum::<f32>().sqrt()
    }

    #[test]
    fn test_embed_unit_norm_and_dimension() {
        let backend = MockBackend::new(64, TEST_DIM);
        let mut model = load(&backend, 64);

        let embedding = embed(model.as_mut(), &config(64), "hello world").unwrap();

        assert_eq!(embedding.dimension(), TEST_DIM);
        assert_eq!(embedding.token_count, 3); // BOS + 2 words
        assert!(!embedding.was_truncated());
        assert!((norm(&embedding.values) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_embed_empty_text() {
        let backend = MockBackend::new(64, TEST_DIM);
        let mut model = load(&backend, 64);
        assert!(matches!(
            embed(model.as_mut(), &config(64), ""),
            Err(EmbedError::EmptyInput)
        ));
    }

    #[test]
    fn test_embed_no_tokens() {
        let backend = MockBackend::new(64, TEST_DIM).with_bos(false);
        let mut model = load(&backend, 64);
        assert!(matches!(
            embed(model.as_mut(), &config(64), "   "),
            Err(EmbedError::NoTokens)
        ));
    }

    #[test]
    fn test_embed_truncates_to_context() {
        let backend = MockBackend::new(8, TEST_DIM);
        let mut model = load(&backend, 8);
        let text = "one two three four five six seven eight nine ten eleven twelve";

        let embedding = embed(model.as_mut(), &config(8), text).unwrap();

        assert_eq!(embedding.token_count, 8);
        assert_eq!(embedding.truncated_from, Some(13));
        assert!((norm(&embedding.values) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_truncation_keeps_leading_tokens() {
        let backend = MockBackend::new(4, TEST_DIM);
        let mut model = load(&backend, 4);

        let long = embed(model.as_mut(), &config(4), "a b c d e f g").unwrap();
        let prefix = embed(model.as_mut(), &config(4), "a b c").unwrap();

        assert_eq!(long.values, prefix.values);
    }

    #[test]
    fn test_batch_overflow_is_reported() {
        let backend = MockBackend::new(64, TEST_DIM);
        let mut model = load(&backend, 16);
        let mut cfg = config(16);
        cfg.n_batch = 4;

        let err = embed(model.as_mut(), &cfg, "one two three four five").unwrap_err();
        assert!(matches!(
            err,
            EmbedError::BatchOverflow {
                tokens: 6,
                capacity: 4
            }
        ));

        // The model is still usable
        assert!(embed(model.as_mut(), &cfg, "one two").is_ok());
    }

    #[test]
    fn test_repeated_calls_are_identical() {
        let backend = MockBackend::new(64, TEST_DIM);
        let mut model = load(&backend, 64);

        let first = embed(model.as_mut(), &config(64), "the quick brown fox").unwrap();
        let second = embed(model.as_mut(), &config(64), "the quick brown fox").unwrap();
        assert_eq!(first.values, second.values);
    }

    #[test]
    fn test_memory_cleared_between_calls() {
        let backend = MockBackend::new(16, TEST_DIM);
        let mut model = load(&backend, 16);

        // Without clearing, the second call would overflow the mock's KV memory
        for _ in 0..10 {
            embed(model.as_mut(), &config(16), "five words in this input").unwrap();
        }
    }

    #[test]
    fn test_decode_failure_is_local() {
        let backend = MockBackend::new(64, TEST_DIM);
        let mut model = load(&backend, 64);

        let err = embed(model.as_mut(), &config(64), "boom <fail> boom").unwrap_err();
        assert!(matches!(err, EmbedError::Decode(_)));

        assert!(embed(model.as_mut(), &config(64), "recovered").is_ok());
    }

    #[test]
    fn test_no_pooling_rejected() {
        let backend = MockBackend::new(64, TEST_DIM).with_pooling(PoolingType::None);
        let mut model = load(&backend, 64);
        assert!(matches!(
            embed(model.as_mut(), &config(64), "hello"),
            Err(EmbedError::NoPooling)
        ));
    }

    #[test]
    fn test_missing_sequence_embedding() {
        let backend = MockBackend::new(64, TEST_DIM);
        let mut model = load(&backend, 64);
        assert!(matches!(
            embed(model.as_mut(), &config(64), "hello <missing>"),
            Err(EmbedError::MissingSequenceEmbedding { seq_id: 0 })
        ));
    }

    #[test]
    fn test_zero_vector_passes_through() {
        let backend = MockBackend::new(64, TEST_DIM).with_zero_output();
        let mut model = load(&backend, 64);

        let embedding = embed(model.as_mut(), &config(64), "silence").unwrap();
        assert_eq!(embedding.dimension(), TEST_DIM);
        assert!(embedding.values.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_different_texts_differ() {
        let backend = MockBackend::new(64, TEST_DIM);
        let mut model = load(&backend, 64);

        let a = embed(model.as_mut(), &config(64), "cats").unwrap();
        let b = embed(model.as_mut(), &config(64), "quantum chromodynamics").unwrap();
        assert_ne!(a.values, b.values);
    }
}
