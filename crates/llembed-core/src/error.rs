//! Error types for llembed.

use thiserror::Error;

/// Errors raised while probing or building a session.
#[derive(Error, Debug)]
pub enum InitError {
    #[error("'memory:' source requested but no buffer has been staged")]
    MemorySourceUnset,

    #[error("backend '{backend}' cannot load models from memory")]
    MemorySourceUnsupported { backend: String },

    #[error("failed to load model for capacity probe: {0}")]
    ProbeLoad(String),

    #[error("failed to load model: {0}")]
    ModelLoad(String),

    #[error("failed to create context: {0}")]
    ContextCreate(String),

    #[error("backend unavailable: {0}")]
    Backend(String),

    #[error("verification embedding failed: {0}")]
    Verification(#[source] EmbedError),
}

/// Errors a backend reports while loading a model and creating its context.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("model load failed: {0}")]
    Model(String),

    /// The model loaded but its context could not be created. The model's
    /// trained context is still reported.
    #[error("context creation failed: {message}")]
    Context { message: String, n_ctx_train: u32 },
}

/// Errors raised by a single embedding call.
///
/// None of these invalidate the session; the next call may succeed.
#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("session is not initialized")]
    NotInitialized,

    #[error("input text is empty")]
    EmptyInput,

    #[error("tokenization produced no tokens")]
    NoTokens,

    #[error("tokenization failed: {0}")]
    Tokenize(String),

    #[error("token count {tokens} exceeds batch capacity {capacity}")]
    BatchOverflow { tokens: usize, capacity: u32 },

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("model has no pooling type; a pooling model is required")]
    NoPooling,

    #[error("failed to allocate {len} floats for the output buffer")]
    Allocation { len: usize },

    #[error("no pooled embedding available for sequence {seq_id}")]
    MissingSequenceEmbedding { seq_id: i32 },

    #[error("dimension mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },
}

/// Errors raised while staging model bytes in memory.
#[derive(Error, Debug)]
pub enum StagingError {
    #[error("failed to allocate {size} bytes for the staged model")]
    Allocation { size: usize },

    #[error("refusing to stage an empty buffer")]
    Empty,
}

impl EmbedError {
    /// Stable numeric code for this error kind, used across the C boundary.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::NotInitialized => 2,
            Self::EmptyInput => 3,
            Self::NoTokens => 4,
            Self::Tokenize(_) => 5,
            Self::BatchOverflow { .. } => 6,
            Self::Decode(_) => 7,
            Self::NoPooling => 8,
            Self::Allocation { .. } => 9,
            Self::MissingSequenceEmbedding { .. } => 10,
            Self::DimensionMismatch { .. } => 11,
        }
    }
}

impl InitError {
    /// Stable numeric code for this error kind, used across the C boundary.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::MemorySourceUnset => 20,
            Self::MemorySourceUnsupported { .. } => 21,
            Self::ProbeLoad(_) => 22,
            Self::ModelLoad(_) => 23,
            Self::ContextCreate(_) => 24,
            Self::Backend(_) => 25,
            Self::Verification(_) => 26,
        }
    }
}

impl StagingError {
    /// Stable numeric code for this error kind, used across the C boundary.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::Allocation { .. } => 30,
            Self::Empty => 31,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ========== InitError Tests ==========

    #[test]
    fn test_init_error_memory_unset_display() {
        let err = InitError::MemorySourceUnset;
        assert!(err.to_string().contains("no buffer has been staged"));
    }

    #[test]
    fn test_init_error_memory_unsupported_display() {
        let err = InitError::MemorySourceUnsupported {
            backend: "candle".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "backend 'candle' cannot load models from memory"
        );
    }

    #[test]
    fn test_init_error_probe_load_display() {
        let err = InitError::ProbeLoad("file not found".to_string());
        assert_eq!(
            err.to_string(),
            "failed to load model for capacity probe: file not found"
        );
    }

    #[test]
    fn test_init_error_verification_source() {
        use std::error::Error as _;

        let err = InitError::Verification(EmbedError::NoPooling);
        assert!(err.to_string().contains("verification"));
        assert!(err.source().is_some());
    }

    // ========== LoadError Tests ==========

    #[test]
    fn test_load_error_display() {
        let err = LoadError::Context {
            message: "n_ctx too large".to_string(),
            n_ctx_train: 8192,
        };
        assert_eq!(err.to_string(), "context creation failed: n_ctx too large");
    }

    // ========== EmbedError Tests ==========

    #[test]
    fn test_embed_error_batch_overflow_display() {
        let err = EmbedError::BatchOverflow {
            tokens: 600,
            capacity: 512,
        };
        assert_eq!(
            err.to_string(),
            "token count 600 exceeds batch capacity 512"
        );
    }

    #[test]
    fn test_embed_error_decode_display() {
        let err = EmbedError::Decode("no kv slot".to_string());
        assert_eq!(err.to_string(), "decode failed: no kv slot");
    }

    #[test]
    fn test_embed_error_codes_are_distinct() {
        let errors = [
            EmbedError::NotInitialized,
            EmbedError::EmptyInput,
            EmbedError::NoTokens,
            EmbedError::Tokenize(String::new()),
            EmbedError::BatchOverflow {
                tokens: 0,
                capacity: 0,
            },
            EmbedError::Decode(String::new()),
            EmbedError::NoPooling,
            EmbedError::Allocation { len: 0 },
            EmbedError::MissingSequenceEmbedding { seq_id: 0 },
            EmbedError::DimensionMismatch { left: 0, right: 0 },
        ];
        let mut codes: Vec<i32> = errors.iter().map(EmbedError::code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
        assert!(codes.iter().all(|&c| c > 1));
    }

    #[test]
    fn test_init_and_staging_codes_do_not_overlap_embed_codes() {
        let init = [
            InitError::MemorySourceUnset.code(),
            InitError::ProbeLoad(String::new()).code(),
            InitError::Verification(EmbedError::NoPooling).code(),
        ];
        let staging = [StagingError::Empty.code(), StagingError::Allocation { size: 1 }.code()];
        for code in init.iter().chain(&staging) {
            assert!(*code >= 20);
        }
        assert!(EmbedError::DimensionMismatch { left: 0, right: 0 }.code() < 20);
    }

    // ========== StagingError Tests ==========

    #[test]
    fn test_staging_error_allocation_display() {
        let err = StagingError::Allocation { size: 1024 };
        assert_eq!(
            err.to_string(),
            "failed to allocate 1024 bytes for the staged model"
        );
    }
}
