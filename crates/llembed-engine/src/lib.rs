//! # llembed-engine
//!
//! Turns text into normalized embedding vectors with a pooling-capable model.
//!
//! ## Building a session
//!
//! A model's trained context is only known once it is loaded, so
//! [`SessionBuilder`] loads twice: a 512-token probe to read `n_ctx_train`,
//! then the real model+context sized to it. The resulting
//! [`EmbeddingSession`] is reused for any number of [`EmbeddingSession::embed`]
//! calls without reloading weights.
//!
//! ```rust,ignore
//! use llembed_engine::{backend, SessionBuilder};
//!
//! let mut session = SessionBuilder::new("models/bge-small-en-v1.5-q8_0.gguf")
//!     .threads(4)
//!     .verify(true)
//!     .build(backend::default_backend()?)?;
//!
//! let embedding = session.embed("hello world")?;
//! assert_eq!(embedding.dimension(), session.dimension());
//! ```
//!
//! ## Pipeline
//!
//! Each call tokenizes (with BOS and special tokens), truncates to the context,
//! clears the key-value memory, decodes one single-sequence batch, rejects
//! models without pooling and L2-normalizes the pooled vector of sequence 0.
//!
//! ## In-memory models
//!
//! [`StagingArea`] holds a private copy of model bytes; building from the
//! `memory:` source reads from it when the backend supports that.
//!
//! ## Cargo Features
//!
//! - `candle` (default): BERT-family safetensors models via Candle
//! - `llama`: GGUF models via llama.cpp
//! - With neither: only [`backend::MockBackend`] is available
//!
//! ## Process-wide use
//!
//! [`global`] keeps one session behind a lock with idempotent initialize and
//! shutdown.

pub mod backend;
pub mod capacity;
pub mod global;
pub mod normalize;
pub mod pipeline;
pub mod session;
pub mod staging;

pub use capacity::{probe, resolve_target, SessionBuilder, VERIFY_TEXT};
pub use normalize::normalize_into;
pub use session::EmbeddingSession;
pub use staging::StagingArea;
