//! # llembed-core
//!
//! Core types and traits for llembed, a local text-embedding primitive built on
//! pooling-capable language models.
//!
//! This crate provides the foundational abstractions used throughout llembed:
//!
//! - **Model sources**: [`ModelSource`] for filesystem paths and the `memory:` sentinel
//! - **Configuration**: [`LoadParams`] and the immutable [`SessionConfig`]
//! - **Inference plumbing**: [`TokenBatch`], [`PoolingType`] and [`Embedding`]
//! - **Backends**: [`Backend`] and [`ModelSession`] traits implemented by runtimes
//!
//! ## Architecture
//!
//! ```text
//! ModelSource ─► Backend::load (probe) ─► SessionConfig ─► Backend::load (final)
//!                                                               │
//!                               text ─► tokenize ─► TokenBatch ─► decode ─► Embedding
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`ModelSource`] | Path or staged-memory source descriptor |
//! | [`SessionConfig`] | Context/batch sizing derived from the model |
//! | [`TokenBatch`] | One-sequence batch submitted to a forward pass |
//! | [`Embedding`] | Normalized, caller-owned embedding vector |
//!
//! ## Feature Flags
//!
//! This crate has no optional features.
//!
//! ## Related Crates
//!
//! - `llembed-engine`: Capacity probing, sessions, pipeline and backends
//! - `llembed-ffi`: C ABI over the process-wide session
//! - `llembed`: Command-line interface

pub mod error;
pub mod traits;
pub mod types;

pub use error::{EmbedError, InitError, LoadError, StagingError};
pub use traits::*;
pub use types::*;
