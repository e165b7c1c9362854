//! Inference backends.
//!
//! | Backend | Feature | Formats | `memory:` source |
//! |---------|---------|---------|------------------|
//! | [`LlamaCppBackend`] | `llama` | GGUF | unix only |
//! | [`CandleBackend`] | `candle` (default) | BERT safetensors directory or `hf:<repo>` | no |
//! | [`MockBackend`] | always | none | configurable |
//!
//! [`default_backend`] prefers llama.cpp when it is compiled in.
//! [`for_source`] lets `auto` send candle-shaped sources to candle instead.

use llembed_core::{Backend, InitError, ModelSource};

pub mod mock;

#[cfg(feature = "candle")]
pub mod candle;
#[cfg(feature = "llama")]
pub mod llama;

pub use mock::{LoadRecord, MockBackend, MockLedger};

#[cfg(feature = "candle")]
pub use self::candle::CandleBackend;
#[cfg(feature = "llama")]
pub use self::llama::LlamaCppBackend;

/// Names accepted by [`by_name`].
pub const BACKEND_NAMES: &[&str] = &["auto", "llama", "candle", "mock"];

/// The preferred backend compiled into this build.
pub fn default_backend() -> Result<Box<dyn Backend>, InitError> {
    by_name("auto", false)
}

/// Select a backend by name.
///
/// `verbose` forwards the runtime's own log output into `tracing` where the
/// backend supports it.
pub fn by_name(name: &str, verbose: bool) -> Result<Box<dyn Backend>, InitError> {
    match name {
        "auto" => auto(verbose),
        "llama" => llama(verbose),
        "candle" => candle(),
        "mock" => Ok(Box::new(MockBackend::new(512, 384))),
        other => Err(InitError::Backend(format!(
            "unknown backend '{other}', expected one of: {}",
            BACKEND_NAMES.join(", ")
        ))),
    }
}

/// Select a backend by name for a particular source.
///
/// With both runtimes compiled in, `auto` sends `hf:` repositories and model
/// directories to candle and everything else to llama.cpp.
pub fn for_source(
    name: &str,
    source: &ModelSource,
    verbose: bool,
) -> Result<Box<dyn Backend>, InitError> {
    #[cfg(feature = "candle")]
    if name == "auto" && prefers_candle(source) {
        return candle();
    }
    #[cfg(not(feature = "candle"))]
    let _ = source;
    by_name(name, verbose)
}

#[cfg(feature = "candle")]
fn prefers_candle(source: &ModelSource) -> bool {
    match source {
        ModelSource::Memory => false,
        ModelSource::Path(path) => {
            path.to_str().is_some_and(|s| s.starts_with(self::candle::HF_PREFIX)) || path.is_dir()
        }
    }
}

fn auto(verbose: bool) -> Result<Box<dyn Backend>, InitError> {
    if cfg!(feature = "llama") {
        llama(verbose)
    } else if cfg!(feature = "candle") {
        candle()
    } else {
        Err(InitError::Backend(
            "no inference backend compiled in; enable the `llama` or `candle` feature".to_string(),
        ))
    }
}

#[cfg(feature = "llama")]
fn llama(verbose: bool) -> Result<Box<dyn Backend>, InitError> {
    Ok(Box::new(LlamaCppBackend::acquire(verbose)?))
}

#[cfg(not(feature = "llama"))]
fn llama(_verbose: bool) -> Result<Box<dyn Backend>, InitError> {
    Err(InitError::Backend(
        "llama.cpp backend not compiled in; enable the `llama` feature".to_string(),
    ))
}

#[cfg(feature = "candle")]
fn candle() -> Result<Box<dyn Backend>, InitError> {
    Ok(Box::new(CandleBackend::new()))
}

#[cfg(not(feature = "candle"))]
fn candle() -> Result<Box<dyn Backend>, InitError> {
    Err(InitError::Backend(
        "candle backend not compiled in; enable the `candle` feature".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_by_name_mock() {
        let backend = by_name("mock", false).unwrap();
        assert_eq!(backend.name(), "mock");
    }

    #[test]
    fn test_by_name_unknown() {
        let err = by_name("onnx", false).err().unwrap();
        assert!(matches!(err, InitError::Backend(_)));
        assert!(err.to_string().contains("onnx"));
    }

    #[cfg(all(feature = "candle", not(feature = "llama")))]
    #[test]
    fn test_auto_prefers_candle_without_llama() {
        let backend = default_backend().unwrap();
        assert_eq!(backend.name(), "candle");
    }

    #[test]
    fn test_for_source_explicit_name_wins() {
        let source = ModelSource::parse("hf:sentence-transformers/all-MiniLM-L6-v2");
        let backend = for_source("mock", &source, false).unwrap();
        assert_eq!(backend.name(), "mock");
    }

    #[cfg(feature = "candle")]
    #[test]
    fn test_for_source_routes_candle_sources() {
        let dir = tempfile::tempdir().unwrap();
        for source in [
            ModelSource::parse("hf:sentence-transformers/all-MiniLM-L6-v2"),
            ModelSource::Path(dir.path().to_path_buf()),
        ] {
            assert_eq!(for_source("auto", &source, false).unwrap().name(), "candle");
        }
    }

    #[cfg(all(feature = "candle", feature = "llama"))]
    #[test]
    fn test_for_source_routes_gguf_to_llama() {
        for source in [ModelSource::parse("model.gguf"), ModelSource::Memory] {
            assert_eq!(for_source("auto", &source, false).unwrap().name(), "llama");
        }
    }

    #[cfg(not(feature = "llama"))]
    #[test]
    fn test_llama_unavailable_without_feature() {
        assert!(matches!(
            by_name("llama", false),
            Err(InitError::Backend(_))
        ));
    }
}
