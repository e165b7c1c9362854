//! Two-pass capacity resolution.
//!
//! The context a model was trained with is only known after it is loaded, so
//! building a session takes two loads:
//!
//! 1. **Probe**: a throwaway model+context with a 512-token context and batch,
//!    no GPU offload and no memory mapping. Only `n_ctx_train` is kept, and
//!    only a failed model load fails the probe.
//! 2. **Build**: the real model+context with `n_ctx_train` as context, batch
//!    and micro-batch size, producing an immutable [`SessionConfig`].
//!
//! Either pass failing leaves nothing behind.

use llembed_core::{
    Backend, InitError, LoadError, LoadParams, LoadTarget, ModelSource, SessionConfig,
};
use tracing::{debug, info, warn};

use crate::session::EmbeddingSession;
use crate::staging::StagingArea;

/// Text embedded by the post-build verification.
pub const VERIFY_TEXT: &str = "test";

/// Resolve a source against the staging area and the backend's capabilities.
pub fn resolve_target<'a>(
    source: &'a ModelSource,
    staging: Option<&'a StagingArea>,
    backend: &dyn Backend,
) -> Result<LoadTarget<'a>, InitError> {
    match source {
        ModelSource::Path(path) => Ok(LoadTarget::File(path.as_path())),
        ModelSource::Memory => {
            let bytes = staging
                .and_then(StagingArea::bytes)
                .ok_or(InitError::MemorySourceUnset)?;
            if !backend.supports_memory_source() {
                return Err(InitError::MemorySourceUnsupported {
                    backend: backend.name().to_string(),
                });
            }
            Ok(LoadTarget::Memory(bytes))
        }
    }
}

/// First pass: load with minimal parameters and report the trained context.
///
/// The temporary model and context are released before returning. A probe
/// context that cannot be created is not an error since the model has already
/// reported its trained context.
pub fn probe(
    backend: &dyn Backend,
    target: LoadTarget<'_>,
    n_threads: i32,
) -> Result<u32, InitError> {
    let params = LoadParams::probe(n_threads);
    debug!("Probing capacity with {params:?}");

    let n_ctx_train = match backend.load(target, &params) {
        Ok(model) => model.n_ctx_train(),
        Err(LoadError::Context {
            message,
            n_ctx_train,
        }) => {
            warn!("Probe context creation failed ({message}); continuing with the model's metadata");
            n_ctx_train
        }
        Err(e @ LoadError::Model(_)) => return Err(InitError::ProbeLoad(e.to_string())),
    };

    if n_ctx_train == 0 {
        warn!("Model reports a trained context of 0 tokens; passing it through");
    }
    info!("Model trained context: {n_ctx_train} tokens");
    Ok(n_ctx_train)
}

/// Builds an [`EmbeddingSession`] through the probe-then-build sequence.
#[derive(Debug, Clone)]
pub struct SessionBuilder {
    source: ModelSource,
    n_threads: i32,
    verify: bool,
}

impl SessionBuilder {
    /// Start a builder for `source` with one thread and no verification.
    #[must_use]
    pub fn new(source: impl Into<ModelSource>) -> Self {
        Self {
            source: source.into(),
            n_threads: 1,
            verify: false,
        }
    }

    /// Threads for evaluation; values below one are coerced to one.
    #[must_use]
    pub fn threads(mut self, n_threads: i32) -> Self {
        self.n_threads = n_threads;
        self
    }

    /// Embed a short text after building and fail if that does not work.
    #[must_use]
    pub fn verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    /// Build from a filesystem source.
    pub fn build(self, backend: Box<dyn Backend>) -> Result<EmbeddingSession, InitError> {
        self.build_with_staging(backend, None)
    }

    /// Build, resolving the `memory:` source against `staging`.
    pub fn build_with_staging(
        self,
        backend: Box<dyn Backend>,
        staging: Option<&StagingArea>,
    ) -> Result<EmbeddingSession, InitError> {
        info!(
            "Building session for {} on the {} backend",
            self.source,
            backend.name()
        );

        let target = resolve_target(&self.source, staging, backend.as_ref())?;
        let prepared = backend
            .prepare(target)
            .map_err(|e| InitError::ProbeLoad(e.to_string()))?;
        let target = prepared.target();
        let n_ctx_train = probe(backend.as_ref(), target, self.n_threads)?;

        let config = SessionConfig::from_capacity(self.source.clone(), self.n_threads, n_ctx_train);
        let params = config.load_params();
        debug!("Building with {params:?}");

        let model = backend.load(target, &params).map_err(|e| match e {
            LoadError::Model(msg) => InitError::ModelLoad(msg),
            LoadError::Context { message, .. } => InitError::ContextCreate(message),
        })?;
        drop(prepared);

        let mut session = EmbeddingSession::new(model, backend, config);
        info!(
            "Session ready: dimension={}, context={}",
            session.dimension(),
            session.config().n_ctx
        );

        if self.verify {
            session
                .embed(VERIFY_TEXT)
                .map_err(InitError::Verification)?;
            debug!("Verification embedding succeeded");
        }

        Ok(session)
    }
}
