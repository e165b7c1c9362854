//! A built embedding session.

use llembed_core::{Backend, EmbedError, Embedding, ModelSession, SessionConfig};
use tracing::info;

use crate::pipeline;

/// A loaded model and context plus the configuration that built them.
///
/// `embed` takes `&mut self` because each call clears and refills the
/// context's key-value memory. Dropping the session releases the context and
/// model, then the backend.
pub struct EmbeddingSession {
    // Field order is drop order: model before the backend that loaded it
    model: Box<dyn ModelSession>,
    backend: Box<dyn Backend>,
    config: SessionConfig,
}

impl EmbeddingSession {
    pub(crate) fn new(
        model: Box<dyn ModelSession>,
        backend: Box<dyn Backend>,
        config: SessionConfig,
    ) -> Self {
        Self {
            model,
            backend,
            config,
        }
    }

    /// Embed one text into a normalized vector of [`Self::dimension`] floats.
    pub fn embed(&mut self, text: &str) -> Result<Embedding, EmbedError> {
        pipeline::embed(self.model.as_mut(), &self.config, text)
    }

    /// Native embedding width of the model.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.model.n_embd()
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    #[must_use]
    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Release the context, the model and the backend, in that order.
    pub fn close(self) {
        let Self {
            model,
            backend,
            config,
        } = self;
        drop(model);
        drop(backend);
        info!("Session for {} released", config.source);
    }
}

impl std::fmt::Debug for EmbeddingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingSession")
            .field("backend", &self.backend.name())
            .field("dimension", &self.dimension())
            .field("config", &self.config)
            .finish()
    }
}
