//! llama.cpp backend for GGUF models.
//!
//! The llama.cpp runtime may only be initialized once per process, so every
//! [`LlamaCppBackend`] shares one [`LlamaBackend`] handle. The runtime is torn
//! down when the last backend and the last session holding it are dropped.
//!
//! Staged model bytes are written to a temporary file once per build and both
//! passes load from there. The file is unlinked when the build finishes,
//! which only works where open files may be unlinked. Memory sources are
//! therefore reported as supported on unix targets only.

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel};
use llama_cpp_2::token::LlamaToken;
use llama_cpp_2::{send_logs_to_tracing, LogOptions};
use llembed_core::{
    Backend, EmbedError, InitError, LoadError, LoadParams, LoadTarget, ModelSession, PoolingType,
    PreparedTarget, Token, TokenBatch,
};
use parking_lot::Mutex;
use self_cell::self_cell;
use std::io::Write;
use std::num::NonZeroU32;
use std::path::Path;
use std::sync::{Arc, Once, Weak};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

static RUNTIME: Mutex<Weak<LlamaBackend>> = Mutex::new(Weak::new());
static LOG_ROUTING: Once = Once::new();

self_cell! {
    struct ModelCell {
        owner: LlamaModel,
        #[covariant]
        dependent: LlamaContext,
    }
}

/// Backend loading GGUF models through llama.cpp.
pub struct LlamaCppBackend {
    runtime: Arc<LlamaBackend>,
}

impl LlamaCppBackend {
    /// Attach to the process-wide llama.cpp runtime, initializing it if needed.
    ///
    /// With `verbose` set, llama.cpp's own log output is forwarded to
    /// `tracing`; otherwise it is discarded. The choice made by the first call
    /// sticks for the life of the process.
    pub fn acquire(verbose: bool) -> Result<Self, InitError> {
        LOG_ROUTING.call_once(|| {
            send_logs_to_tracing(LogOptions::default().with_logs_enabled(verbose));
        });

        let mut slot = RUNTIME.lock();
        if let Some(runtime) = slot.upgrade() {
            return Ok(Self { runtime });
        }

        let runtime = Arc::new(
            LlamaBackend::init()
                .map_err(|e| InitError::Backend(format!("llama.cpp init failed: {e}")))?,
        );
        *slot = Arc::downgrade(&runtime);
        info!("llama.cpp runtime initialized");
        Ok(Self { runtime })
    }

    fn load_path(&self, path: &Path, params: &LoadParams) -> Result<LlamaSession, LoadError> {
        let model_params = LlamaModelParams::default().with_n_gpu_layers(params.n_gpu_layers);
        if !params.use_mmap {
            debug!("llama-cpp-2 exposes no mmap toggle; weights are mapped by llama.cpp's default");
        }

        let model = LlamaModel::load_from_file(&self.runtime, path, &model_params)
            .map_err(|e| LoadError::Model(format!("{}: {e}", path.display())))?;

        let n_ctx_train = model.n_ctx_train();
        let n_embd = usize::try_from(model.n_embd()).unwrap_or(0);
        let pooling = read_pooling_type(&model);
        debug!("Model metadata: n_ctx_train={n_ctx_train}, n_embd={n_embd}, pooling={pooling:?}");

        let ctx_params = LlamaContextParams::default()
            .with_n_ctx(NonZeroU32::new(params.n_ctx))
            .with_n_batch(params.n_batch)
            .with_n_ubatch(params.n_ubatch)
            .with_n_threads(params.n_threads)
            .with_n_threads_batch(params.n_threads)
            .with_embeddings(params.embeddings);

        // On failure the model is dropped inside try_new
        let runtime = &self.runtime;
        let cell = ModelCell::try_new(model, |m| {
            m.new_context(runtime, ctx_params)
                .map_err(|e| LoadError::Context {
                    message: e.to_string(),
                    n_ctx_train,
                })
        })?;

        Ok(LlamaSession {
            cell,
            _runtime: Arc::clone(&self.runtime),
            n_ctx_train,
            n_embd,
            pooling,
        })
    }
}

impl Backend for LlamaCppBackend {
    fn name(&self) -> &str {
        "llama"
    }

    fn supports_memory_source(&self) -> bool {
        cfg!(unix)
    }

    fn prepare<'a>(&self, target: LoadTarget<'a>) -> Result<PreparedTarget<'a>, LoadError> {
        match target {
            LoadTarget::Memory(bytes) if self.supports_memory_source() => {
                let spill = spill_to_tempfile(bytes)?;
                Ok(PreparedTarget::Spilled {
                    path: spill.path().to_path_buf(),
                    guard: Box::new(spill),
                })
            }
            _ => Ok(PreparedTarget::Direct(target)),
        }
    }

    fn load(
        &self,
        target: LoadTarget<'_>,
        params: &LoadParams,
    ) -> Result<Box<dyn ModelSession>, LoadError> {
        let session = match target {
            LoadTarget::File(path) => self.load_path(path, params)?,
            LoadTarget::Memory(bytes) => {
                if !self.supports_memory_source() {
                    return Err(LoadError::Model(
                        "memory sources are not supported on this platform".to_string(),
                    ));
                }
                let spill = spill_to_tempfile(bytes)?;
                self.load_path(spill.path(), params)?
            }
        };
        Ok(Box::new(session))
    }
}

fn spill_to_tempfile(bytes: &[u8]) -> Result<NamedTempFile, LoadError> {
    let mut file = tempfile::Builder::new()
        .prefix("llembed-")
        .suffix(".gguf")
        .tempfile()
        .map_err(|e| LoadError::Model(format!("failed to create spill file: {e}")))?;
    file.write_all(bytes)
        .and_then(|()| file.flush())
        .map_err(|e| LoadError::Model(format!("failed to write spill file: {e}")))?;
    debug!("Spilled {} staged bytes to {}", bytes.len(), file.path().display());
    Ok(file)
}

/// Pooling type from GGUF metadata; absent means the model does not pool.
fn read_pooling_type(model: &LlamaModel) -> PoolingType {
    let Ok(arch) = model.meta_val_str("general.architecture") else {
        warn!("Model has no general.architecture metadata");
        return PoolingType::None;
    };
    match model.meta_val_str(&format!("{arch}.pooling_type")) {
        Ok(raw) => raw
            .trim()
            .parse::<i32>()
            .map_or(PoolingType::Unspecified, PoolingType::from_raw),
        Err(_) => PoolingType::None,
    }
}

struct LlamaSession {
    // Declared first so the context and model drop before the runtime
    cell: ModelCell,
    _runtime: Arc<LlamaBackend>,
    n_ctx_train: u32,
    n_embd: usize,
    pooling: PoolingType,
}

// SAFETY: the context is reachable only through this session, whose trait
// methods take `&self`/`&mut self`, and sessions are never shared between
// threads (`ModelSession` is `Send` but not `Sync`). llama.cpp contexts may be
// used from any thread as long as calls are not concurrent.
#[allow(unsafe_code)]
unsafe impl Send for LlamaSession {}

impl ModelSession for LlamaSession {
    fn n_ctx_train(&self) -> u32 {
        self.n_ctx_train
    }

    fn n_embd(&self) -> usize {
        self.n_embd
    }

    fn n_ctx(&self) -> u32 {
        self.cell.borrow_dependent().n_ctx()
    }

    fn pooling_type(&self) -> PoolingType {
        self.pooling
    }

    fn tokenize(
        &self,
        text: &str,
        add_bos: bool,
        _special: bool,
    ) -> Result<Vec<Token>, EmbedError> {
        // str_to_token always parses special tokens
        let add_bos = if add_bos {
            AddBos::Always
        } else {
            AddBos::Never
        };
        let tokens = self
            .cell
            .borrow_owner()
            .str_to_token(text, add_bos)
            .map_err(|e| EmbedError::Tokenize(format!("Failed to tokenize text: {e}")))?;
        Ok(tokens.into_iter().map(|t| t.0).collect())
    }

    fn clear_memory(&mut self) {
        self.cell.with_dependent_mut(|_, ctx| ctx.clear_kv_cache());
    }

    fn decode(&mut self, batch: &TokenBatch) -> Result<(), EmbedError> {
        let mut llama_batch = LlamaBatch::new(batch.len(), 1);
        for entry in batch.entries() {
            llama_batch
                .add(
                    LlamaToken::new(entry.token),
                    entry.pos,
                    &[entry.seq_id],
                    entry.output,
                )
                .map_err(|e| EmbedError::Decode(format!("Failed to add token to batch: {e}")))?;
        }

        self.cell.with_dependent_mut(|_, ctx| {
            ctx.decode(&mut llama_batch)
                .map_err(|e| EmbedError::Decode(format!("Failed to decode batch: {e}")))
        })
    }

    fn sequence_embedding(&self, seq_id: i32) -> Option<&[f32]> {
        self.cell.borrow_dependent().embeddings_seq_ith(seq_id).ok()
    }
}
