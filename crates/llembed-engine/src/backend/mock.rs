//! Deterministic in-process backend for testing without model files.
//!
//! [`MockBackend`] behaves like a small pooling model:
//! - whitespace tokenization with blake3-derived token ids and an optional BOS token
//! - per-token vectors derived from blake3 output, mean-pooled per decode
//! - a key-value memory that accumulates until cleared and overflows past `n_ctx`
//!
//! With special-token parsing enabled, the words `<fail>` and `<missing>` make
//! the next decode fail or produce no pooled output. A [`MockLedger`] records
//! every load so tests can inspect the parameters of each pass.

use llembed_core::{
    Backend, EmbedError, LoadError, LoadParams, LoadTarget, ModelSession, PoolingType,
    PreparedTarget, Token, TokenBatch,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

const BOS_TOKEN: Token = 1;
const FAIL_TOKEN: Token = 2;
const MISSING_TOKEN: Token = 3;
const FIRST_WORD_TOKEN: u32 = 100;
const VOCAB_SIZE: u32 = 30_000;

/// One recorded call to [`Backend::load`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRecord {
    pub params: LoadParams,
    /// Length of the staged buffer for memory loads
    pub memory_len: Option<usize>,
}

/// Shared record of what a [`MockBackend`] was asked to do.
#[derive(Debug, Default)]
pub struct MockLedger {
    loads: Mutex<Vec<LoadRecord>>,
    prepares: AtomicUsize,
    live_sessions: AtomicUsize,
    released: AtomicBool,
}

impl MockLedger {
    /// All loads in call order.
    pub fn loads(&self) -> Vec<LoadRecord> {
        self.loads.lock().clone()
    }

    /// Calls to [`Backend::prepare`].
    pub fn prepares(&self) -> usize {
        self.prepares.load(Ordering::SeqCst)
    }

    /// Model sessions currently alive.
    pub fn live_sessions(&self) -> usize {
        self.live_sessions.load(Ordering::SeqCst)
    }

    /// Whether the backend itself has been dropped.
    pub fn released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

/// Test backend producing deterministic embeddings.
#[derive(Debug)]
pub struct MockBackend {
    n_ctx_train: u32,
    n_embd: usize,
    pooling: PoolingType,
    add_bos: bool,
    zero_output: bool,
    memory_source: bool,
    fail_load_at: Option<usize>,
    fail_context_at: Option<usize>,
    ledger: Arc<MockLedger>,
}

impl MockBackend {
    /// Create a mean-pooling mock model.
    #[must_use]
    pub fn new(n_ctx_train: u32, n_embd: usize) -> Self {
        Self {
            n_ctx_train,
            n_embd,
            pooling: PoolingType::Mean,
            add_bos: true,
            zero_output: false,
            memory_source: false,
            fail_load_at: None,
            fail_context_at: None,
            ledger: Arc::new(MockLedger::default()),
        }
    }

    /// Report a different pooling type.
    #[must_use]
    pub fn with_pooling(mut self, pooling: PoolingType) -> Self {
        self.pooling = pooling;
        self
    }

    /// Whether the tokenizer honours BOS insertion.
    #[must_use]
    pub fn with_bos(mut self, add_bos: bool) -> Self {
        self.add_bos = add_bos;
        self
    }

    /// Pool to an all-zero vector.
    #[must_use]
    pub fn with_zero_output(mut self) -> Self {
        self.zero_output = true;
        self
    }

    /// Accept [`LoadTarget::Memory`].
    #[must_use]
    pub fn with_memory_source(mut self, supported: bool) -> Self {
        self.memory_source = supported;
        self
    }

    /// Fail the model load with the given zero-based call index.
    #[must_use]
    pub fn fail_load_at(mut self, index: usize) -> Self {
        self.fail_load_at = Some(index);
        self
    }

    /// Load the model but fail to create its context on the given call.
    #[must_use]
    pub fn fail_context_at(mut self, index: usize) -> Self {
        self.fail_context_at = Some(index);
        self
    }

    /// Shared ledger; take it before handing the backend to a session.
    #[must_use]
    pub fn ledger(&self) -> Arc<MockLedger> {
        Arc::clone(&self.ledger)
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.ledger.released.store(true, Ordering::SeqCst);
    }
}

impl Backend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn supports_memory_source(&self) -> bool {
        self.memory_source
    }

    fn prepare<'a>(&self, target: LoadTarget<'a>) -> Result<PreparedTarget<'a>, LoadError> {
        self.ledger.prepares.fetch_add(1, Ordering::SeqCst);
        Ok(PreparedTarget::Direct(target))
    }

    fn load(
        &self,
        target: LoadTarget<'_>,
        params: &LoadParams,
    ) -> Result<Box<dyn ModelSession>, LoadError> {
        let index = {
            let mut loads = self.ledger.loads.lock();
            loads.push(LoadRecord {
                params: *params,
                memory_len: match target {
                    LoadTarget::Memory(bytes) => Some(bytes.len()),
                    LoadTarget::File(_) => None,
                },
            });
            loads.len() - 1
        };

        if self.fail_load_at == Some(index) {
            return Err(LoadError::Model(format!("mock load {index} failed")));
        }
        if let LoadTarget::Memory(_) = target {
            if !self.memory_source {
                return Err(LoadError::Model("mock backend has no memory source".to_string()));
            }
        }
        if self.fail_context_at == Some(index) {
            return Err(LoadError::Context {
                message: "mock context creation failed".to_string(),
                n_ctx_train: self.n_ctx_train,
            });
        }

        debug!("Mock model loaded with n_ctx={}", params.n_ctx);
        self.ledger.live_sessions.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(MockSession {
            n_ctx_train: self.n_ctx_train,
            n_embd: self.n_embd,
            n_ctx: params.n_ctx,
            pooling: self.pooling,
            add_bos: self.add_bos,
            zero_output: self.zero_output,
            memory: Vec::new(),
            pooled: None,
            ledger: Arc::clone(&self.ledger),
        }))
    }
}

struct MockSession {
    n_ctx_train: u32,
    n_embd: usize,
    n_ctx: u32,
    pooling: PoolingType,
    add_bos: bool,
    zero_output: bool,
    memory: Vec<Token>,
    pooled: Option<Vec<f32>>,
    ledger: Arc<MockLedger>,
}

impl MockSession {
    fn word_token(word: &str) -> Token {
        let hash = blake3::hash(word.as_bytes());
        let bytes = hash.as_bytes();
        let raw = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        // Bounded by VOCAB_SIZE + FIRST_WORD_TOKEN, well within i32
        #[allow(clippy::cast_possible_wrap)]
        let token = (FIRST_WORD_TOKEN + raw % VOCAB_SIZE) as Token;
        token
    }

    fn token_vector(&self, token: Token) -> Vec<f32> {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&token.to_le_bytes());
        let mut bytes = vec![0_u8; self.n_embd * 4];
        hasher.finalize_xof().fill(&mut bytes);
        bytes
            .chunks_exact(4)
            .map(|c| {
                let raw = u32::from_le_bytes([c[0], c[1], c[2], c[3]]);
                #[allow(clippy::cast_precision_loss)]
                let unit = raw as f32 / u32::MAX as f32;
                unit * 2.0 - 1.0
            })
            .collect()
    }

    fn mean_pool(&self) -> Vec<f32> {
        let mut sum = vec![0.0_f32; self.n_embd];
        if self.zero_output || self.memory.is_empty() {
            return sum;
        }
        for &token in &self.memory {
            for (acc, v) in sum.iter_mut().zip(self.token_vector(token)) {
                *acc += v;
            }
        }
        #[allow(clippy::cast_precision_loss)]
        let n = self.memory.len() as f32;
        sum.iter_mut().for_each(|v| *v /= n);
        sum
    }
}

impl Drop for MockSession {
    fn drop(&mut self) {
        self.ledger.live_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ModelSession for MockSession {
    fn n_ctx_train(&self) -> u32 {
        self.n_ctx_train
    }

    fn n_embd(&self) -> usize {
        self.n_embd
    }

    fn n_ctx(&self) -> u32 {
        self.n_ctx
    }

    fn pooling_type(&self) -> PoolingType {
        self.pooling
    }

    fn tokenize(
        &self,
        text: &str,
        add_bos: bool,
        special: bool,
    ) -> Result<Vec<Token>, EmbedError> {
        let mut tokens = Vec::new();
        if add_bos && self.add_bos {
            tokens.push(BOS_TOKEN);
        }
        tokens.extend(text.split_whitespace().map(|word| match word {
            "<fail>" if special => FAIL_TOKEN,
            "<missing>" if special => MISSING_TOKEN,
            _ => Self::word_token(word),
        }));
        Ok(tokens)
    }

    fn clear_memory(&mut self) {
        self.memory.clear();
        self.pooled = None;
    }

    fn decode(&mut self, batch: &TokenBatch) -> Result<(), EmbedError> {
        if batch.is_empty() {
            return Err(EmbedError::Decode("empty batch".to_string()));
        }
        if batch.tokens().any(|t| t == FAIL_TOKEN) {
            return Err(EmbedError::Decode("mock decode failure".to_string()));
        }
        if self.memory.len() + batch.len() > self.n_ctx as usize {
            return Err(EmbedError::Decode(format!(
                "no KV slot for {} tokens ({} of {} used)",
                batch.len(),
                self.memory.len(),
                self.n_ctx
            )));
        }

        self.memory.extend(batch.tokens());
        self.pooled = if self.memory.contains(&MISSING_TOKEN) {
            None
        } else {
            Some(self.mean_pool())
        };
        Ok(())
    }

    fn sequence_embedding(&self, seq_id: i32) -> Option<&[f32]> {
        if seq_id == 0 {
            self.pooled.as_deref()
        } else {
            None
        }
    }
}
