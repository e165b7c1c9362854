//! Process-wide session slot.
//!
//! A thin layer over [`EmbeddingSession`] for callers that want one implicit
//! session per process, such as the C boundary. Every operation takes the
//! same lock, so initialization, embedding, shutdown and staging never
//! interleave.
//!
//! | Operation | Uninitialized | Initialized |
//! |-----------|---------------|-------------|
//! | [`initialize`] | builds a session | no-op, returns `Ok` |
//! | [`dimension`] | `-1` | embedding width |
//! | [`embed`] | `NotInitialized` | runs the pipeline |
//! | [`shutdown`] | no-op | releases the session |
//!
//! The staged memory buffer is independent of the session: it survives
//! [`shutdown`] and may be reused by a later `memory:` initialization.

use llembed_core::{
    Backend, EmbedError, Embedding, InitError, ModelSource, SessionConfig, StagingError,
};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::backend;
use crate::capacity::SessionBuilder;
use crate::session::EmbeddingSession;
use crate::staging::StagingArea;

struct GlobalState {
    session: Option<EmbeddingSession>,
    staging: StagingArea,
}

static STATE: Mutex<GlobalState> = Mutex::new(GlobalState {
    session: None,
    staging: StagingArea::new(),
});

/// Initialize the process-wide session, choosing the backend for `source`.
///
/// Succeeds without doing anything if a session is already live, whatever
/// the arguments.
pub fn initialize(source: &str, n_threads: i32) -> Result<(), InitError> {
    let mut state = STATE.lock();
    if state.session.is_some() {
        debug!("Already initialized; ignoring {source}");
        return Ok(());
    }
    let source = ModelSource::parse(source);
    let backend = backend::for_source("auto", &source, false)?;
    build_into(&mut state, SessionBuilder::new(source).threads(n_threads), backend)
}

/// Initialize with an explicit builder and backend.
pub fn initialize_with(
    builder: SessionBuilder,
    backend: Box<dyn Backend>,
) -> Result<(), InitError> {
    let mut state = STATE.lock();
    if state.session.is_some() {
        debug!("Already initialized; ignoring new builder");
        return Ok(());
    }
    build_into(&mut state, builder, backend)
}

fn build_into(
    state: &mut GlobalState,
    builder: SessionBuilder,
    backend: Box<dyn Backend>,
) -> Result<(), InitError> {
    let session = builder.build_with_staging(backend, Some(&state.staging))?;
    state.session = Some(session);
    info!("Global session initialized");
    Ok(())
}

/// Embedding width, or `-1` when no session is live.
#[must_use]
pub fn dimension() -> i32 {
    STATE
        .lock()
        .session
        .as_ref()
        .map_or(-1, |s| i32::try_from(s.dimension()).unwrap_or(i32::MAX))
}

/// Embed `text` with the live session.
pub fn embed(text: &str) -> Result<Embedding, EmbedError> {
    STATE
        .lock()
        .session
        .as_mut()
        .ok_or(EmbedError::NotInitialized)?
        .embed(text)
}

/// Release the live session, if any. The staged buffer is kept.
pub fn shutdown() {
    let mut state = STATE.lock();
    match state.session.take() {
        Some(session) => session.close(),
        None => debug!("Shutdown with no live session"),
    }
}

/// Stage model bytes for a later `memory:` initialization.
///
/// Any previously staged buffer is released first; on failure nothing is
/// staged.
pub fn supply_memory_buffer(bytes: &[u8]) -> Result<(), StagingError> {
    STATE.lock().staging.supply(bytes)
}

/// Drop the staged buffer.
pub fn release_memory_buffer() {
    STATE.lock().staging.release();
}

#[must_use]
pub fn is_initialized() -> bool {
    STATE.lock().session.is_some()
}

/// Configuration of the live session.
#[must_use]
pub fn config() -> Option<SessionConfig> {
    STATE.lock().session.as_ref().map(|s| s.config().clone())
}
