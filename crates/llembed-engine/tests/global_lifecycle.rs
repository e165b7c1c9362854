//! Integration tests for the process-wide session.
//!
//! Tests the lifecycle: stage → initialize → embed → shutdown, with the mock
//! backend standing in for a model. The global slot is shared, so every test
//! holds `SERIAL` and starts from a clean state.

use llembed_core::{EmbedError, InitError, StagingError, MEMORY_SOURCE};
use llembed_engine::backend::MockBackend;
use llembed_engine::{global, SessionBuilder};
use parking_lot::{Mutex, MutexGuard};
use std::io;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::fmt::MakeWriter;

const TEST_DIM: usize = 48;

static SERIAL: Mutex<()> = Mutex::new(());

fn clean() -> MutexGuard<'static, ()> {
    let guard = SERIAL.lock();
    global::shutdown();
    global::release_memory_buffer();
    guard
}

fn init_mock(source: &str, threads: i32, backend: MockBackend) -> Result<(), InitError> {
    global::initialize_with(
        SessionBuilder::new(source).threads(threads),
        Box::new(backend),
    )
}

/// Log output collected by a test-local subscriber.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Run `f` with warnings and errors recorded on this thread.
fn capture_warnings<T>(f: impl FnOnce() -> T) -> (T, String) {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_max_level(Level::WARN)
        .with_ansi(false)
        .finish();
    let result = tracing::subscriber::with_default(subscriber, f);
    (result, logs.contents())
}

fn norm(values: &[f32]) -> f32 {
    values.iter().map(|v| v * v).sum::<f32>().sqrt()
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn test_full_lifecycle() {
    let _guard = clean();
    assert_eq!(global::dimension(), -1);

    init_mock("model.gguf", 4, MockBackend::new(512, TEST_DIM)).unwrap();
    assert!(global::is_initialized());
    assert_eq!(global::dimension(), TEST_DIM as i32);

    let embedding = global::embed("hello world").unwrap();
    assert_eq!(embedding.values.len() as i32, global::dimension());
    assert!((norm(&embedding.values) - 1.0).abs() < 1e-4);
    drop(embedding);

    global::shutdown();
    assert_eq!(global::dimension(), -1);
    assert!(!global::is_initialized());
}

#[test]
fn test_embed_before_initialize() {
    let _guard = clean();
    assert!(matches!(
        global::embed("hello"),
        Err(EmbedError::NotInitialized)
    ));
}

#[test]
fn test_embed_after_shutdown() {
    let _guard = clean();
    init_mock("model.gguf", 1, MockBackend::new(512, TEST_DIM)).unwrap();
    global::shutdown();

    assert!(matches!(
        global::embed("hello"),
        Err(EmbedError::NotInitialized)
    ));
}

#[test]
fn test_initialize_twice_keeps_first_config() {
    let _guard = clean();
    init_mock("first.gguf", 2, MockBackend::new(512, TEST_DIM)).unwrap();
    let before = global::config().unwrap();

    let second = MockBackend::new(4096, 8);
    let ledger = second.ledger();
    init_mock("second.gguf", 8, second).unwrap();

    assert_eq!(global::config().unwrap(), before);
    assert_eq!(global::dimension(), TEST_DIM as i32);
    assert!(ledger.loads().is_empty());
}

#[test]
fn test_shutdown_is_idempotent() {
    let _guard = clean();
    global::shutdown();
    global::shutdown();

    let backend = MockBackend::new(512, TEST_DIM);
    let ledger = backend.ledger();
    init_mock("model.gguf", 1, backend).unwrap();
    global::shutdown();
    global::shutdown();

    assert_eq!(ledger.live_sessions(), 0);
    assert!(ledger.released());
}

#[test]
fn test_failed_initialize_leaves_uninitialized() {
    let _guard = clean();
    let err = init_mock("model.gguf", 1, MockBackend::new(512, TEST_DIM).fail_load_at(1))
        .unwrap_err();

    assert!(matches!(err, InitError::ModelLoad(_)));
    assert!(!global::is_initialized());
    assert_eq!(global::dimension(), -1);

    // A later attempt is not blocked by the failure
    init_mock("model.gguf", 1, MockBackend::new(512, TEST_DIM)).unwrap();
    assert!(global::is_initialized());
}

#[test]
fn test_reinitialize_after_shutdown() {
    let _guard = clean();
    init_mock("a.gguf", 1, MockBackend::new(512, 16)).unwrap();
    global::shutdown();
    init_mock("b.gguf", 1, MockBackend::new(512, 32)).unwrap();
    assert_eq!(global::dimension(), 32);
}

// ============================================================================
// Embedding properties
// ============================================================================

#[test]
fn test_repeated_embeds_identical() {
    let _guard = clean();
    init_mock("model.gguf", 2, MockBackend::new(512, TEST_DIM)).unwrap();

    let a = global::embed("the same text").unwrap();
    let b = global::embed("the same text").unwrap();
    assert_eq!(a.values, b.values);
}

#[test]
fn test_overlong_text_truncated() {
    let _guard = clean();
    init_mock("model.gguf", 2, MockBackend::new(16, TEST_DIM)).unwrap();

    let text = vec!["token"; 100].join(" ");
    let (embedding, logs) = capture_warnings(|| global::embed(&text).unwrap());

    assert_eq!(embedding.token_count, 16);
    assert!(embedding.was_truncated());
    assert_eq!(embedding.dimension(), TEST_DIM);
    assert!(logs.contains("WARN"));
    assert!(logs.contains("exceeds maximum context length (101 tokens)"));
    assert!(logs.contains("Truncating to 16 tokens"));
}

#[test]
fn test_fitting_text_not_warned() {
    let _guard = clean();
    init_mock("model.gguf", 2, MockBackend::new(16, TEST_DIM)).unwrap();

    let (embedding, logs) = capture_warnings(|| global::embed("a short text").unwrap());

    assert!(!embedding.was_truncated());
    assert!(!logs.contains("Truncating"));
}

#[test]
fn test_empty_text_rejected() {
    let _guard = clean();
    init_mock("model.gguf", 1, MockBackend::new(512, TEST_DIM)).unwrap();
    assert!(matches!(global::embed(""), Err(EmbedError::EmptyInput)));
    assert!(global::embed("after").is_ok());
}

// ============================================================================
// Memory source
// ============================================================================

#[test]
fn test_memory_source_supported() {
    let _guard = clean();
    global::supply_memory_buffer(&[1_u8; 256]).unwrap();

    let backend = MockBackend::new(512, TEST_DIM).with_memory_source(true);
    let ledger = backend.ledger();
    init_mock(MEMORY_SOURCE, 2, backend).unwrap();

    assert!(global::config().unwrap().source.is_memory());
    assert!(ledger.loads().iter().all(|l| l.memory_len == Some(256)));
    assert!(global::embed("from memory").is_ok());
}

#[test]
fn test_memory_source_unsupported() {
    let _guard = clean();
    global::supply_memory_buffer(&[1_u8; 256]).unwrap();

    let err = init_mock(MEMORY_SOURCE, 2, MockBackend::new(512, TEST_DIM)).unwrap_err();
    assert!(matches!(err, InitError::MemorySourceUnsupported { .. }));
    assert!(!global::is_initialized());
}

#[test]
fn test_memory_source_without_buffer() {
    let _guard = clean();
    let backend = MockBackend::new(512, TEST_DIM).with_memory_source(true);
    let err = init_mock(MEMORY_SOURCE, 2, backend).unwrap_err();
    assert!(matches!(err, InitError::MemorySourceUnset));
}

#[test]
fn test_staged_buffer_survives_shutdown() {
    let _guard = clean();
    global::supply_memory_buffer(b"weights").unwrap();

    init_mock(MEMORY_SOURCE, 1, MockBackend::new(512, 8).with_memory_source(true)).unwrap();
    global::shutdown();
    init_mock(MEMORY_SOURCE, 1, MockBackend::new(512, 8).with_memory_source(true)).unwrap();
    assert!(global::is_initialized());
}

#[test]
fn test_supply_empty_buffer_clears_staging() {
    let _guard = clean();
    global::supply_memory_buffer(b"weights").unwrap();
    assert!(matches!(
        global::supply_memory_buffer(&[]),
        Err(StagingError::Empty)
    ));

    let backend = MockBackend::new(512, 8).with_memory_source(true);
    assert!(matches!(
        init_mock(MEMORY_SOURCE, 1, backend),
        Err(InitError::MemorySourceUnset)
    ));
}
