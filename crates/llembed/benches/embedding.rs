//! Benchmarks for embedding generation.
//!
//! Runs against the mock backend by default so the pipeline overhead
//! (tokenization, truncation, normalization) is measured without a model.
//! Set `LLEMBED_BENCH_MODEL` to also benchmark a real model with the default
//! backend.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use llembed_engine::backend::{self, MockBackend};
use llembed_engine::{EmbeddingSession, SessionBuilder};

const SHORT_TEXT: &str = "The quick brown fox jumps over the lazy dog.";
const MEDIUM_TEXT: &str = "Machine learning is a subset of artificial intelligence that enables systems to learn and improve from experience without being explicitly programmed. It focuses on developing computer programs that can access data and use it to learn for themselves.";

fn long_text() -> String {
    MEDIUM_TEXT.repeat(40)
}

fn mock_session(n_ctx_train: u32, dim: usize) -> EmbeddingSession {
    SessionBuilder::new("bench.gguf")
        .threads(1)
        .build(Box::new(MockBackend::new(n_ctx_train, dim)))
        .unwrap()
}

fn pipeline_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline");
    let long = long_text();

    for (name, text) in [
        ("short", SHORT_TEXT),
        ("medium", MEDIUM_TEXT),
        ("truncated", long.as_str()),
    ] {
        let mut session = mock_session(512, 384);
        group.throughput(Throughput::Bytes(text.len() as u64));
        group.bench_with_input(BenchmarkId::new("mock_384", name), &text, |b, text| {
            b.iter(|| black_box(session.embed(text).unwrap()));
        });
    }

    for dim in [128, 768, 4096] {
        let mut session = mock_session(512, dim);
        group.bench_with_input(BenchmarkId::new("mock_dim", dim), &dim, |b, _| {
            b.iter(|| black_box(session.embed(SHORT_TEXT).unwrap()));
        });
    }

    group.finish();
}

fn model_benchmark(c: &mut Criterion) {
    let Ok(source) = std::env::var("LLEMBED_BENCH_MODEL") else {
        eprintln!("Skipping model benchmarks: LLEMBED_BENCH_MODEL not set");
        return;
    };

    let session = backend::default_backend().and_then(|backend| {
        SessionBuilder::new(source.as_str())
            .threads(4)
            .build(backend)
    });
    let mut session = match session {
        Ok(session) => session,
        Err(e) => {
            eprintln!("Skipping model benchmarks: {e}");
            return;
        }
    };

    let mut group = c.benchmark_group("model");
    for (name, text) in [("short", SHORT_TEXT), ("medium", MEDIUM_TEXT)] {
        group.bench_with_input(BenchmarkId::new("embed", name), &text, |b, text| {
            b.iter(|| black_box(session.embed(text).unwrap()));
        });
    }
    group.finish();
}

criterion_group!(benches, pipeline_benchmark, model_benchmark);
criterion_main!(benches);
