//! Benchmarks for the code sandbox.
//!
//! Run with: cargo bench
//!
//! These measure the supervisor's own overhead with an in-memory backend;
//! container start-up time is not included.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use container_code_sandbox_rs::prelude::*;
use container_code_sandbox_rs::sandbox::io::CapturedOutput;
use container_code_sandbox_rs::sandbox::process::LaunchPlan;
use container_code_sandbox_rs::{
    ExecutionProfile, IsolatedHandle, IsolationBackend, Job, LanguageRegistry, RawOutput,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tokio::runtime::Runtime;
use tokio::time::Instant;

/// Backend that echoes the source back without starting anything.
struct EchoBackend {
    ready: AtomicBool,
}

#[async_trait]
impl IsolationBackend for EchoBackend {
    fn name(&self) -> &'static str {
        "echo"
    }

    async fn initialize(&self) -> Result<()> {
        self.ready.store(true, Ordering::Release);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    async fn allocate(&self, _profile: &ExecutionProfile, job: &Job) -> Result<IsolatedHandle> {
        let launch = LaunchPlan::new("echo").stdin(job.source.as_str());
        Ok(IsolatedHandle::new(job.id, "memory", launch))
    }

    async fn run(&self, handle: &IsolatedHandle, _deadline: Instant) -> Result<RawOutput> {
        Ok(RawOutput {
            stdout: handle.launch().stdin.clone().unwrap_or_default(),
            stderr: String::new(),
            exit_code: Some(0),
        })
    }

    async fn release(&self, handle: &IsolatedHandle) {
        handle.claim_release();
    }
}

/// Benchmark language resolution.
fn bench_registry(c: &mut Criterion) {
    let registry = LanguageRegistry::default();
    let mut group = c.benchmark_group("registry");

    for id in ["python", "node", "ruby"] {
        group.bench_with_input(BenchmarkId::new("resolve", id), id, |b, id| {
            b.iter(|| black_box(registry.resolve(black_box(id)).is_ok()));
        });
    }

    group.finish();
}

/// Benchmark bounded output capture.
fn bench_capture(c: &mut Criterion) {
    let chunk = vec![b'x'; 4096];
    let mut group = c.benchmark_group("capture");

    for limit in [1024usize, 64 * 1024, 1024 * 1024] {
        group.throughput(Throughput::Bytes((chunk.len() * 256) as u64));
        group.bench_with_input(BenchmarkId::new("push_256_chunks", limit), &limit, |b, &limit| {
            b.iter(|| {
                let mut captured = CapturedOutput::new(limit);
                for _ in 0..256 {
                    captured.push(&chunk);
                }
                black_box(captured.into_string())
            });
        });
    }

    group.finish();
}

/// Benchmark supervisor overhead per job.
fn bench_supervisor(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let backend = Arc::new(EchoBackend {
        ready: AtomicBool::new(false),
    });
    let config = SandboxConfig::builder().timeout(Duration::from_secs(10)).build();
    let sandbox = Arc::new(CodeSandbox::with_backend(config, backend));
    rt.block_on(sandbox.initialize()).unwrap();

    let mut group = c.benchmark_group("supervisor");

    group.bench_function("single_job", |b| {
        b.to_async(&rt).iter(|| async {
            let result = sandbox.execute("python", "print(1)").await.unwrap();
            black_box(result)
        });
    });

    for concurrency in [8usize, 32] {
        group.bench_with_input(
            BenchmarkId::new("concurrent_jobs", concurrency),
            &concurrency,
            |b, &concurrency| {
                b.to_async(&rt).iter(|| {
                    let sandbox = Arc::clone(&sandbox);
                    async move {
                        let handles: Vec<_> = (0..concurrency)
                            .map(|_| {
                                let sandbox = Arc::clone(&sandbox);
                                tokio::spawn(async move { sandbox.execute("javascript", "1").await })
                            })
                            .collect();
                        for handle in handles {
                            black_box(handle.await.unwrap().unwrap());
                        }
                    }
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_registry, bench_capture, bench_supervisor);
criterion_main!(benches);
