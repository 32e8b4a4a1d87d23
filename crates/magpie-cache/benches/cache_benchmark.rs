// Copyright © 2025 lituus-io <spicyzhug@gmail.com>
// All Rights Reserved.
// Licensed under PolyForm Noncommercial 1.0.0

//! Cache performance benchmarks
//!
//! Measures key hashing, hits and miss-then-store through `CachedLm`.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use magpie::{values, CallOptions, Contract, Demonstration, Lm, LmRequest, MockLm, Step};
use magpie_cache::{CacheKey, CachedLm, MemoryCache};
use std::sync::Arc;

fn request(question: &str, demos: usize) -> LmRequest {
    let step = Step::new("qa", Contract::parse("qa", "question -> answer").unwrap())
        .with_instruction("Answer the question.")
        .with_demos((0..demos).map(|i| {
            Demonstration::new(
                values([("question", format!("demo question {}", i))]),
                values([("answer", format!("demo answer {}", i))]),
            )
        }));
    LmRequest::for_step(&step, values([("question", question)]), CallOptions::default())
}

fn benchmark_cache_key(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_key");

    for demos in [0usize, 4, 16].iter() {
        let req = request("What is the capital of France?", *demos);
        group.bench_with_input(BenchmarkId::from_parameter(demos), &req, |b, req| {
            b.iter(|| black_box(CacheKey::from_request("mock", black_box(req))))
        });
    }

    group.finish();
}

fn benchmark_cache_hit(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_hit");
    let rt = tokio::runtime::Runtime::new().unwrap();

    let lm = CachedLm::with_cache(
        MockLm::new(|req| Ok(values([("answer", format!("Response to: {}", req.inputs["question"]))]))),
        Arc::new(MemoryCache::new(100)),
    );
    let req = request("test prompt", 4);

    rt.block_on(async {
        let _ = lm.invoke(&req).await;
    });

    group.throughput(Throughput::Elements(1));
    group.bench_function("memory", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(lm.invoke(black_box(&req)).await) })
    });

    group.finish();
}

fn benchmark_cache_miss(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_miss");
    let rt = tokio::runtime::Runtime::new().unwrap();

    let lm = CachedLm::new(MockLm::new(|_| Ok(values([("answer", "fresh")]))));
    let mut counter = 0u64;

    group.throughput(Throughput::Elements(1));
    group.bench_function("miss_and_store", |b| {
        b.iter(|| {
            counter += 1;
            let req = request(&format!("prompt {}", counter), 0);
            rt.block_on(async { black_box(lm.invoke(&req).await) })
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_cache_key,
    benchmark_cache_hit,
    benchmark_cache_miss
);
criterion_main!(benches);
