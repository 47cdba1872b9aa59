//! Resolution Cache Performance Benchmarks
//!
//! Measures the non-database half of resolution: argument-name
//! normalisation, cache key construction, and cache hit lookups. These run
//! once per request, so they sit directly on the request latency path.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;

use procgate::resolver::{cache_key, normalise_params, CacheEntry, ResolverCache};

fn sample_params(n: usize) -> serde_json::Map<String, serde_json::Value> {
    (0..n).map(|i| (format!("Arg{i}"), json!(i))).collect()
}

fn bench_normalise(c: &mut Criterion) {
    let params = sample_params(8);

    c.bench_function("normalise_8_args", |b| {
        b.iter(|| normalise_params(black_box(&params)).unwrap());
    });
}

fn bench_cache_key(c: &mut Criterion) {
    let normalised = normalise_params(&sample_params(8)).unwrap();

    c.bench_function("cache_key_8_args", |b| {
        b.iter(|| cache_key(black_box(Some("api")), black_box("get_user_friends"), &normalised));
    });
}

fn bench_cache_hit(c: &mut Criterion) {
    let cache = ResolverCache::new();
    let normalised = normalise_params(&sample_params(4)).unwrap();
    let key = cache_key(None, "get_user_friends", &normalised);

    cache.insert(
        key.clone(),
        CacheEntry {
            schema: "public".into(),
            proc: "get_user_friends".into(),
            returns_set: true,
            returns_json: false,
            requires_host: false,
            arg_names: normalised.keys().cloned().collect(),
            arg_types: vec!["integer".into(); 4],
        },
    );

    c.bench_function("cache_hit", |b| {
        b.iter(|| cache.get(black_box(&key)).unwrap());
    });
}

criterion_group!(benches, bench_normalise, bench_cache_key, bench_cache_hit);
criterion_main!(benches);
