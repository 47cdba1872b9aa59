//! Rowset Shaping Performance Benchmarks
//!
//! Measures the rowset-to-JSON reduction over representative result shapes:
//! a scalar, a wide single row, and a large set of row objects.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;

use procgate::{shape, Rowset};

fn scalar_rowset() -> Rowset {
    Rowset { columns: vec!["userid".into()], rows: vec![vec![json!(123)]] }
}

fn wide_row_rowset() -> Rowset {
    let columns: Vec<String> = (0..16).map(|i| format!("col{i}")).collect();
    let row: Vec<serde_json::Value> = (0..16).map(|i| json!(i)).collect();
    Rowset { columns, rows: vec![row] }
}

fn large_set_rowset(rows: usize) -> Rowset {
    Rowset {
        columns: vec!["userid".into(), "firstname".into(), "lastname".into()],
        rows: (0..rows)
            .map(|i| vec![json!(i), json!(format!("First{i}")), json!(format!("Last{i}"))])
            .collect(),
    }
}

fn bench_scalar(c: &mut Criterion) {
    let rs = scalar_rowset();
    c.bench_function("shape_scalar", |b| {
        b.iter(|| shape(black_box(&rs), false, false).unwrap());
    });
}

fn bench_wide_row(c: &mut Criterion) {
    let rs = wide_row_rowset();
    c.bench_function("shape_wide_row", |b| {
        b.iter(|| shape(black_box(&rs), false, false).unwrap());
    });
}

fn bench_large_set(c: &mut Criterion) {
    let rs = large_set_rowset(1000);
    c.bench_function("shape_1000_row_set", |b| {
        b.iter(|| shape(black_box(&rs), true, false).unwrap());
    });
}

criterion_group!(benches, bench_scalar, bench_wide_row, bench_large_set);
criterion_main!(benches);
