//! Criterion benchmarks for the normalization hot path.
//!
//! Benchmarks:
//! 1. Period-end alignment of raw date tokens
//! 2. The full tail: align, sort, scale, round, reorder, validate
//! 3. Inner join of two factor tables on date

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use polars::prelude::*;

use factorlab_core::data::align::align_period_end;
use factorlab_core::data::composite::inner_join_on_date;
use factorlab_core::data::normalize::{
    rearrange_columns, round_to_precision, scale_to_decimal, sort_by_date,
};
use factorlab_core::data::schema::TableSchema;
use factorlab_core::Frequency;

// ── Helpers ──────────────────────────────────────────────────────────

/// Daily tokens in reverse order with the risk-free column up front.
fn make_raw_daily(n: usize) -> DataFrame {
    let base = chrono::NaiveDate::from_ymd_opt(1963, 7, 1).unwrap();
    let tokens: Vec<String> = (0..n)
        .rev()
        .map(|i| (base + chrono::Duration::days(i as i64)).format("%Y%m%d").to_string())
        .collect();
    let series = |phase: f64| -> Vec<f64> {
        (0..n).map(|i| ((i as f64 * 0.1 + phase).sin() * 2.5 * 1e4).round() / 1e4).collect()
    };
    DataFrame::new(vec![
        Column::new("date".into(), tokens),
        Column::new("RF".into(), vec![0.0123; n]),
        Column::new("SMB".into(), series(1.0)),
        Column::new("HML".into(), series(2.0)),
        Column::new("Mkt-RF".into(), series(0.0)),
    ])
    .unwrap()
}

fn normalize(raw: DataFrame, schema: &TableSchema) -> DataFrame {
    let df = align_period_end(raw, Frequency::Daily).unwrap();
    let df = sort_by_date(df).unwrap();
    let df = scale_to_decimal(df).unwrap();
    let df = round_to_precision(df, 6).unwrap();
    let df = rearrange_columns(df).unwrap();
    schema.validate(&df).unwrap();
    df
}

// ── 1. Alignment ─────────────────────────────────────────────────────

fn bench_align(c: &mut Criterion) {
    let mut group = c.benchmark_group("align_period_end");
    for rows in [1_000, 15_000] {
        let raw = make_raw_daily(rows);
        group.bench_with_input(BenchmarkId::new("daily_tokens", rows), &raw, |b, raw| {
            b.iter(|| align_period_end(black_box(raw.clone()), Frequency::Daily).unwrap())
        });
    }
    group.finish();
}

// ── 2. Full normalization tail ───────────────────────────────────────

fn bench_normalize(c: &mut Criterion) {
    let schema = TableSchema::factor_table(&["Mkt-RF", "SMB", "HML", "RF"]);
    let mut group = c.benchmark_group("normalize");
    for rows in [1_000, 15_000] {
        let raw = make_raw_daily(rows);
        group.bench_with_input(BenchmarkId::new("ff3_daily", rows), &raw, |b, raw| {
            b.iter(|| normalize(black_box(raw.clone()), &schema))
        });
    }
    group.finish();
}

// ── 3. Join ──────────────────────────────────────────────────────────

fn bench_join(c: &mut Criterion) {
    let schema = TableSchema::factor_table(&["Mkt-RF", "SMB", "HML", "RF"]);
    let left = normalize(make_raw_daily(15_000), &schema);
    let mut right = left.select(["date", "SMB"]).unwrap();
    right.rename("SMB", "ME".into()).unwrap();

    c.bench_function("inner_join_on_date/15000", |b| {
        b.iter(|| inner_join_on_date(black_box(left.clone()), black_box(right.clone())).unwrap())
    });
}

criterion_group!(benches, bench_align, bench_normalize, bench_join);
criterion_main!(benches);
