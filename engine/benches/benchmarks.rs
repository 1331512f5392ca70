//! Performance benchmarks for scd-engine

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use scd_engine::{
    latest_per_identity, mark_latest, Entity, EntityQuery, MutationRequest, Payload,
    SortDirection, VersionEnvelope, VersionFamily,
};
use serde_json::json;

/// `identities` families of `depth` versions each, interleaved.
fn history_rows(identities: usize, depth: u64) -> Vec<Entity> {
    let mut rows = Vec::with_capacity(identities * depth as usize);
    for version in 1..=depth {
        for i in 0..identities {
            let mut envelope = VersionEnvelope::unsaved("job", format!("job_{i}"));
            envelope.version = version;
            envelope.uid = format!("job_uid_{i}_{version}");
            envelope.updated_at = version as i64;
            let payload = json!({"status": if version % 2 == 0 { "active" } else { "extended" }, "rate": i})
                .as_object()
                .cloned()
                .unwrap_or_default();
            rows.push(Entity::new(envelope, payload));
        }
    }
    rows
}

fn bench_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolution");

    for size in [100, 1000, 5000].iter() {
        let rows = history_rows(*size, 5);

        group.bench_with_input(BenchmarkId::new("latest_per_identity", size), &rows, |b, rows| {
            b.iter(|| latest_per_identity(black_box(rows.clone())))
        });

        group.bench_with_input(BenchmarkId::new("mark_latest", size), &rows, |b, rows| {
            b.iter(|| mark_latest(black_box(rows.clone())))
        });
    }

    group.finish();
}

fn bench_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("query");
    let rows = history_rows(1000, 5);

    group.bench_function("latest_filtered_sorted", |b| {
        let query = EntityQuery::latest()
            .where_eq("status", "extended")
            .sort_by("rate", SortDirection::Desc)
            .limit(50);
        b.iter(|| query.evaluate(black_box(rows.clone())))
    });

    group.bench_function("history_all", |b| {
        let query = EntityQuery::history();
        b.iter(|| query.evaluate(black_box(rows.clone())))
    });

    group.finish();
}

fn bench_mutation(c: &mut Criterion) {
    let mut group = c.benchmark_group("mutation");

    group.bench_function("parse_request", |b| {
        let payload = json!({"id": "job_abc", "version": 7, "uid": "job_uid_7", "status": "active", "rate": 80.0});
        b.iter(|| MutationRequest::from_value("job", black_box(payload.clone())))
    });

    group.bench_function("append_100_versions", |b| {
        let request = MutationRequest::new("job", "job_abc", Payload::new());
        b.iter(|| {
            let mut family = VersionFamily::create(&request.creation(), "u0", 0).ok()?;
            for n in 1..100i64 {
                let submission = request.submission_over(Some(family.current()));
                family.append(&submission, format!("u{n}"), n).ok()?;
            }
            Some(family.len())
        })
    });

    group.finish();
}

criterion_group!(benches, bench_resolution, bench_query, bench_mutation);
criterion_main!(benches);
