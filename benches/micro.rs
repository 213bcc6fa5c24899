//! Micro-benchmarks: fact ingestion, flush, and point queries.

use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use tempfile::TempDir;

use triadb::engine::{Db, DbConfig, FactPattern};

fn bench_config() -> DbConfig {
    DbConfig {
        page_size: 1024,
        register_reader: false,
        ..DbConfig::default()
    }
}

fn open_db(dir: &TempDir) -> Db {
    Db::open(dir.path().join("db"), bench_config()).expect("open")
}

fn bench_add_fact(c: &mut Criterion) {
    let mut group = c.benchmark_group("add_fact");
    group.throughput(Throughput::Elements(1));

    group.bench_function("auto_commit", |b| {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);
        let mut i = 0u64;
        b.iter(|| {
            db.add_fact(&format!("s{}", i % 1000), "knows", &format!("o{i}"))
                .unwrap();
            i += 1;
        });
    });

    group.bench_function("inside_tx", |b| {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);
        let mut i = 0u64;
        b.iter(|| {
            db.begin_tx(None, None).unwrap();
            for _ in 0..10 {
                db.add_fact(&format!("s{}", i % 1000), "knows", &format!("o{i}"))
                    .unwrap();
                i += 1;
            }
            db.commit_tx().unwrap();
        });
    });

    group.finish();
}

fn bench_flush(c: &mut Criterion) {
    let mut group = c.benchmark_group("flush");
    group.sample_size(20);

    group.bench_function("1k_staged_facts", |b| {
        b.iter_batched(
            || {
                let dir = TempDir::new().unwrap();
                let db = open_db(&dir);
                for i in 0..1000u32 {
                    db.add_fact(&format!("s{}", i % 50), "knows", &format!("o{i}"))
                        .unwrap();
                }
                (dir, db)
            },
            |(_dir, db)| {
                db.flush().unwrap();
            },
            BatchSize::LargeInput,
        );
    });

    group.finish();
}

fn bench_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("query");

    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    for i in 0..10_000u32 {
        db.add_fact(&format!("s{}", i % 100), "knows", &format!("o{i}"))
            .unwrap();
    }
    db.flush().unwrap();

    group.bench_function("point_by_subject", |b| {
        let pattern = FactPattern::with_subject("s42");
        b.iter(|| db.query(&pattern).unwrap());
    });

    group.bench_function("by_predicate", |b| {
        let pattern = FactPattern {
            predicate: Some("knows".into()),
            ..FactPattern::default()
        };
        b.iter(|| db.query(&pattern).unwrap());
    });

    group.finish();
}

criterion_group!(benches, bench_add_fact, bench_flush, bench_query);
criterion_main!(benches);
