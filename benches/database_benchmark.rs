use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::{json, Value};
use tempfile::tempdir;
use sencillo::core::config::Config;
use sencillo::core::database::Database;
use sencillo::core::types::PartitionSpec;
use sencillo::query::types::FindQuery;

/// Helper to build a test document
fn test_document(n: usize) -> Value {
    json!({
        "name": format!("document {}", n),
        "category": format!("category_{}", n % 10),
        "score": (n * 7) % 100,
    })
}

fn folder_db() -> (tempfile::TempDir, Database) {
    let dir = tempdir().expect("failed to create temp dir");
    let config = Config {
        folder: Some(dir.path().to_path_buf()),
        ..Config::default()
    };
    let db = Database::open(config).expect("failed to open database");
    (dir, db)
}

/// Benchmark single document insertion
fn bench_single_create(c: &mut Criterion) {
    let (_dir, db) = folder_db();
    c.bench_function("single_document_create", |b| {
        let mut n = 0;
        b.iter(|| {
            let doc = db
                .transaction(|tx| {
                    tx.create("bench", &PartitionSpec::default(), test_document(n))
                })
                .unwrap();
            black_box(doc);
            n += 1;
        });
    });
}

/// Benchmark batch insertion
fn bench_create_many(c: &mut Criterion) {
    let mut group = c.benchmark_group("create_many");
    for batch_size in [10, 100, 1000].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            batch_size,
            |b, &batch_size| {
                let (_dir, db) = folder_db();
                let batch: Vec<Value> = (0..batch_size).map(test_document).collect();
                b.iter(|| {
                    db.transaction(|tx| {
                        tx.create_many("bench", &PartitionSpec::default(), batch.clone())
                    })
                    .unwrap();
                });
            },
        );
    }
    group.finish();
}

/// Benchmark a full-scan operator query against a point lookup through
/// a secondary index over the same data
fn bench_query_paths(c: &mut Criterion) {
    let (_dir, db) = folder_db();
    db.transaction(|tx| {
        tx.ensure_index("bench", "category")?;
        let batch: Vec<Value> = (0..5000).map(test_document).collect();
        tx.create_many("bench", &PartitionSpec::default(), batch)?;
        Ok(())
    })
    .unwrap();

    c.bench_function("full_scan_filter", |b| {
        b.iter(|| {
            let docs = db
                .transaction(|tx| {
                    tx.find_many(
                        "bench",
                        FindQuery::with_filter_value(&json!({"score": {"$gt": 90}})),
                    )
                })
                .unwrap();
            black_box(docs);
        });
    });

    c.bench_function("secondary_index_lookup", |b| {
        b.iter(|| {
            let docs = db
                .transaction(|tx| {
                    tx.find_many(
                        "bench",
                        FindQuery::with_filter_value(&json!({"category": "category_3"})),
                    )
                })
                .unwrap();
            black_box(docs);
        });
    });
}

criterion_group!(
    benches,
    bench_single_create,
    bench_create_many,
    bench_query_paths
);
criterion_main!(benches);
