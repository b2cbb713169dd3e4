//! Indexing and query benchmarks against the in-process engine.
//!
//! Run with: `cargo bench`
//! Save baseline: `cargo bench -- --save-baseline main`
//! Compare: `cargo bench -- --baseline main`

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use seekql::engine::memory::parser::parse_query;
use seekql::engine::{EngineQuery, MemoryEngine, SearchEngine};
use seekql::index::BulkIndexer;
use seekql::index::types::{CandidateDocument, WalkItem};
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(60);

fn sample_documents(count: usize) -> Vec<CandidateDocument> {
    (0..count)
        .map(|i| {
            let content = format!(
                r#"-- report {i}
SELECT o.id, o.status, c.name
FROM orders_{table} o
JOIN customers c ON c.id = o.customer_id
WHERE o.status = 'active' AND o.total > {i}
ORDER BY o.created_at DESC;
"#,
                i = i,
                table = i % 17
            );
            CandidateDocument {
                path: format!("/bench/sql/report_{:05}.sql", i),
                filename: format!("report_{:05}.sql", i),
                content,
            }
        })
        .collect()
}

fn bench_bulk_indexing(c: &mut Criterion) {
    let docs = sample_documents(5_000);

    let mut group = c.benchmark_group("bulk_indexing");
    group.sample_size(10);

    for parallel in [1usize, 4] {
        group.bench_with_input(
            BenchmarkId::new("5k_docs_parallel_chunks", parallel),
            &parallel,
            |b, &parallel| {
                b.iter(|| {
                    let engine = MemoryEngine::new();
                    let items: Vec<WalkItem> = docs.iter().cloned().map(Ok).collect();
                    BulkIndexer::new(&engine, 500)
                        .with_parallel_chunks(parallel)
                        .index(black_box(items))
                })
            },
        );
    }
    group.finish();
}

fn bench_query_parsing(c: &mut Criterion) {
    let queries = vec![
        "orders",
        "orders AND customers",
        "\"order by\"",
        "filename:report_*",
        "ord* OR custmer~1",
        "(status AND active) NOT deleted",
    ];

    let mut group = c.benchmark_group("query_parsing");
    for query in queries {
        group.bench_with_input(BenchmarkId::from_parameter(query), &query, |b, &q| {
            b.iter(|| parse_query(black_box(q)))
        });
    }
    group.finish();
}

fn bench_search(c: &mut Criterion) {
    let engine = MemoryEngine::new();
    for chunk in sample_documents(5_000).chunks(500) {
        engine.bulk_write(chunk, TIMEOUT).expect("bulk write");
    }

    let mut group = c.benchmark_group("search");
    for (name, query) in [
        ("term", "customers"),
        ("and", "orders_3 AND active"),
        ("phrase", "\"order by\""),
        ("wildcard", "orders_1*"),
        ("fuzzy", "custmers~1"),
    ] {
        let request = EngineQuery {
            query: query.to_string(),
            from: 0,
            size: 10,
            highlight: true,
        };
        group.bench_function(name, |b| {
            b.iter(|| engine.query(black_box(&request), TIMEOUT))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_bulk_indexing, bench_query_parsing, bench_search);

criterion_main!(benches);
