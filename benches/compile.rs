use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use storesql::{Db, DatabaseSchema, IndexSchema, Key, KeyRange, Query, QueryMethod, StoreSchema};

fn create_store() -> StoreSchema {
    StoreSchema::builder("article")
        .key_path("id")
        .auto_increment(true)
        .index(IndexSchema::new("author"))
        .index(IndexSchema::new("slug").unique())
        .index(IndexSchema::new("tags").multi_entry())
        .index(IndexSchema::composite("author, year", ["author", "year"]))
        .build()
        .expect("Failed to build store")
}

// ============================================================================
// QUERY COMPILATION
// ============================================================================

fn bench_compile(c: &mut Criterion) {
    let store = create_store();
    let queries = [
        ("primary_range", Query::new(QueryMethod::None).range(KeyRange::lower_bound(10, true))),
        ("index_unique", Query::new(QueryMethod::ListKeys).index("author").unique()),
        ("multi_entry_count", Query::count().index("tags").unique()),
        ("reverse_limit", Query::new(QueryMethod::None).index("slug").reverse().limit(20)),
    ];

    let mut group = c.benchmark_group("to_sql");
    for (name, query) in queries.iter() {
        group.bench_with_input(BenchmarkId::from_parameter(name), query, |b, q| {
            b.iter(|| {
                let mut params = Vec::new();
                black_box(store.to_sql(&mut params, black_box(q)).unwrap());
            });
        });
    }
    group.finish();

    c.bench_function("continue_from_index_key", |b| {
        let query = Query::new(QueryMethod::ListKeys).index("author").limit(50);
        let index_key = Key::from("ann");
        let primary_key = Key::from(1234);
        b.iter(|| {
            let mut params = Vec::new();
            black_box(
                store
                    .continue_from_index_key(&mut params, &query, &index_key, true, &primary_key)
                    .unwrap(),
            );
        });
    });
}

// ============================================================================
// SCHEMA
// ============================================================================

fn bench_schema(c: &mut Criterion) {
    let store = create_store();
    let json = store.to_json();

    c.bench_function("store_from_json", |b| {
        b.iter(|| black_box(StoreSchema::from_json(black_box(&json)).unwrap()));
    });

    let other = StoreSchema::from_json(&json).unwrap();
    c.bench_function("store_difference", |b| {
        b.iter(|| black_box(store.difference(Some(&other))));
    });

    c.bench_function("sql_names_values", |b| {
        let record = json!({"id": 1, "author": "ann", "slug": "hello", "tags": ["a", "b"], "year": 2020});
        b.iter(|| black_box(store.sql_names_values(black_box(&record), None, false).unwrap()));
    });
}

// ============================================================================
// SQLITE ROUND TRIP
// ============================================================================

fn bench_put(c: &mut Criterion) {
    let schema = DatabaseSchema::new(None, vec![create_store()]).unwrap();
    let db = Db::open_memory(schema).expect("Failed to create Db instance");

    c.bench_function("put_with_multi_entry", |b| {
        let mut counter = 0;
        b.iter(|| {
            counter += 1;
            let record = json!({"id": counter, "author": "ann", "slug": format!("s{}", counter), "tags": ["a", "b", "c"]});
            db.put("article", &record, None).unwrap();
        });
    });
}

criterion_group!(benches, bench_compile, bench_schema, bench_put);
criterion_main!(benches);
