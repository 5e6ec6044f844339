//! End-to-end tests: compiled SQL executed against SQLite.
//!
//! Run these tests with: cargo test --test integration

use serde_json::json;
use storesql::{
    DataType, DatabaseSchema, Db, IndexSchema, Key, KeyPath, KeyRange, Position, Query,
    QueryMethod, Row, StoreSchema,
};

fn item_schema() -> DatabaseSchema {
    let item = StoreSchema::builder("item")
        .key_path("id")
        .data_type(DataType::Integer)
        .index(IndexSchema::new("bucket"))
        .build()
        .unwrap();
    let doc = StoreSchema::builder("doc")
        .key_path("id")
        .data_type(DataType::Integer)
        .index(IndexSchema::new("n").multi_entry())
        .build()
        .unwrap();
    DatabaseSchema::new(None, vec![item, doc]).unwrap()
}

fn seeded(n: i64) -> Db {
    let db = Db::open_memory(item_schema()).unwrap();
    // insert out of order so the scan order comes from the query
    for id in (1..=n).rev() {
        db.put("item", &json!({"id": id, "bucket": id % 3}), None)
            .unwrap();
    }
    db
}

/// Scan `query` page by page, returning each row's position.
fn scan_all(db: &Db, store: &str, query: &Query) -> Vec<Position> {
    let mut seen = Vec::new();
    let mut rows: Vec<Row> = db.rows(store, query).unwrap();
    while let Some(last) = rows.last() {
        for row in &rows {
            seen.push(db.position(store, query, row).unwrap().unwrap());
        }
        let pos = db.position(store, query, last).unwrap().unwrap();
        rows = db.page_after(store, query, &pos).unwrap();
    }
    seen
}

fn primary(pos: &Position) -> Key {
    match pos {
        Position::Primary(k) => k.clone(),
        Position::Index { primary_key, .. } => primary_key.clone(),
    }
}

#[test]
fn test_primary_pagination_is_exhaustive() {
    let db = seeded(23);
    let query = Query::new(QueryMethod::ListPrimaryKey).limit(5);
    let keys: Vec<Key> = scan_all(&db, "item", &query).iter().map(primary).collect();
    let expected: Vec<Key> = (1..=23).map(Key::from).collect();
    assert_eq!(keys, expected);

    let reverse = query.clone().reverse();
    let keys: Vec<Key> = scan_all(&db, "item", &reverse).iter().map(primary).collect();
    let expected: Vec<Key> = (1..=23).rev().map(Key::from).collect();
    assert_eq!(keys, expected);
}

#[test]
fn test_primary_pagination_within_range() {
    let db = seeded(23);
    let query = Query::new(QueryMethod::ListPrimaryKey)
        .range(KeyRange::bound(5, 17, true, false).unwrap())
        .limit(4);
    let keys: Vec<Key> = scan_all(&db, "item", &query).iter().map(primary).collect();
    let expected: Vec<Key> = (6..=17).map(Key::from).collect();
    assert_eq!(keys, expected);
}

#[test]
fn test_index_pagination_with_duplicates() {
    let db = seeded(20);
    let mut expected: Vec<(Key, Key)> = (1..=20)
        .map(|id| (Key::from(id % 3), Key::from(id)))
        .collect();
    expected.sort();

    // pages of 4 split runs of equal bucket values
    let query = Query::new(QueryMethod::ListKeys).index("bucket").limit(4);
    let positions = scan_all(&db, "item", &query);
    let pairs: Vec<(Key, Key)> = positions
        .into_iter()
        .map(|p| match p {
            Position::Index {
                key, primary_key, ..
            } => (key, primary_key),
            Position::Primary(_) => panic!("expected an index position"),
        })
        .collect();
    assert_eq!(pairs, expected);

    let reverse = query.clone().reverse();
    let pairs: Vec<Key> = scan_all(&db, "item", &reverse).iter().map(primary).collect();
    let expected_rev: Vec<Key> = expected.iter().rev().map(|(_, pk)| pk.clone()).collect();
    assert_eq!(pairs, expected_rev);
}

fn index_key(pos: &Position) -> Key {
    match pos {
        Position::Index { key, .. } => key.clone(),
        Position::Primary(_) => panic!("expected an index position"),
    }
}

#[test]
fn test_unique_index_pagination() {
    let db = seeded(9);
    let query = Query::new(QueryMethod::ListKeys)
        .index("bucket")
        .unique()
        .limit(1);
    let all = db.index_keys("item", &query.clone().limit(100)).unwrap();
    assert_eq!(all.len(), 3);

    let keys: Vec<Key> = scan_all(&db, "item", &query).iter().map(index_key).collect();
    assert_eq!(keys, vec![Key::from(0), Key::from(1), Key::from(2)]);

    let reverse = query.clone().reverse();
    let keys: Vec<Key> = scan_all(&db, "item", &reverse).iter().map(index_key).collect();
    assert_eq!(keys, vec![Key::from(2), Key::from(1), Key::from(0)]);
}

#[test]
fn test_index_pagination_within_range() {
    let db = seeded(20);
    let query = Query::new(QueryMethod::ListKeys)
        .index("bucket")
        .range(KeyRange::only(1))
        .limit(3);
    let keys: Vec<Key> = scan_all(&db, "item", &query).iter().map(primary).collect();
    let expected: Vec<Key> = (1..=20).filter(|id| id % 3 == 1).map(Key::from).collect();
    assert_eq!(keys, expected);
}

#[test]
fn test_multi_entry_distinctness() {
    let db = Db::open_memory(item_schema()).unwrap();
    db.put("doc", &json!({"id": 1, "n": [1, 2, 2, 3]}), None).unwrap();

    let unique = Query::count().index("n").unique();
    assert_eq!(db.count("doc", &unique).unwrap(), 3);
    assert_eq!(db.count("doc", &Query::count().index("n")).unwrap(), 4);

    let rows = db.rows("doc", &Query::new(QueryMethod::None).index("n")).unwrap();
    assert_eq!(rows.len(), 4);
    let values: Vec<Key> = rows
        .iter()
        .map(|r| Key::from_sql_value(&r["n"], None).unwrap())
        .collect();
    assert_eq!(
        values,
        vec![Key::from(1), Key::from(2), Key::from(2), Key::from(3)]
    );

    let keys = db
        .index_keys("doc", &Query::default().index("n").unique())
        .unwrap();
    assert_eq!(keys.len(), 3);

    let twos = Query::count().index("n").range(KeyRange::only(2));
    assert_eq!(db.count("doc", &twos).unwrap(), 2);
}

#[test]
fn test_multi_entry_pagination() {
    let db = Db::open_memory(item_schema()).unwrap();
    for id in 1..=6 {
        db.put("doc", &json!({"id": id, "n": [id % 2, 9]}), None).unwrap();
    }
    let query = Query::new(QueryMethod::ListKeys).index("n").limit(5);
    let positions = scan_all(&db, "doc", &query);
    assert_eq!(positions.len(), 12);
    let nines = positions
        .iter()
        .filter(|p| matches!(p, Position::Index { key, .. } if *key == Key::from(9)))
        .count();
    assert_eq!(nines, 6);
}

#[test]
fn test_multi_entry_pagination_keeps_repeated_entries() {
    let db = Db::open_memory(item_schema()).unwrap();
    db.put("doc", &json!({"id": 1, "n": [1, 2, 2, 3]}), None).unwrap();
    db.put("doc", &json!({"id": 2, "n": [2]}), None).unwrap();

    let query = Query::new(QueryMethod::ListKeys).index("n").limit(1);
    let one_shot = db.index_keys("doc", &query.clone().limit(100)).unwrap();
    assert_eq!(one_shot.len(), 5);

    let positions = scan_all(&db, "doc", &query);
    let pairs: Vec<(Key, Key)> = positions
        .iter()
        .map(|p| (index_key(p), primary(p)))
        .collect();
    assert_eq!(pairs, one_shot);

    let reverse = query.clone().reverse();
    let keys: Vec<Key> = scan_all(&db, "doc", &reverse).iter().map(index_key).collect();
    let expected: Vec<Key> = [3, 2, 2, 2, 1].into_iter().map(Key::from).collect();
    assert_eq!(keys, expected);
}

#[test]
fn test_composite_key_records() {
    let pair = StoreSchema::builder("pair")
        .key_path(KeyPath::composite(["a", "b"]))
        .build()
        .unwrap();
    let db = Db::open_memory(DatabaseSchema::new(None, vec![pair]).unwrap()).unwrap();

    let key = db.put("pair", &json!({"a": "x", "b": 1, "v": true}), None).unwrap();
    assert_eq!(key, Key::Array(vec![Key::from("x"), Key::from(1)]));

    let record = db.get("pair", &key).unwrap().unwrap();
    assert_eq!(record, json!({"a": "x", "b": 1, "v": true}));
    assert!(db.put("pair", &json!({"a": "x"}), None).is_err());
}

#[test]
fn test_date_index() {
    let event = StoreSchema::builder("event")
        .key_path("id")
        .index(IndexSchema::new("at").typed(DataType::Date).unwrap())
        .build()
        .unwrap();
    let db = Db::open_memory(DatabaseSchema::new(None, vec![event]).unwrap()).unwrap();
    for (id, at) in [("a", 3_000), ("b", 1_000), ("c", 2_000)] {
        db.put("event", &json!({"id": id, "at": at}), None).unwrap();
    }
    let query = Query::default()
        .index("at")
        .range(KeyRange::lower_bound(Key::Date(1_500), false));
    let keys = db.keys("event", &query).unwrap();
    assert_eq!(keys, vec![Key::from("c"), Key::from("a")]);
}

fn v1() -> DatabaseSchema {
    DatabaseSchema::from_json(&json!({
        "version": 1,
        "stores": [{
            "name": "post",
            "keyPath": "id",
            "type": "INTEGER",
            "indexes": [
                {"name": "slug"},
                {"name": "tags", "multiEntry": true},
                {"name": "at", "type": "DATE"}
            ]
        }]
    }))
    .unwrap()
}

#[test]
fn test_reopen_keeps_data() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("posts.db");
    let path = path.to_str().unwrap();

    {
        let db = Db::open(path, v1()).unwrap();
        db.put("post", &json!({"id": 1, "slug": "a", "tags": ["x"]}), None)
            .unwrap();
    }
    let db = Db::open(path, v1()).unwrap();
    assert_eq!(db.count("post", &Query::count()).unwrap(), 1);
    assert_eq!(db.count("post", &Query::count().index("tags")).unwrap(), 1);

    let live = db.inspect().unwrap();
    let hinted = live
        .get_store("post")
        .unwrap()
        .hint_for_websql(v1().get_store("post").unwrap())
        .unwrap();
    assert_eq!(v1().get_store("post").unwrap().difference(Some(&hinted)), "");
}

#[test]
fn test_changed_schema_recreates_table() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("posts.db");
    let path = path.to_str().unwrap();

    {
        let db = Db::open(path, v1()).unwrap();
        db.put("post", &json!({"id": 1, "slug": "a"}), None).unwrap();
    }

    let mut json = v1().to_json();
    json["stores"][0]["indexes"][0]["unique"] = json!(true);
    let v2 = DatabaseSchema::from_json(&json).unwrap();
    assert!(!v1().similar(&v2));

    let db = Db::open(path, v2).unwrap();
    assert_eq!(db.count("post", &Query::count()).unwrap(), 0);
    let live = db.inspect().unwrap();
    assert!(live.get_store("post").unwrap().get_index("slug").unwrap().is_unique());
}

#[test]
fn test_new_store_is_added() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("posts.db");
    let path = path.to_str().unwrap();

    {
        let db = Db::open(path, v1()).unwrap();
        db.put("post", &json!({"id": 7}), None).unwrap();
    }

    let mut schema = v1();
    schema
        .add_store(StoreSchema::builder("author").key_path("email").build().unwrap())
        .unwrap();
    let db = Db::open(path, schema).unwrap();
    assert_eq!(db.count("post", &Query::count()).unwrap(), 1);
    db.put("author", &json!({"email": "a@b.c"}), None).unwrap();
    assert_eq!(db.inspect().unwrap().count(), 2);
}

#[test]
fn test_reopen_with_composite_index_before_its_prefix() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("people.db");
    let path = path.to_str().unwrap();
    let schema = || {
        let person = StoreSchema::builder("p")
            .key_path("id")
            .index(IndexSchema::composite("name, age", ["name", "age"]))
            .index(IndexSchema::new("name"))
            .build()
            .unwrap();
        DatabaseSchema::new(None, vec![person]).unwrap()
    };

    {
        let db = Db::open(path, schema()).unwrap();
        db.put("p", &json!({"id": "a", "name": "ann", "age": 30}), None)
            .unwrap();
    }
    let db = Db::open(path, schema()).unwrap();
    assert_eq!(db.count("p", &Query::count()).unwrap(), 1);
    let query = Query::default().index("name").range(KeyRange::only("ann"));
    assert_eq!(db.keys("p", &query).unwrap(), vec![Key::from("a")]);
}
