use rusqlite::{params_from_iter, Connection, ErrorCode};
use serde_json::Value;
use std::sync::Mutex;

use crate::ddl;
use crate::error::{Result, SchemaError};
use crate::introspect;
use crate::key::Key;
use crate::key_range::KeyRange;
use crate::query::Query;
use crate::schema::DatabaseSchema;
use crate::sql::{Row, SqlValue, Statement};
use crate::store::{StoreSchema, WriteEvent, WriteKind};
use crate::types::{QueryMethod, ENTRY_COLUMN};

/// Where a paged scan stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum Position {
    /// Last primary key returned by a primary key scan.
    Primary(Key),
    /// Last (index key, primary key) pair returned by an index scan, with
    /// the side table row for multi-entry scans.
    Index {
        key: Key,
        primary_key: Key,
        entry: Option<i64>,
    },
}

/// Store records of a [`DatabaseSchema`] in SQLite.
pub struct Db {
    conn: Mutex<Connection>,
    schema: DatabaseSchema,
}

impl Db {
    /// Open or create a database at the given path, migrating its tables to
    /// `schema`.
    pub fn open(path: &str, schema: DatabaseSchema) -> Result<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;

        let db = Self {
            conn: Mutex::new(conn),
            schema,
        };

        db.migrate()?;
        Ok(db)
    }

    /// Open an in-memory database (useful for testing)
    pub fn open_memory(schema: DatabaseSchema) -> Result<Self> {
        Self::open(":memory:", schema)
    }

    /// Create missing tables and recreate tables whose definition no longer
    /// matches the schema. Recreated tables lose their rows.
    fn migrate(&self) -> Result<()> {
        let mut conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let tx = conn.transaction()?;
        let live = introspect::inspect(&tx)?;

        for store in self.schema.stores() {
            match live.get_store(store.name()) {
                None => {
                    create_tables(&tx, store)?;
                    tracing::info!(store = %store.name(), "created table");
                }
                Some(existing) => {
                    let hinted = existing.hint_for_websql(store)?;
                    let diff = store.difference(Some(&hinted));
                    if diff.is_empty() {
                        // picks up side tables and indexes added since
                        create_tables(&tx, store)?;
                        continue;
                    }
                    tracing::warn!(store = %store.name(), %diff, "schema changed, recreating table");
                    for sql in ddl::drop_table_statements(&hinted) {
                        tx.execute_batch(&sql)?;
                    }
                    create_tables(&tx, store)?;
                }
            }
        }
        for name in live.store_names() {
            if !self.schema.has_store(name) {
                tracing::debug!(store = %name, "table not in schema, left untouched");
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn schema(&self) -> &DatabaseSchema {
        &self.schema
    }

    /// Schema read back from the database tables.
    pub fn inspect(&self) -> Result<DatabaseSchema> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        introspect::inspect(&conn)
    }

    /// Register a write hook on a store. Returns its position for `hook`'s
    /// skip argument.
    pub fn add_hook<F>(&mut self, store: &str, hook: F) -> Result<usize>
    where
        F: Fn(&WriteEvent<'_>) + Send + Sync + 'static,
    {
        let store = self
            .schema
            .get_store_mut(store)
            .ok_or_else(|| SchemaError::StoreNotFound(store.to_string()))?;
        Ok(store.add_hook(hook))
    }

    /// Insert or replace a record. Returns its primary key.
    pub fn put(&self, store: &str, record: &Value, key: Option<&Key>) -> Result<Key> {
        self.write(store, record, key, WriteKind::Put)
    }

    /// Insert a record, failing with `Constraint` if the key exists.
    pub fn add(&self, store: &str, record: &Value, key: Option<&Key>) -> Result<Key> {
        self.write(store, record, key, WriteKind::Add)
    }

    fn write(&self, name: &str, record: &Value, key: Option<&Key>, kind: WriteKind) -> Result<Key> {
        let store = self.schema.store(name)?;
        let mut record = record.clone();
        store.generate_index(&mut record);

        let nv = store.sql_names_values(&record, key, false)?;
        if nv.key.is_none() && store.is_auto_increment() != Some(true) {
            return Err(SchemaError::MissingKey(name.to_string()));
        }

        let mut conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let tx = conn.transaction()?;
        if let (WriteKind::Put, Some(existing)) = (kind, &nv.key) {
            for stmt in ddl::delete_sql(store, Some(&KeyRange::only(existing.clone()))) {
                execute(&tx, &stmt)?;
            }
        }
        execute(&tx, &ddl::insert_statement(store, &nv, false))?;
        let key = match nv.key {
            Some(k) => k,
            None => Key::Number(tx.last_insert_rowid() as f64),
        };

        for index in store.indexes().iter().filter(|i| i.is_multi_entry()) {
            let mut entries = index.extract_entries(&record);
            if index.is_unique() {
                entries.sort();
                entries.dedup();
            }
            let values = entries
                .iter()
                .map(|e| e.to_sql_value(index.data_type()))
                .collect();
            let pk = key.to_sql_value(store.data_type());
            for stmt in ddl::multi_entry_insert(store, index.name(), pk, values) {
                execute(&tx, &stmt)?;
            }
        }
        tx.commit()?;
        drop(conn);
        tracing::debug!(store = %name, %key, ?kind, "wrote record");
        store.hook(
            &WriteEvent {
                store: name,
                kind,
                record: Some(&record),
                key: Some(&key),
            },
            None,
        );
        Ok(key)
    }

    /// Record stored under `key`.
    pub fn get(&self, store: &str, key: &Key) -> Result<Option<Value>> {
        let schema = self.schema.store(store)?;
        let query = Query::new(QueryMethod::Get)
            .range(KeyRange::only(key.clone()))
            .limit(1);
        let rows = self.rows(store, &query)?;
        Ok(rows.first().map(|row| schema.parse_row(row)))
    }

    pub fn count(&self, store: &str, query: &Query) -> Result<u64> {
        let schema = self.schema.store(store)?;
        let query = Query {
            method: QueryMethod::Count,
            limit: None,
            offset: None,
            ..query.clone()
        };
        let mut params = Vec::new();
        let sql = schema.to_sql(&mut params, &query)?;
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let n: i64 = conn.query_row(&sql, params_from_iter(params.iter()), |row| row.get(0))?;
        Ok(n.max(0) as u64)
    }

    /// Primary keys in query order.
    pub fn keys(&self, store: &str, query: &Query) -> Result<Vec<Key>> {
        let schema = self.schema.store(store)?;
        let query = Query {
            method: QueryMethod::ListPrimaryKey,
            ..query.clone()
        };
        Ok(self
            .rows(store, &query)?
            .iter()
            .filter_map(|row| primary_key(schema, row))
            .collect())
    }

    /// (index key, primary key) pairs of an index scan, in query order.
    pub fn index_keys(&self, store: &str, query: &Query) -> Result<Vec<(Key, Key)>> {
        let schema = self.schema.store(store)?;
        let query = Query {
            method: QueryMethod::ListKeys,
            ..query.clone()
        };
        let rows = self.rows(store, &query)?;
        Ok(rows
            .iter()
            .filter_map(|row| entry(schema, &query, row))
            .collect())
    }

    /// Records in query order.
    pub fn values(&self, store: &str, query: &Query) -> Result<Vec<Value>> {
        let schema = self.schema.store(store)?;
        let query = Query {
            method: QueryMethod::None,
            ..query.clone()
        };
        Ok(self
            .rows(store, &query)?
            .iter()
            .map(|row| schema.parse_row(row))
            .collect())
    }

    /// Raw result rows of a compiled query.
    pub fn rows(&self, store: &str, query: &Query) -> Result<Vec<Row>> {
        let schema = self.schema.store(store)?;
        let mut params = Vec::new();
        let sql = schema.to_sql(&mut params, query)?;
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        read_rows(&conn, &sql, &params)
    }

    /// Next rows of a scan after `position`, honouring the query's range,
    /// direction and limit.
    pub fn page_after(&self, store: &str, query: &Query, position: &Position) -> Result<Vec<Row>> {
        let schema = self.schema.store(store)?;
        let mut params = Vec::new();
        let sql = match position {
            Position::Primary(key) => schema.continue_from_key(&mut params, query, key, true)?,
            Position::Index {
                key,
                primary_key,
                entry: Some(rowid),
            } => schema.continue_from_index_entry(&mut params, query, key, true, primary_key, *rowid)?,
            Position::Index {
                key,
                primary_key,
                entry: None,
            } => schema.continue_from_index_key(&mut params, query, key, true, primary_key)?,
        };
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        read_rows(&conn, &sql, &params)
    }

    /// Position of a row returned by a scan with `query`.
    pub fn position(&self, store: &str, query: &Query, row: &Row) -> Result<Option<Position>> {
        let schema = self.schema.store(store)?;
        Ok(match &query.index {
            Some(index) if index != schema.sql_key_column_name() => {
                entry(schema, query, row).map(|(key, primary_key)| Position::Index {
                    key,
                    primary_key,
                    entry: match row.get(ENTRY_COLUMN) {
                        Some(SqlValue::Integer(rowid)) => Some(*rowid),
                        _ => None,
                    },
                })
            }
            _ => primary_key(schema, row).map(Position::Primary),
        })
    }

    /// Delete the record stored under `key`. Returns the number of records
    /// removed.
    pub fn delete(&self, store: &str, key: &Key) -> Result<usize> {
        self.remove(store, Some(&KeyRange::only(key.clone())), WriteKind::Delete)
    }

    /// Delete every record whose primary key is in `range` (all when `None`).
    pub fn clear(&self, store: &str, range: Option<&KeyRange>) -> Result<usize> {
        self.remove(store, range, WriteKind::Clear)
    }

    fn remove(&self, name: &str, range: Option<&KeyRange>, kind: WriteKind) -> Result<usize> {
        let store = self.schema.store(name)?;
        let mut conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let tx = conn.transaction()?;
        let mut removed = 0;
        for stmt in ddl::delete_sql(store, range) {
            removed = execute(&tx, &stmt)?;
        }
        tx.commit()?;
        drop(conn);
        tracing::debug!(store = %name, removed, "deleted records");
        store.hook(
            &WriteEvent {
                store: name,
                kind,
                record: None,
                key: range.filter(|r| r.is_only()).and_then(|r| r.lower.as_ref()),
            },
            None,
        );
        Ok(removed)
    }
}

fn create_tables(conn: &Connection, store: &StoreSchema) -> Result<()> {
    for sql in ddl::create_table_statements(store) {
        conn.execute_batch(&sql)?;
    }
    Ok(())
}

/// Run a statement, mapping constraint failures to `SchemaError::Constraint`.
fn execute(conn: &Connection, stmt: &Statement) -> Result<usize> {
    match conn.execute(&stmt.sql, params_from_iter(stmt.params.iter())) {
        Ok(n) => Ok(n),
        Err(rusqlite::Error::SqliteFailure(e, msg)) if e.code == ErrorCode::ConstraintViolation => {
            Err(SchemaError::Constraint(msg.unwrap_or_else(|| e.to_string())))
        }
        Err(e) => Err(e.into()),
    }
}

fn read_rows(conn: &Connection, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
    let mut stmt = conn.prepare(sql)?;
    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let rows = stmt
        .query_map(params_from_iter(params.iter()), |row| {
            let mut out = Row::new();
            for (i, name) in names.iter().enumerate() {
                out.insert(name.clone(), row.get::<_, SqlValue>(i)?);
            }
            Ok(out)
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn primary_key(store: &StoreSchema, row: &Row) -> Option<Key> {
    let value = row.get(store.sql_key_column_name())?;
    Key::from_sql_value(value, store.data_type())
}

fn entry(store: &StoreSchema, query: &Query, row: &Row) -> Option<(Key, Key)> {
    let index = store.get_index(query.index.as_deref()?)?;
    let value = row.get(index.sql_column_name())?;
    Some((
        Key::from_sql_value(value, index.data_type())?,
        primary_key(store, row)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexSchema;
    use crate::types::DataType;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn schema() -> DatabaseSchema {
        let post = StoreSchema::builder("post")
            .key_path("id")
            .data_type(DataType::Integer)
            .index(IndexSchema::new("author"))
            .index(IndexSchema::new("slug").unique())
            .index(IndexSchema::new("tags").multi_entry())
            .build()
            .unwrap();
        let note = StoreSchema::builder("note").auto_increment(true).build().unwrap();
        let kv = StoreSchema::builder("kv").build().unwrap();
        DatabaseSchema::new(Some(1.0), vec![post, note, kv]).unwrap()
    }

    #[test]
    fn test_put_get() {
        let db = Db::open_memory(schema()).unwrap();

        let key = db
            .put("post", &json!({"id": 1, "author": "ann", "slug": "a", "title": "Hi"}), None)
            .unwrap();
        assert_eq!(key, Key::from(1));

        let record = db.get("post", &key).unwrap().unwrap();
        assert_eq!(record["title"], json!("Hi"));
        assert_eq!(record["id"], json!(1));
        assert_eq!(db.get("post", &Key::from(2)).unwrap(), None);
    }

    #[test]
    fn test_put_overwrite() {
        let db = Db::open_memory(schema()).unwrap();

        db.put("post", &json!({"id": 1, "slug": "a", "tags": ["x", "y"]}), None)
            .unwrap();
        db.put("post", &json!({"id": 1, "slug": "b", "tags": ["z"]}), None)
            .unwrap();

        assert_eq!(db.count("post", &Query::count()).unwrap(), 1);
        assert_eq!(db.count("post", &Query::count().index("tags")).unwrap(), 1);
        let record = db.get("post", &Key::from(1)).unwrap().unwrap();
        assert_eq!(record["slug"], json!("b"));
    }

    #[test]
    fn test_add_existing_key() {
        let db = Db::open_memory(schema()).unwrap();

        db.add("post", &json!({"id": 1}), None).unwrap();
        let err = db.add("post", &json!({"id": 1}), None).unwrap_err();
        assert!(matches!(err, SchemaError::Constraint(_)));
    }

    #[test]
    fn test_unique_index_violation() {
        let db = Db::open_memory(schema()).unwrap();

        db.put("post", &json!({"id": 1, "slug": "same"}), None).unwrap();
        let err = db
            .put("post", &json!({"id": 2, "slug": "same"}), None)
            .unwrap_err();
        assert!(matches!(err, SchemaError::Constraint(_)));
        assert!(db.get("post", &Key::from(1)).unwrap().is_some());
    }

    #[test]
    fn test_missing_key() {
        let db = Db::open_memory(schema()).unwrap();

        let err = db.put("post", &json!({"title": "no id"}), None).unwrap_err();
        assert!(matches!(err, SchemaError::MissingKey(_)));
        let err = db.put("kv", &json!("v"), None).unwrap_err();
        assert!(matches!(err, SchemaError::MissingKey(_)));
        assert!(matches!(
            db.put("nope", &json!({}), None),
            Err(SchemaError::StoreNotFound(_))
        ));
    }

    #[test]
    fn test_auto_increment() {
        let db = Db::open_memory(schema()).unwrap();

        let a = db.add("note", &json!({"text": "a"}), None).unwrap();
        let b = db.add("note", &json!({"text": "b"}), None).unwrap();
        assert!(b > a);
        assert_eq!(db.get("note", &b).unwrap().unwrap()["text"], json!("b"));
    }

    #[test]
    fn test_out_of_line_keys() {
        let db = Db::open_memory(schema()).unwrap();

        for (k, v) in [("b", 2), ("a", 1), ("c", 3)] {
            db.put("kv", &json!({"v": v}), Some(&Key::from(k))).unwrap();
        }
        let keys = db.keys("kv", &Query::default()).unwrap();
        assert_eq!(keys, vec![Key::from("a"), Key::from("b"), Key::from("c")]);

        let reversed = db.keys("kv", &Query::default().reverse().limit(2)).unwrap();
        assert_eq!(reversed, vec![Key::from("c"), Key::from("b")]);
    }

    #[test]
    fn test_index_queries() {
        let db = Db::open_memory(schema()).unwrap();

        db.put("post", &json!({"id": 1, "author": "bob"}), None).unwrap();
        db.put("post", &json!({"id": 2, "author": "ann"}), None).unwrap();
        db.put("post", &json!({"id": 3, "author": "bob"}), None).unwrap();

        let by_author = db
            .index_keys("post", &Query::default().index("author"))
            .unwrap();
        assert_eq!(
            by_author,
            vec![
                (Key::from("ann"), Key::from(2)),
                (Key::from("bob"), Key::from(1)),
                (Key::from("bob"), Key::from(3)),
            ]
        );

        let bob = Query::default().index("author").range(KeyRange::only("bob"));
        assert_eq!(db.count("post", &bob).unwrap(), 2);
        assert_eq!(
            db.count("post", &Query::count().index("author").unique()).unwrap(),
            2
        );
        let authors = db
            .index_keys("post", &Query::default().index("author").unique())
            .unwrap();
        assert_eq!(authors.len(), 2);
    }

    #[test]
    fn test_delete_and_clear() {
        let db = Db::open_memory(schema()).unwrap();

        for id in 1..=5 {
            db.put("post", &json!({"id": id, "tags": ["t"]}), None).unwrap();
        }
        assert_eq!(db.delete("post", &Key::from(1)).unwrap(), 1);
        assert_eq!(db.delete("post", &Key::from(1)).unwrap(), 0);
        assert_eq!(db.count("post", &Query::count().index("tags")).unwrap(), 4);

        let removed = db
            .clear("post", Some(&KeyRange::bound(2, 3, false, false).unwrap()))
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(db.count("post", &Query::count()).unwrap(), 2);
        assert_eq!(db.count("post", &Query::count().index("tags")).unwrap(), 2);

        db.clear("post", None).unwrap();
        assert_eq!(db.count("post", &Query::count()).unwrap(), 0);
        assert_eq!(db.count("post", &Query::count().index("tags")).unwrap(), 0);
    }

    #[test]
    fn test_hooks() {
        let mut db = Db::open_memory(schema()).unwrap();
        let writes = Arc::new(AtomicUsize::new(0));
        let counter = writes.clone();
        db.add_hook("post", move |e| {
            if e.kind == WriteKind::Put {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();
        assert!(db.add_hook("nope", |_| {}).is_err());

        db.put("post", &json!({"id": 1, "slug": "s"}), None).unwrap();
        db.put("post", &json!({"id": 2}), None).unwrap();
        db.delete("post", &Key::from(1)).unwrap();
        assert_eq!(writes.load(Ordering::SeqCst), 2);

        // a rejected write notifies nobody
        db.put("post", &json!({"id": 3, "slug": "t"}), None).unwrap();
        let err = db.put("post", &json!({"id": 4, "slug": "t"}), None).unwrap_err();
        assert!(matches!(err, SchemaError::Constraint(_)));
        assert_eq!(writes.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_page_after() {
        let db = Db::open_memory(schema()).unwrap();

        for id in 1..=5 {
            db.put("post", &json!({"id": id}), None).unwrap();
        }
        let query = Query::new(QueryMethod::ListPrimaryKey).limit(2);
        let first = db.rows("post", &query).unwrap();
        let pos = db.position("post", &query, first.last().unwrap()).unwrap().unwrap();
        assert_eq!(pos, Position::Primary(Key::from(2)));

        let next = db.page_after("post", &query, &pos).unwrap();
        let ids: Vec<_> = next.iter().map(|r| r["id"].clone()).collect();
        assert_eq!(ids, vec![SqlValue::Integer(3), SqlValue::Integer(4)]);
    }

    #[test]
    fn test_inspect() {
        let db = Db::open_memory(schema()).unwrap();
        let live = db.inspect().unwrap();
        assert_eq!(live.store_names(), vec!["post", "note", "kv"]);
        assert!(live.similar(&live.clone()));
        assert_eq!(db.schema().version(), Some(1.0));
    }
}
