//! Object store schema and its SQL compiler.
//!
//! A [`StoreSchema`] describes one logical record store: primary key path,
//! key type, secondary indexes. It compiles logical [`Query`] values into
//! SQLite statements, encodes records into column values, and compares or
//! reconciles itself with schemas introspected from a live database.
//!
//! ## Table layout
//!
//! - One table per store, named after the store. The primary key column is
//!   the key path (composite paths joined by `,`) or `_ROWID_` for
//!   out-of-line keys.
//! - One column per non multi-entry index, named after the index.
//! - `_default_` holds the JSON record unless the store is fixed.
//! - Each multi-entry index gets a side table `ydn.db.me:<store>:<index>`
//!   with one row per (primary key, element) pair, joined back on the
//!   primary key column.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::{Result, SchemaError};
use crate::index::{compare_key_path, IndexSchema};
use crate::key::{set_at_path, value_at_path, Key};
use crate::key_range::KeyRange;
use crate::query::Query;
use crate::sql::{qualified, quote_ident, Direction, Row, SqlParts, SqlValue};
use crate::types::{
    DataType, KeyPath, QueryMethod, Validation, DEFAULT_BLOB_COLUMN, ENTRY_COLUMN,
    PREFIX_MULTIENTRY, SQLITE_SPECIAL_COLUMN_NAME,
};

const STORE_FIELDS: [&str; 9] = [
    "name",
    "keyPath",
    "autoIncrement",
    "type",
    "indexes",
    "dispatchEvents",
    "fixed",
    "Sync",
    "encrypted",
];

const BASE64_MARKER: &str = ";base64,";

/// Called on the write path before a record change is persisted.
pub type WriteHook = Arc<dyn Fn(&WriteEvent<'_>) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Add,
    Put,
    Delete,
    Clear,
}

#[derive(Debug, Clone, Copy)]
pub struct WriteEvent<'a> {
    pub store: &'a str,
    pub kind: WriteKind,
    pub record: Option<&'a Value>,
    pub key: Option<&'a Key>,
}

/// Column names, placeholders and bind values for an `INSERT`.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlNamesValues {
    /// Quoted column names.
    pub columns: Vec<String>,
    pub slots: Vec<&'static str>,
    pub values: Vec<SqlValue>,
    /// Primary key, when it could be resolved.
    pub key: Option<Key>,
}

pub struct StoreSchema {
    name: String,
    key_path: Option<KeyPath>,
    auto_increment: Option<bool>,
    data_type: Option<DataType>,
    indexes: Vec<IndexSchema>,
    dispatch_events: bool,
    fixed: bool,
    encrypted: bool,
    key_paths: Vec<String>,
    key_column_type: &'static str,
    primary_column: String,
    primary_column_quoted: String,
    quoted_name: String,
    columns: OnceLock<Vec<String>>,
    current_key: AtomicU64,
    hooks: Vec<WriteHook>,
}

impl StoreSchema {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        key_path: Option<KeyPath>,
        auto_increment: Option<bool>,
        data_type: Option<DataType>,
        indexes: Vec<IndexSchema>,
        dispatch_events: bool,
        fixed: bool,
        encrypted: bool,
    ) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(SchemaError::invalid("store name must be a non-empty string"));
        }
        if let Some(kp) = &key_path {
            kp.validate()?;
        }
        let is_composite = key_path.as_ref().map_or(false, KeyPath::is_composite);
        if data_type.is_some() && is_composite {
            return Err(SchemaError::invalid(format!(
                "composite key for store \"{}\" must not specify type",
                name
            )));
        }
        if encrypted {
            if key_path.is_some() {
                return Err(SchemaError::invalid(format!(
                    "encrypted store \"{}\" must not use inline key",
                    name
                )));
            }
            if auto_increment == Some(true) {
                return Err(SchemaError::invalid(format!(
                    "encrypted store \"{}\" must not use key generator",
                    name
                )));
            }
        }
        for (i, index) in indexes.iter().enumerate() {
            index.validate()?;
            if indexes[..i].iter().any(|x| x.name() == index.name()) {
                return Err(SchemaError::invalid(format!(
                    "duplicate index \"{}\" in store \"{}\"",
                    index.name(),
                    name
                )));
            }
        }

        let data_type = data_type.or(if auto_increment == Some(true) {
            Some(DataType::Integer)
        } else {
            None
        });
        let key_paths = match &key_path {
            Some(KeyPath::Single(p)) => p.split('.').map(str::to_string).collect(),
            _ => Vec::new(),
        };
        let primary_column = key_path
            .as_ref()
            .map_or_else(|| SQLITE_SPECIAL_COLUMN_NAME.to_string(), KeyPath::column_name);

        Ok(Self {
            key_column_type: data_type.map_or("TEXT", |t| t.sql_type()),
            primary_column_quoted: quote_ident(&primary_column),
            quoted_name: quote_ident(&name),
            primary_column,
            key_paths,
            name,
            key_path,
            auto_increment,
            data_type,
            indexes,
            dispatch_events,
            fixed,
            encrypted,
            columns: OnceLock::new(),
            current_key: AtomicU64::new(0),
            hooks: Vec::new(),
        })
    }

    pub fn builder(name: impl Into<String>) -> StoreBuilder {
        StoreBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn quoted_name(&self) -> &str {
        &self.quoted_name
    }

    pub fn key_path(&self) -> Option<&KeyPath> {
        self.key_path.as_ref()
    }

    pub fn is_composite(&self) -> bool {
        self.key_path.as_ref().map_or(false, KeyPath::is_composite)
    }

    pub fn used_inline_key(&self) -> bool {
        self.key_path.is_some()
    }

    pub fn is_auto_increment(&self) -> Option<bool> {
        self.auto_increment
    }

    pub fn data_type(&self) -> Option<DataType> {
        self.data_type
    }

    /// Primary key column type used in `CREATE TABLE`.
    pub fn sql_type(&self) -> &'static str {
        self.key_column_type
    }

    pub fn is_fixed(&self) -> bool {
        self.fixed
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    pub fn dispatch_events(&self) -> bool {
        self.dispatch_events
    }

    pub fn sql_key_column_name(&self) -> &str {
        &self.primary_column
    }

    pub fn sql_key_column_name_quoted(&self) -> &str {
        &self.primary_column_quoted
    }

    pub fn indexes(&self) -> &[IndexSchema] {
        &self.indexes
    }

    pub fn count_index(&self) -> usize {
        self.indexes.len()
    }

    pub fn index(&self, i: usize) -> Option<&IndexSchema> {
        self.indexes.get(i)
    }

    pub fn get_index(&self, name: &str) -> Option<&IndexSchema> {
        self.indexes.iter().find(|x| x.name() == name)
    }

    pub fn get_index_by_key_path(&self, key_path: &KeyPath) -> Option<&IndexSchema> {
        self.indexes.iter().find(|x| x.equals_key_path(key_path))
    }

    /// True if `name` is an index or the primary key path.
    pub fn has_index(&self, name: &str) -> bool {
        matches!(&self.key_path, Some(KeyPath::Single(p)) if p == name)
            || self.indexes.iter().any(|x| x.name() == name)
    }

    pub fn has_index_by_key_path(&self, key_path: &KeyPath) -> bool {
        self.is_key_path(key_path) || self.get_index_by_key_path(key_path).is_some()
    }

    pub fn is_key_path(&self, key_path: &KeyPath) -> bool {
        self.key_path.as_ref() == Some(key_path)
    }

    /// Resolve an index name, or a composite key path, to the index name.
    pub fn get_index_name(&self, name_or_key_path: &KeyPath) -> Result<&str> {
        let (index, label) = match name_or_key_path {
            KeyPath::Single(name) => (self.get_index(name), name.clone()),
            KeyPath::Composite(paths) => (
                self.get_index_by_key_path(name_or_key_path),
                paths.join(", "),
            ),
        };
        index
            .map(IndexSchema::name)
            .ok_or_else(|| SchemaError::IndexNotFound {
                store: self.name.clone(),
                index: label,
            })
    }

    pub fn index_names(&self) -> Vec<&str> {
        self.indexes.iter().map(IndexSchema::name).collect()
    }

    pub fn index_key_paths(&self) -> Vec<&KeyPath> {
        self.indexes.iter().map(IndexSchema::key_path).collect()
    }

    /// Index names, used as WebSQL column names.
    pub fn columns(&self) -> &[String] {
        self.columns
            .get_or_init(|| self.indexes.iter().map(|x| x.name().to_string()).collect())
    }

    pub fn add_index(&mut self, index: IndexSchema) -> Result<()> {
        index.validate()?;
        if self.get_index(index.name()).is_some() {
            return Err(SchemaError::invalid(format!(
                "duplicate index \"{}\" in store \"{}\"",
                index.name(),
                self.name
            )));
        }
        self.indexes.push(index);
        self.columns = OnceLock::new();
        Ok(())
    }

    /// Side table backing a multi-entry index.
    pub fn multi_entry_table_name(&self, index: &IndexSchema) -> String {
        format!("{}{}:{}", PREFIX_MULTIENTRY, self.name, index.name())
    }

    fn resolve_index(&self, name: Option<&str>) -> Result<Option<&IndexSchema>> {
        match name {
            None => Ok(None),
            Some(n) if n == self.primary_column => Ok(None),
            Some(n) => self
                .get_index(n)
                .map(Some)
                .ok_or_else(|| SchemaError::IndexNotFound {
                    store: self.name.clone(),
                    index: n.to_string(),
                }),
        }
    }

    /// Column reference used in `WHERE` for an index: qualified by the side
    /// table for multi-entry indexes.
    fn index_filter_column(&self, index: &IndexSchema) -> String {
        if index.is_multi_entry() {
            qualified(&self.multi_entry_table_name(index), index.sql_column_name())
        } else {
            index.sql_column_name_quoted().to_string()
        }
    }

    /// Compile a query into its clauses, appending bind values to `params`.
    pub fn compile_query(&self, params: &mut Vec<SqlValue>, query: &Query) -> Result<SqlParts> {
        let index = self.resolve_index(query.index.as_deref())?;
        let q_key = &self.primary_column_quoted;
        let (q_effective, ty) = match index {
            Some(i) => (i.sql_column_name_quoted().to_string(), i.data_type()),
            None => (q_key.clone(), self.data_type),
        };
        // duplicate index values must be collapsed
        let dedup = query.unique && index.map_or(false, |i| !i.is_unique());

        let mut parts = SqlParts {
            from: self.quoted_name.clone(),
            limit: query.limit,
            offset: query.offset,
            ..Default::default()
        };

        let mut entry_column = None;
        let filter_column = match index.filter(|i| i.is_multi_entry()) {
            Some(idx) => {
                let side = quote_ident(&self.multi_entry_table_name(idx));
                let joined = self.index_filter_column(idx);
                let distinct = if query.unique { "DISTINCT " } else { "" };
                // repeated entries of one record differ only by side row
                let entry = if query.unique || query.method == QueryMethod::Count {
                    String::new()
                } else {
                    let column = format!("{}.rowid", side);
                    let select = format!(", {} AS {}", column, quote_ident(ENTRY_COLUMN));
                    entry_column = Some(column);
                    select
                };
                parts.select = match query.method {
                    QueryMethod::Count => format!("COUNT({}{})", distinct, joined),
                    m if m.is_key_listing() => format!(
                        "{}{}, {} AS {}{}",
                        distinct,
                        qualified(&self.name, &self.primary_column),
                        joined,
                        q_effective,
                        entry
                    ),
                    _ => format!(
                        "{}{}.*, {} AS {}{}",
                        distinct, self.quoted_name, joined, q_effective, entry
                    ),
                };
                parts.from = format!("{} INNER JOIN {} USING ({})", side, self.quoted_name, q_key);
                joined
            }
            None => {
                parts.select = match query.method {
                    QueryMethod::Count if dedup => format!("COUNT(DISTINCT {})", q_effective),
                    QueryMethod::Count => format!("COUNT({})", q_key),
                    m if m.is_key_listing() => match index {
                        Some(_) => format!("{}, {}", q_key, q_effective),
                        None => q_key.clone(),
                    },
                    _ => "*".to_string(),
                };
                q_effective.clone()
            }
        };

        if let Some(range) = &query.range {
            range.to_sql(&filter_column, ty, &mut parts.wheres, params);
        }

        if dedup && query.method != QueryMethod::Count {
            parts.group = Some(q_effective.clone());
        }

        let dir = Direction::from_reverse(query.reverse).as_str();
        parts.order.push(format!("{} {}", q_effective, dir));
        if index.is_some() {
            parts.order.push(format!("{} {}", q_key, dir));
        }
        if let Some(column) = entry_column {
            parts.order.push(format!("{} {}", column, dir));
        }

        Ok(parts)
    }

    /// Compile a query into a single `SELECT` statement.
    pub fn to_sql(&self, params: &mut Vec<SqlValue>, query: &Query) -> Result<String> {
        let sql = self.compile_query(params, query)?.to_sql();
        tracing::debug!(store = %self.name, %sql, "compiled query");
        Ok(sql)
    }

    /// Resume a scan just after (`open`) or at `key` on the effective column,
    /// tightening the lower bound going forward or the upper bound in
    /// reverse.
    pub fn continue_from_key(
        &self,
        params: &mut Vec<SqlValue>,
        query: &Query,
        key: &Key,
        open: bool,
    ) -> Result<String> {
        let range = narrow_range(query.range.as_ref(), key, query.reverse, open);
        let narrowed = Query {
            range: Some(range),
            ..query.clone()
        };
        self.to_sql(params, &narrowed)
    }

    /// Resume an index scan from an (index key, primary key) position. Rows
    /// sharing `index_key` are split by primary key order. A `unique` scan
    /// over a non-unique index returns one row per index key, so it resumes
    /// on the index key alone.
    pub fn continue_from_index_key(
        &self,
        params: &mut Vec<SqlValue>,
        query: &Query,
        index_key: &Key,
        open: bool,
        primary_key: &Key,
    ) -> Result<String> {
        self.continue_from_index_position(params, query, index_key, open, primary_key, None)
    }

    /// Like [`StoreSchema::continue_from_index_key`] for a multi-entry scan,
    /// also splitting repeated entries of one record by their side table
    /// row id.
    pub fn continue_from_index_entry(
        &self,
        params: &mut Vec<SqlValue>,
        query: &Query,
        index_key: &Key,
        open: bool,
        primary_key: &Key,
        entry: i64,
    ) -> Result<String> {
        self.continue_from_index_position(params, query, index_key, open, primary_key, Some(entry))
    }

    fn continue_from_index_position(
        &self,
        params: &mut Vec<SqlValue>,
        query: &Query,
        index_key: &Key,
        open: bool,
        primary_key: &Key,
        entry: Option<i64>,
    ) -> Result<String> {
        let index = self
            .resolve_index(query.index.as_deref())?
            .ok_or_else(|| {
                SchemaError::invalid(format!(
                    "continuing by index key in store \"{}\" requires a secondary index",
                    self.name
                ))
            })?;
        if query.unique && !index.is_unique() {
            return self.continue_from_key(params, query, index_key, open);
        }
        let mut parts = self.compile_query(params, query)?;

        let column = self.index_filter_column(index);
        let q_key = &self.primary_column_quoted;
        let (strict, tie) = match (query.reverse, open) {
            (true, true) => ("<", "<"),
            (true, false) => ("<", "<="),
            (false, true) => (">", ">"),
            (false, false) => (">", ">="),
        };
        let encoded = index_key.to_sql_value(index.data_type());
        let pk = primary_key.to_sql_value(self.data_type);
        match entry.filter(|_| index.is_multi_entry()) {
            Some(rowid) => {
                parts.wheres.push(format!(
                    "({col} {strict} ? OR ({col} = ? AND ({pk} {strict} ? OR ({pk} = ? AND {entry} {tie} ?))))",
                    col = column,
                    strict = strict,
                    pk = q_key,
                    entry = format!("{}.rowid", quote_ident(&self.multi_entry_table_name(index))),
                    tie = tie
                ));
                params.push(encoded.clone());
                params.push(encoded);
                params.push(pk.clone());
                params.push(pk);
                params.push(SqlValue::Integer(rowid));
            }
            None => {
                parts.wheres.push(format!(
                    "({col} {strict} ? OR ({col} = ? AND {pk} {tie} ?))",
                    col = column,
                    strict = strict,
                    pk = q_key,
                    tie = tie
                ));
                params.push(encoded.clone());
                params.push(encoded);
                params.push(pk);
            }
        }

        let sql = parts.to_sql();
        tracing::debug!(store = %self.name, %sql, "compiled index continuation");
        Ok(sql)
    }

    /// Primary key of a record: the out-of-line key for stores without a key
    /// path, otherwise the value(s) at the key path. A composite key resolves
    /// only when every component does.
    pub fn extract_key(&self, record: &Value, out_of_line: Option<&Key>) -> Option<Key> {
        match &self.key_path {
            None => out_of_line.cloned(),
            Some(KeyPath::Composite(paths)) => paths
                .iter()
                .map(|p| value_at_path(record, p).and_then(Key::from_json))
                .collect::<Option<Vec<_>>>()
                .map(Key::Array),
            Some(KeyPath::Single(path)) => value_at_path(record, path).and_then(Key::from_json),
        }
    }

    /// Primary key read from a result row, coerced by the declared type.
    pub fn get_row_value(&self, row: &Row) -> Option<Key> {
        self.key_path.as_ref()?;
        let value = row.get(&self.primary_column)?;
        match self.data_type {
            Some(DataType::Numeric) => match value {
                SqlValue::Integer(i) => Some(Key::Number(*i as f64)),
                SqlValue::Real(f) => Some(Key::Number(*f)),
                SqlValue::Text(s) => s.trim().parse::<f64>().ok().map(Key::Number),
                _ => None,
            },
            Some(DataType::Integer) => match value {
                SqlValue::Integer(i) => Some(Key::Number(*i as f64)),
                SqlValue::Real(f) => Some(Key::Number(f.trunc())),
                SqlValue::Text(s) => s.trim().parse::<i64>().ok().map(|i| Key::Number(i as f64)),
                _ => None,
            },
            ty => Key::from_sql_value(value, ty),
        }
    }

    /// Write `key` into the record at the key path. A composite key is
    /// spread over its component paths.
    pub fn set_key_value(&self, record: &mut Value, key: &Key) {
        match (&self.key_path, key) {
            (Some(KeyPath::Composite(paths)), Key::Array(parts)) => {
                for (path, part) in paths.iter().zip(parts) {
                    let segments: Vec<String> = path.split('.').map(str::to_string).collect();
                    set_at_path(record, &segments, part.to_json());
                }
            }
            _ => set_at_path(record, &self.key_paths, key.to_json()),
        }
    }

    /// Fallback key generator for backends without native auto-increment.
    /// Starts at 0 and is not persisted.
    pub fn generate_key(&self) -> u64 {
        self.current_key.fetch_add(1, Ordering::Relaxed)
    }

    pub fn generate_index(&self, record: &mut Value) {
        for index in &self.indexes {
            index.generate_index(record);
        }
    }

    pub fn add_hook<F>(&mut self, hook: F) -> usize
    where
        F: Fn(&WriteEvent<'_>) + Send + Sync + 'static,
    {
        self.hooks.push(Arc::new(hook));
        self.hooks.len() - 1
    }

    /// Invoke hooks in registration order, skipping `skip`.
    pub fn hook(&self, event: &WriteEvent<'_>, skip: Option<usize>) {
        for (i, hook) in self.hooks.iter().enumerate() {
            if skip != Some(i) {
                hook(event);
            }
        }
    }

    /// Columns and values for writing `record`.
    pub fn sql_names_values(
        &self,
        record: &Value,
        out_of_line: Option<&Key>,
        exclude_unique: bool,
    ) -> Result<SqlNamesValues> {
        let mut columns = Vec::new();
        let mut values = Vec::new();

        let key = match out_of_line {
            Some(k) => Some(k.clone()),
            None => self.extract_key(record, None),
        };
        if let Some(key) = &key {
            columns.push(self.primary_column_quoted.clone());
            values.push(key.to_sql_value(self.data_type));
        }

        for index in &self.indexes {
            let is_key_column = matches!(&self.key_path, Some(KeyPath::Single(p)) if p == index.name());
            if index.is_multi_entry()
                || is_key_column
                || index.name() == DEFAULT_BLOB_COLUMN
                || (exclude_unique && index.is_unique())
            {
                continue;
            }
            if let Some(idx_key) = index.extract_key(record) {
                values.push(idx_key.to_sql_value(index.data_type()));
                columns.push(index.sql_column_name_quoted().to_string());
            }
        }

        if !self.fixed {
            values.push(SqlValue::Text(serde_json::to_string(record)?));
            columns.push(quote_ident(DEFAULT_BLOB_COLUMN));
        } else if self.key_path.is_none() && self.indexes.is_empty() {
            let payload = match record {
                Value::String(s) if !s.contains(BASE64_MARKER) => s.clone(),
                other => serde_json::to_string(other)?,
            };
            values.push(SqlValue::Text(payload));
            columns.push(quote_ident(DEFAULT_BLOB_COLUMN));
        }

        Ok(SqlNamesValues {
            slots: vec!["?"; values.len()],
            columns,
            values,
            key,
        })
    }

    /// Rebuild a record from a row of a full-record query.
    pub fn parse_row(&self, row: &Row) -> Value {
        let blob = row.get(DEFAULT_BLOB_COLUMN).and_then(sql_text);
        if self.fixed && self.key_path.is_none() && self.indexes.is_empty() {
            if let Some(s) = blob {
                return serde_json::from_str(&s).unwrap_or(Value::String(s));
            }
        }
        let mut value = blob
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_else(|| Value::Object(Map::new()));

        if self.key_path.is_some() {
            let key = row
                .get(&self.primary_column)
                .and_then(|v| Key::from_sql_value(v, self.data_type));
            if let Some(key) = key {
                self.set_key_value(&mut value, &key);
            }
        }

        for index in &self.indexes {
            if index.sql_column_name() == DEFAULT_BLOB_COLUMN
                || index.is_composite()
                || index.is_multi_entry()
            {
                continue;
            }
            // JSON loses dates, and fixed stores keep no JSON copy
            if index.data_type() == Some(DataType::Date) || self.fixed {
                let key = row
                    .get(index.sql_column_name())
                    .and_then(|v| Key::from_sql_value(v, index.data_type()));
                if let Some(key) = key {
                    index.apply_value(&mut value, key.to_json());
                }
            }
        }
        value
    }

    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("name".into(), Value::String(self.name.clone()));
        obj.insert(
            "keyPath".into(),
            self.key_path.as_ref().map_or(Value::Null, KeyPath::to_json),
        );
        if let Some(auto) = self.auto_increment {
            obj.insert("autoIncrement".into(), Value::Bool(auto));
        }
        if let Some(t) = self.data_type {
            obj.insert("type".into(), Value::String(t.as_str().into()));
        }
        obj.insert(
            "indexes".into(),
            Value::Array(self.indexes.iter().map(IndexSchema::to_json).collect()),
        );
        for (field, set) in [
            ("dispatchEvents", self.dispatch_events),
            ("fixed", self.fixed),
            ("encrypted", self.encrypted),
        ] {
            if set {
                obj.insert(field.into(), Value::Bool(true));
            }
        }
        Value::Object(obj)
    }

    pub fn from_json(json: &Value) -> Result<Self> {
        Self::from_json_with(json, Validation::Strict)
    }

    pub fn from_json_with(json: &Value, validation: Validation) -> Result<Self> {
        let obj = json
            .as_object()
            .ok_or_else(|| SchemaError::invalid(format!("store schema must be an object: {}", json)))?;
        if validation == Validation::Strict {
            if let Some(key) = obj.keys().find(|k| !STORE_FIELDS.contains(&k.as_str())) {
                return Err(SchemaError::invalid(format!("Unknown attribute \"{}\"", key)));
            }
        }
        let name = match obj.get("name") {
            Some(Value::String(s)) => s.clone(),
            _ => return Err(SchemaError::invalid("store name must be a string")),
        };
        let key_path = KeyPath::from_json(obj.get("keyPath"))?;
        let auto_increment = match obj.get("autoIncrement") {
            None | Some(Value::Null) => None,
            Some(Value::Bool(b)) => Some(*b),
            Some(other) => {
                return Err(SchemaError::invalid(format!(
                    "autoIncrement of store \"{}\" must be a boolean, but found {}",
                    name, other
                )))
            }
        };
        let data_type = parse_store_type(&name, obj.get("type"))?;

        let mut indexes = Vec::new();
        if let Some(Value::Array(items)) = obj.get("indexes") {
            for item in items {
                let index = IndexSchema::from_json(item, validation)?;
                if key_path.as_ref() == Some(index.key_path()) {
                    // the primary key needs no index
                    continue;
                }
                indexes.push(index);
            }
        }
        let flag = |field: &str| obj.get(field).and_then(Value::as_bool).unwrap_or(false);

        Self::new(
            name,
            key_path,
            auto_increment,
            data_type,
            indexes,
            flag("dispatchEvents"),
            flag("fixed"),
            flag("encrypted"),
        )
    }

    /// Check a JSON descriptor, reporting every problem found.
    pub fn validate_json(json: &Value) -> std::result::Result<(), Vec<SchemaError>> {
        let Some(obj) = json.as_object() else {
            return Err(vec![SchemaError::invalid(format!(
                "store schema must be an object: {}",
                json
            ))]);
        };
        let mut errors = Vec::new();
        for key in obj.keys().filter(|k| !STORE_FIELDS.contains(&k.as_str())) {
            errors.push(SchemaError::invalid(format!("Unknown attribute \"{}\"", key)));
        }
        let name = match obj.get("name") {
            Some(Value::String(s)) => s.clone(),
            _ => {
                errors.push(SchemaError::invalid("store name must be a string"));
                String::new()
            }
        };
        if let Err(e) = KeyPath::from_json(obj.get("keyPath")) {
            errors.push(e);
        }
        if let Some(v) = obj.get("autoIncrement") {
            if !v.is_boolean() && !v.is_null() {
                errors.push(SchemaError::invalid(format!(
                    "autoIncrement of store \"{}\" must be a boolean, but found {}",
                    name, v
                )));
            }
        }
        if let Err(e) = parse_store_type(&name, obj.get("type")) {
            errors.push(e);
        }
        if let Some(Value::Array(items)) = obj.get("indexes") {
            for item in items {
                if let Err(e) = IndexSchema::from_json(item, Validation::Strict) {
                    errors.push(e);
                }
            }
        }
        if errors.is_empty() {
            if let Err(e) = Self::from_json(json) {
                errors.push(e);
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Same name and identical JSON form.
    pub fn equals(&self, other: &StoreSchema) -> bool {
        self.name == other.name && self.to_json() == other.to_json()
    }

    /// Empty when `other` is interchangeable with this store for querying,
    /// otherwise the first difference found.
    pub fn difference(&self, other: Option<&StoreSchema>) -> String {
        let Some(other) = other else {
            return format!("missing store: {}", self.name);
        };
        if self.name != other.name {
            return format!("store name, expect: {}, but: {}", self.name, other.name);
        }
        if let Some(msg) = compare_key_path(self.key_path.as_ref(), other.key_path.as_ref()) {
            return format!("keyPath, {}", msg);
        }
        if let (Some(a), Some(b)) = (self.auto_increment, other.auto_increment) {
            if a != b {
                return format!("autoIncrement, expect: {}, but: {}", a, b);
            }
        }
        if self.indexes.len() != other.indexes.len() {
            return format!(
                "indexes length, expect: {}, but: {}",
                self.indexes.len(),
                other.indexes.len()
            );
        }
        if let (Some(a), Some(b)) = (self.data_type, other.data_type) {
            if a != b {
                return format!("data type, expect: {}, but: {}", a, b);
            }
        }
        for index in &self.indexes {
            let msg = index.difference(other.get_index(index.name()));
            if !msg.is_empty() {
                return format!("index \"{}\" {}", index.name(), msg);
            }
        }
        String::new()
    }

    pub fn similar(&self, other: &StoreSchema) -> bool {
        self.difference(Some(other)).is_empty()
    }

    /// Recover BLOB indexes that IndexedDB introspection does not report,
    /// copying them from the requested schema.
    pub fn hint_for_idb(&mut self, guide: &StoreSchema) {
        for index in &guide.indexes {
            if !self.has_index(index.name()) && index.data_type() == Some(DataType::Blob) {
                self.indexes.push(index.clone());
            }
        }
        self.columns = OnceLock::new();
    }

    /// Merge this schema, introspected from a WebSQL/SQLite connection, with
    /// the requested schema `guide`, restoring what table introspection
    /// cannot see: composite key paths, composite indexes and untyped
    /// columns reported as `TEXT`.
    pub fn hint_for_websql(&self, guide: &StoreSchema) -> Result<StoreSchema> {
        if self.name != guide.name {
            return Err(SchemaError::StoreMismatch {
                expected: self.name.clone(),
                found: guide.name.clone(),
            });
        }
        let mut key_path = self.key_path.clone();
        let mut data_type = self.data_type;
        if data_type == Some(DataType::Text) {
            match guide.data_type {
                None => data_type = None,
                Some(DataType::Array) => data_type = Some(DataType::Array),
                Some(_) => {}
            }
        }
        if let (Some(KeyPath::Composite(paths)), Some(KeyPath::Single(flat))) =
            (&guide.key_path, &key_path)
        {
            if *flat == paths.join(",") {
                key_path = guide.key_path.clone();
            }
        }
        if key_path.as_ref().map_or(false, KeyPath::is_composite) {
            data_type = None;
        }

        let mut indexes = self.indexes.clone();
        // the column of a composite index is named after the index
        for composite in guide.indexes.iter().filter(|x| x.is_composite()) {
            if let Some(slot) = indexes.iter_mut().find(|x| x.name() == composite.name()) {
                *slot = composite.clone();
            }
        }
        for index in indexes.iter_mut() {
            if let Some(g) = guide.get_index(index.name()) {
                *index = index.hint(g);
            }
        }

        StoreSchema::new(
            guide.name.clone(),
            key_path,
            self.auto_increment,
            data_type,
            indexes,
            false,
            self.fixed,
            false,
        )
    }
}

fn parse_store_type(store: &str, value: Option<&Value>) -> Result<Option<DataType>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s == "undefined" || s == "null" => Ok(None),
        Some(Value::String(s)) => DataType::parse(s).map(Some).ok_or_else(|| {
            SchemaError::invalid(format!(
                "type \"{}\" for primary key in store \"{}\" is invalid.",
                s, store
            ))
        }),
        Some(other) => Err(SchemaError::invalid(format!(
            "type \"{}\" for primary key in store \"{}\" is invalid.",
            other, store
        ))),
    }
}

fn sql_text(value: &SqlValue) -> Option<String> {
    match value {
        SqlValue::Text(s) => Some(s.clone()),
        SqlValue::Blob(b) => String::from_utf8(b.clone()).ok(),
        _ => None,
    }
}

impl Clone for StoreSchema {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            key_path: self.key_path.clone(),
            auto_increment: self.auto_increment,
            data_type: self.data_type,
            indexes: self.indexes.clone(),
            dispatch_events: self.dispatch_events,
            fixed: self.fixed,
            encrypted: self.encrypted,
            key_paths: self.key_paths.clone(),
            key_column_type: self.key_column_type,
            primary_column: self.primary_column.clone(),
            primary_column_quoted: self.primary_column_quoted.clone(),
            quoted_name: self.quoted_name.clone(),
            columns: self.columns.clone(),
            current_key: AtomicU64::new(self.current_key.load(Ordering::Relaxed)),
            hooks: self.hooks.clone(),
        }
    }
}

impl fmt::Debug for StoreSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreSchema")
            .field("name", &self.name)
            .field("key_path", &self.key_path)
            .field("auto_increment", &self.auto_increment)
            .field("data_type", &self.data_type)
            .field("indexes", &self.indexes)
            .field("fixed", &self.fixed)
            .field("encrypted", &self.encrypted)
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

impl fmt::Display for StoreSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Store:{}[{}index]", self.name, self.indexes.len())
    }
}

impl Serialize for StoreSchema {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for StoreSchema {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let json = Value::deserialize(deserializer)?;
        StoreSchema::from_json(&json).map_err(serde::de::Error::custom)
    }
}

/// Builder for [`StoreSchema`].
#[derive(Debug, Clone, Default)]
pub struct StoreBuilder {
    name: String,
    key_path: Option<KeyPath>,
    auto_increment: Option<bool>,
    data_type: Option<DataType>,
    indexes: Vec<IndexSchema>,
    dispatch_events: bool,
    fixed: bool,
    encrypted: bool,
}

impl StoreBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn key_path(mut self, key_path: impl Into<KeyPath>) -> Self {
        self.key_path = Some(key_path.into());
        self
    }

    pub fn auto_increment(mut self, auto_increment: bool) -> Self {
        self.auto_increment = Some(auto_increment);
        self
    }

    pub fn data_type(mut self, data_type: DataType) -> Self {
        self.data_type = Some(data_type);
        self
    }

    pub fn index(mut self, index: IndexSchema) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn dispatch_events(mut self) -> Self {
        self.dispatch_events = true;
        self
    }

    pub fn fixed(mut self) -> Self {
        self.fixed = true;
        self
    }

    pub fn encrypted(mut self) -> Self {
        self.encrypted = true;
        self
    }

    pub fn build(self) -> Result<StoreSchema> {
        StoreSchema::new(
            self.name,
            self.key_path,
            self.auto_increment,
            self.data_type,
            self.indexes,
            self.dispatch_events,
            self.fixed,
            self.encrypted,
        )
    }
}

/// Tighten the bound on the scan's leading side to `key`, keeping an
/// existing bound that is already tighter.
fn narrow_range(range: Option<&KeyRange>, key: &Key, reverse: bool, open: bool) -> KeyRange {
    let mut range = range.cloned().unwrap_or_default();
    if reverse {
        if range.upper.as_ref().map_or(true, |u| key < u) {
            range.upper = Some(key.clone());
            range.upper_open = open;
        } else if range.upper.as_ref() == Some(key) {
            range.upper_open = open || range.upper_open;
        }
    } else if range.lower.as_ref().map_or(true, |l| key > l) {
        range.lower = Some(key.clone());
        range.lower_open = open;
    } else if range.lower.as_ref() == Some(key) {
        range.lower_open = open || range.lower_open;
    }
    range
}
