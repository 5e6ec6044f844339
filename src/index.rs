use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::{Result, SchemaError};
use crate::key::{set_at_path, value_at_path, Key};
use crate::sql::quote_ident;
use crate::types::{DataType, KeyPath, Validation};

/// Derives an index value from a record before it is written.
pub type IndexGenerator = Arc<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

const INDEX_FIELDS: [&str; 5] = ["name", "unique", "type", "keyPath", "multiEntry"];

/// A secondary index of a store.
#[derive(Clone)]
pub struct IndexSchema {
    name: String,
    key_path: KeyPath,
    data_type: Option<DataType>,
    unique: bool,
    multi_entry: bool,
    segments: Vec<String>,
    column_quoted: String,
    generator: Option<IndexGenerator>,
}

impl IndexSchema {
    /// Index named after, and keyed on, `path`.
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        Self::build(path.clone(), KeyPath::Single(path), None, false, false)
    }

    /// Index over several paths. The name is used as the column name.
    pub fn composite<I, S>(name: impl Into<String>, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::build(name.into(), KeyPath::composite(paths), None, false, false)
    }

    /// Full constructor. The name defaults to the key path (composite paths
    /// joined by `", "`) and the key path defaults to the name.
    pub fn from_parts(
        name: Option<String>,
        key_path: Option<KeyPath>,
        data_type: Option<DataType>,
        unique: bool,
        multi_entry: bool,
    ) -> Result<Self> {
        let (name, key_path) = match (name, key_path) {
            (Some(name), Some(kp)) => (name, kp),
            (Some(name), None) => (name.clone(), KeyPath::Single(name)),
            (None, Some(KeyPath::Single(p))) => (p.clone(), KeyPath::Single(p)),
            (None, Some(KeyPath::Composite(ps))) => (ps.join(", "), KeyPath::Composite(ps)),
            (None, None) => return Err(SchemaError::invalid("index requires a name or keyPath")),
        };
        let index = Self::build(name, key_path, data_type, unique, multi_entry);
        index.validate()?;
        Ok(index)
    }

    fn build(
        name: String,
        key_path: KeyPath,
        data_type: Option<DataType>,
        unique: bool,
        multi_entry: bool,
    ) -> Self {
        let segments = match &key_path {
            KeyPath::Single(p) => p.split('.').map(str::to_string).collect(),
            KeyPath::Composite(_) => Vec::new(),
        };
        let column_quoted = quote_ident(&name);
        Self {
            name,
            key_path,
            data_type,
            unique,
            multi_entry,
            segments,
            column_quoted,
            generator: None,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn multi_entry(mut self) -> Self {
        self.multi_entry = true;
        self
    }

    pub fn typed(mut self, data_type: DataType) -> Result<Self> {
        if self.key_path.is_composite() {
            return Err(SchemaError::invalid(format!(
                "composite index \"{}\" must not specify type",
                self.name
            )));
        }
        self.data_type = Some(data_type);
        Ok(self)
    }

    pub fn with_generator<F>(mut self, generator: F) -> Self
    where
        F: Fn(&Value) -> Option<Value> + Send + Sync + 'static,
    {
        self.generator = Some(Arc::new(generator));
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(SchemaError::invalid("index name must not be empty"));
        }
        self.key_path.validate()?;
        if self.key_path.is_composite() && self.data_type.is_some() {
            return Err(SchemaError::invalid(format!(
                "composite index \"{}\" must not specify type",
                self.name
            )));
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key_path(&self) -> &KeyPath {
        &self.key_path
    }

    pub fn data_type(&self) -> Option<DataType> {
        self.data_type
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    pub fn is_multi_entry(&self) -> bool {
        self.multi_entry
    }

    pub fn is_composite(&self) -> bool {
        self.key_path.is_composite()
    }

    pub fn has_generator(&self) -> bool {
        self.generator.is_some()
    }

    pub fn sql_column_name(&self) -> &str {
        &self.name
    }

    pub fn sql_column_name_quoted(&self) -> &str {
        &self.column_quoted
    }

    pub fn sql_type(&self) -> &'static str {
        self.data_type.map_or("TEXT", |t| t.sql_type())
    }

    /// Index value of a record. Composite keys resolve only when every
    /// component does.
    pub fn extract_key(&self, record: &Value) -> Option<Key> {
        match &self.key_path {
            KeyPath::Composite(paths) => paths
                .iter()
                .map(|p| value_at_path(record, p).and_then(Key::from_json))
                .collect::<Option<Vec<_>>>()
                .map(Key::Array),
            KeyPath::Single(path) => value_at_path(record, path).and_then(Key::from_json),
        }
    }

    /// Entries a multi-entry index holds for a record: one per element of an
    /// array value (duplicates kept), or the value itself otherwise.
    pub fn extract_entries(&self, record: &Value) -> Vec<Key> {
        let KeyPath::Single(path) = &self.key_path else {
            return self.extract_key(record).into_iter().collect();
        };
        match value_at_path(record, path) {
            Some(Value::Array(items)) => items.iter().filter_map(Key::from_json).collect(),
            Some(v) => Key::from_json(v).into_iter().collect(),
            None => Vec::new(),
        }
    }

    /// Write `value` into the record at this index's key path.
    pub fn apply_value(&self, record: &mut Value, value: Value) {
        set_at_path(record, &self.segments, value);
    }

    /// Run the generator, storing a string, number or array result.
    pub fn generate_index(&self, record: &mut Value) {
        let Some(generator) = &self.generator else {
            return;
        };
        if let Some(out) = generator(record) {
            if out.is_string() || out.is_number() || out.is_array() {
                self.apply_value(record, out);
            }
        }
    }

    pub fn equals_key_path(&self, key_path: &KeyPath) -> bool {
        compare_key_path(Some(&self.key_path), Some(key_path)).is_none()
    }

    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("name".into(), Value::String(self.name.clone()));
        obj.insert("keyPath".into(), self.key_path.to_json());
        if let Some(t) = self.data_type {
            obj.insert("type".into(), Value::String(t.as_str().into()));
        }
        obj.insert("unique".into(), Value::Bool(self.unique));
        obj.insert("multiEntry".into(), Value::Bool(self.multi_entry));
        Value::Object(obj)
    }

    pub fn from_json(json: &Value, validation: Validation) -> Result<Self> {
        let obj = json
            .as_object()
            .ok_or_else(|| SchemaError::invalid(format!("index must be an object: {}", json)))?;
        if validation == Validation::Strict {
            if let Some(field) = obj.keys().find(|k| !INDEX_FIELDS.contains(&k.as_str())) {
                return Err(SchemaError::invalid(format!(
                    "Unknown field: {} in {}",
                    field, json
                )));
            }
        }
        let name = match obj.get("name") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => {
                return Err(SchemaError::invalid(format!(
                    "index name must be a string, but found {}",
                    other
                )))
            }
        };
        let key_path = KeyPath::from_json(obj.get("keyPath"))?;
        let data_type = match obj.get("type") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s == "undefined" || s == "null" => None,
            Some(Value::String(s)) => Some(DataType::parse(s).ok_or_else(|| {
                SchemaError::invalid(format!(
                    "type \"{}\" invalid in index: {}",
                    s,
                    name.as_deref().unwrap_or("")
                ))
            })?),
            Some(other) => {
                return Err(SchemaError::invalid(format!("index type must be a string, but found {}", other)))
            }
        };
        let flag = |field: &str| obj.get(field).and_then(Value::as_bool).unwrap_or(false);
        Self::from_parts(name, key_path, data_type, flag("unique"), flag("multiEntry"))
    }

    /// Empty when `other` is interchangeable with this index for querying,
    /// otherwise the first difference found.
    pub fn difference(&self, other: Option<&IndexSchema>) -> String {
        let Some(other) = other else {
            return format!("no index for {}", self.name);
        };
        if self.name != other.name {
            return format!("name, expect: {}, but: {}", self.name, other.name);
        }
        if let Some(msg) = compare_key_path(Some(&self.key_path), Some(&other.key_path)) {
            return format!("keyPath, {}", msg);
        }
        if self.unique != other.unique {
            return format!("unique, expect: {}, but: {}", self.unique, other.unique);
        }
        if self.multi_entry != other.multi_entry {
            return format!(
                "multiEntry, expect: {}, but: {}",
                self.multi_entry, other.multi_entry
            );
        }
        if let (Some(a), Some(b)) = (self.data_type, other.data_type) {
            if a != b {
                return format!("data type, expect: {}, but: {}", a, b);
            }
        }
        String::new()
    }

    /// Copy of this index named after `guide`, dropping a `TEXT` type the
    /// guide does not declare (introspection reports untyped and `ARRAY`
    /// columns as `TEXT`).
    pub fn hint(&self, guide: &IndexSchema) -> IndexSchema {
        debug_assert_eq!(self.name, guide.name, "index name mismatch");
        let data_type = match (self.data_type, guide.data_type) {
            (Some(DataType::Text), None) => None,
            // ARRAY columns are declared TEXT
            (Some(DataType::Text), Some(DataType::Array)) => Some(DataType::Array),
            (t, _) => t,
        };
        let mut hinted = Self::build(
            guide.name.clone(),
            self.key_path.clone(),
            data_type,
            self.unique,
            self.multi_entry,
        );
        hinted.generator = self.generator.clone();
        hinted
    }
}

/// `None` when both key paths are equivalent, otherwise an explanation.
pub fn compare_key_path(a: Option<&KeyPath>, b: Option<&KeyPath>) -> Option<String> {
    match (a, b) {
        (None, None) => None,
        (None, Some(b)) => Some(format!("newly define {}", b)),
        (Some(a), None) => Some(format!("keyPath: {} no longer defined", a)),
        (Some(a), Some(b)) if a == b => None,
        (Some(a), Some(b)) => Some(format!("expect: {}, but: {}", a, b)),
    }
}

impl PartialEq for IndexSchema {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.key_path == other.key_path
            && self.data_type == other.data_type
            && self.unique == other.unique
            && self.multi_entry == other.multi_entry
    }
}

impl fmt::Debug for IndexSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexSchema")
            .field("name", &self.name)
            .field("key_path", &self.key_path)
            .field("data_type", &self.data_type)
            .field("unique", &self.unique)
            .field("multi_entry", &self.multi_entry)
            .field("generator", &self.generator.is_some())
            .finish()
    }
}

impl fmt::Display for IndexSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.multi_entry {
            f.write_str("MultiEntry")?;
        }
        if self.is_composite() {
            f.write_str("Compound")?;
        }
        write!(f, "Index:{}", self.name)
    }
}
