use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::{Result, SchemaError};
use crate::store::StoreSchema;
use crate::types::Validation;

/// The set of stores making up one database.
#[derive(Debug, Clone, Default)]
pub struct DatabaseSchema {
    version: Option<f64>,
    stores: Vec<StoreSchema>,
}

impl DatabaseSchema {
    pub fn new(version: Option<f64>, stores: Vec<StoreSchema>) -> Result<Self> {
        for (i, store) in stores.iter().enumerate() {
            if stores[..i].iter().any(|s| s.name() == store.name()) {
                return Err(SchemaError::invalid(format!(
                    "duplicate store \"{}\"",
                    store.name()
                )));
            }
        }
        Ok(Self { version, stores })
    }

    pub fn version(&self) -> Option<f64> {
        self.version
    }

    pub fn stores(&self) -> &[StoreSchema] {
        &self.stores
    }

    pub fn count(&self) -> usize {
        self.stores.len()
    }

    pub fn store_names(&self) -> Vec<&str> {
        self.stores.iter().map(StoreSchema::name).collect()
    }

    pub fn get_store(&self, name: &str) -> Option<&StoreSchema> {
        self.stores.iter().find(|s| s.name() == name)
    }

    pub fn get_store_mut(&mut self, name: &str) -> Option<&mut StoreSchema> {
        self.stores.iter_mut().find(|s| s.name() == name)
    }

    /// Like [`get_store`](Self::get_store), failing with `StoreNotFound`.
    pub fn store(&self, name: &str) -> Result<&StoreSchema> {
        self.get_store(name)
            .ok_or_else(|| SchemaError::StoreNotFound(name.to_string()))
    }

    pub fn has_store(&self, name: &str) -> bool {
        self.get_store(name).is_some()
    }

    pub fn add_store(&mut self, store: StoreSchema) -> Result<()> {
        if self.has_store(store.name()) {
            return Err(SchemaError::invalid(format!(
                "duplicate store \"{}\"",
                store.name()
            )));
        }
        self.stores.push(store);
        Ok(())
    }

    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        if let Some(v) = self.version {
            obj.insert("version".into(), Value::from(v));
        }
        obj.insert(
            "stores".into(),
            Value::Array(self.stores.iter().map(StoreSchema::to_json).collect()),
        );
        Value::Object(obj)
    }

    pub fn from_json(json: &Value) -> Result<Self> {
        Self::from_json_with(json, Validation::Strict)
    }

    pub fn from_json_with(json: &Value, validation: Validation) -> Result<Self> {
        let obj = json
            .as_object()
            .ok_or_else(|| SchemaError::invalid("database schema must be an object"))?;
        if validation == Validation::Strict {
            if let Some(key) = obj.keys().find(|k| !matches!(k.as_str(), "version" | "stores")) {
                return Err(SchemaError::invalid(format!("Unknown attribute \"{}\"", key)));
            }
        }
        let version = match obj.get("version") {
            None | Some(Value::Null) => None,
            Some(v) => Some(v.as_f64().ok_or_else(|| {
                SchemaError::invalid(format!("version must be a number, but found {}", v))
            })?),
        };
        let stores = match obj.get("stores") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| StoreSchema::from_json_with(item, validation))
                .collect::<Result<Vec<_>>>()?,
            Some(other) => {
                return Err(SchemaError::invalid(format!(
                    "stores must be an array, but found {}",
                    other
                )))
            }
        };
        Self::new(version, stores)
    }

    /// Empty when `other` holds a similar store for each store here,
    /// otherwise the first difference found.
    pub fn difference(&self, other: &DatabaseSchema) -> String {
        if self.stores.len() != other.stores.len() {
            return format!(
                "Number of store, expect: {}, but: {}",
                self.stores.len(),
                other.stores.len()
            );
        }
        for store in &self.stores {
            let msg = store.difference(other.get_store(store.name()));
            if !msg.is_empty() {
                return format!("store: \"{}\" {}", store.name(), msg);
            }
        }
        String::new()
    }

    pub fn similar(&self, other: &DatabaseSchema) -> bool {
        self.difference(other).is_empty()
    }
}

impl fmt::Display for DatabaseSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Schema:[{}]", self.store_names().join(", "))
    }
}

impl Serialize for DatabaseSchema {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DatabaseSchema {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let json = Value::deserialize(deserializer)?;
        DatabaseSchema::from_json(&json).map_err(serde::de::Error::custom)
    }
}
