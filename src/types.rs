use std::fmt;

use serde_json::Value;

use crate::error::{Result, SchemaError};

/// Column holding the primary key of stores without an inline key path.
pub const SQLITE_SPECIAL_COLUMN_NAME: &str = "_ROWID_";

/// Column holding the JSON-serialized record.
pub const DEFAULT_BLOB_COLUMN: &str = "_default_";

/// Prefix of the side table backing a multi-entry index.
pub const PREFIX_MULTIENTRY: &str = "ydn.db.me:";

/// Result column carrying the side table row of a multi-entry scan.
pub const ENTRY_COLUMN: &str = "_entry_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Text,
    Numeric,
    Integer,
    Date,
    Blob,
    Array,
}

impl DataType {
    pub const ALL: [DataType; 6] = [
        DataType::Blob,
        DataType::Date,
        DataType::Integer,
        DataType::Numeric,
        DataType::Text,
        DataType::Array,
    ];

    /// Exact, case-sensitive match against the canonical names.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Text => "TEXT",
            DataType::Numeric => "NUMERIC",
            DataType::Integer => "INTEGER",
            DataType::Date => "DATE",
            DataType::Blob => "BLOB",
            DataType::Array => "ARRAY",
        }
    }

    /// Column type used in `CREATE TABLE`.
    pub fn sql_type(&self) -> &'static str {
        match self {
            DataType::Array => "TEXT",
            other => other.as_str(),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Path (or paths) into a record from which a key is derived.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyPath {
    Single(String),
    Composite(Vec<String>),
}

impl KeyPath {
    pub fn composite<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        KeyPath::Composite(paths.into_iter().map(Into::into).collect())
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, KeyPath::Composite(_))
    }

    /// SQL column name: composite paths are joined by `,`.
    pub fn column_name(&self) -> String {
        match self {
            KeyPath::Single(p) => p.clone(),
            KeyPath::Composite(ps) => ps.join(","),
        }
    }

    /// Parse a JSON key path. `null` and absent are both `None`.
    pub fn from_json(value: Option<&Value>) -> Result<Option<KeyPath>> {
        match value {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(KeyPath::Single(s.clone()))),
            Some(Value::Array(items)) => {
                if items.is_empty() {
                    return Err(SchemaError::invalid("composite keyPath must not be empty"));
                }
                let mut paths = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::String(s) => paths.push(s.clone()),
                        other => {
                            return Err(SchemaError::invalid(format!(
                                "keyPath must be a string or array of strings, but found {}",
                                other
                            )))
                        }
                    }
                }
                Ok(Some(KeyPath::Composite(paths)))
            }
            Some(other) => Err(SchemaError::invalid(format!(
                "keyPath must be a string or array, but found {}",
                other
            ))),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            KeyPath::Single(p) => Value::String(p.clone()),
            KeyPath::Composite(ps) => Value::Array(ps.iter().cloned().map(Value::String).collect()),
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        match self {
            KeyPath::Single(p) if p.is_empty() => {
                Err(SchemaError::invalid("keyPath must not be empty"))
            }
            KeyPath::Composite(ps) if ps.is_empty() => {
                Err(SchemaError::invalid("composite keyPath must not be empty"))
            }
            _ => Ok(()),
        }
    }
}

impl From<&str> for KeyPath {
    fn from(s: &str) -> Self {
        KeyPath::Single(s.to_string())
    }
}

impl From<String> for KeyPath {
    fn from(s: String) -> Self {
        KeyPath::Single(s)
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPath::Single(p) => f.write_str(p),
            KeyPath::Composite(ps) => write!(f, "[{}]", ps.join(",")),
        }
    }
}

/// What a compiled query returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryMethod {
    /// Full records.
    #[default]
    None,
    Count,
    Get,
    ListKey,
    ListPrimaryKey,
    ListValue,
    ListKeys,
}

impl QueryMethod {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "none" | "values" | "records" => Some(QueryMethod::None),
            "count" => Some(QueryMethod::Count),
            "get" => Some(QueryMethod::Get),
            "key" | "list-key" => Some(QueryMethod::ListKey),
            "primary-key" | "list-primary-key" => Some(QueryMethod::ListPrimaryKey),
            "value" | "list-value" => Some(QueryMethod::ListValue),
            "keys" | "list-keys" => Some(QueryMethod::ListKeys),
            _ => None,
        }
    }

    /// Methods that project key columns only.
    pub fn is_key_listing(&self) -> bool {
        matches!(
            self,
            QueryMethod::ListKeys | QueryMethod::ListKey | QueryMethod::ListPrimaryKey
        )
    }
}

/// How strictly JSON schema descriptors are checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Validation {
    /// Unknown fields are rejected.
    #[default]
    Strict,
    /// Unknown fields are ignored.
    Lenient,
}
