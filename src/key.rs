//! Key values, their ordering and their SQL encoding.
//!
//! Keys follow the IndexedDB key model: numbers, dates, strings, binary
//! strings and arrays of keys, ordered by type first
//! (`Number < Date < String < Binary < Array`) and then by value.
//!
//! Columns without a declared type (and `ARRAY` columns) store keys in an
//! order-preserving text encoding, so that SQLite's default `BINARY`
//! collation sorts encoded keys exactly as [`Key`]'s [`Ord`] does. Typed
//! columns store the native SQLite value.

use std::cmp::Ordering;
use std::fmt;

use serde_json::Value;

use crate::error::{Result, SchemaError};
use crate::sql::SqlValue;
use crate::types::DataType;

const TAG_NUMBER: u8 = 0x10;
const TAG_DATE: u8 = 0x20;
const TAG_STRING: u8 = 0x30;
const TAG_BINARY: u8 = 0x40;
const TAG_ARRAY: u8 = 0x50;
const TERMINATOR: u8 = 0x00;
const ESCAPE: u8 = 0x01;

#[derive(Debug, Clone)]
pub enum Key {
    Number(f64),
    /// Milliseconds since the Unix epoch.
    Date(i64),
    String(String),
    Binary(Vec<u8>),
    Array(Vec<Key>),
}

impl Key {
    fn rank(&self) -> u8 {
        match self {
            Key::Number(_) => 0,
            Key::Date(_) => 1,
            Key::String(_) => 2,
            Key::Binary(_) => 3,
            Key::Array(_) => 4,
        }
    }

    /// Convert a JSON value into a key. Objects, booleans and `null` are not
    /// valid keys, nor is an array containing one.
    pub fn from_json(value: &Value) -> Option<Key> {
        match value {
            Value::Number(n) => n.as_f64().map(Key::from),
            Value::String(s) => Some(Key::String(s.clone())),
            Value::Array(items) => items
                .iter()
                .map(Key::from_json)
                .collect::<Option<Vec<_>>>()
                .map(Key::Array),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Key::Number(n) => number_to_json(*n),
            Key::Date(ms) => Value::from(*ms),
            Key::String(s) => Value::String(s.clone()),
            Key::Binary(b) => Value::Array(b.iter().map(|x| Value::from(*x)).collect()),
            Key::Array(items) => Value::Array(items.iter().map(Key::to_json).collect()),
        }
    }

    /// Order-preserving text encoding.
    pub fn encode(&self) -> String {
        let mut buf = Vec::new();
        self.encode_into(&mut buf);
        let mut out = String::with_capacity(buf.len() * 2);
        for b in buf {
            out.push_str(&format!("{:02x}", b));
        }
        out
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        match self {
            Key::Number(n) => {
                buf.push(TAG_NUMBER);
                let bits = canonical(*n).to_bits();
                let ordered = if bits >> 63 == 1 {
                    !bits
                } else {
                    bits ^ (1 << 63)
                };
                buf.extend_from_slice(&ordered.to_be_bytes());
            }
            Key::Date(ms) => {
                buf.push(TAG_DATE);
                buf.extend_from_slice(&((*ms as u64) ^ (1 << 63)).to_be_bytes());
            }
            Key::String(s) => {
                buf.push(TAG_STRING);
                escape_into(s.as_bytes(), buf);
            }
            Key::Binary(b) => {
                buf.push(TAG_BINARY);
                escape_into(b, buf);
            }
            Key::Array(items) => {
                buf.push(TAG_ARRAY);
                for item in items {
                    item.encode_into(buf);
                }
                buf.push(TERMINATOR);
            }
        }
    }

    /// Inverse of [`Key::encode`].
    pub fn decode(s: &str) -> Result<Key> {
        let bytes = unhex(s).ok_or_else(|| SchemaError::invalid(format!("malformed key: {}", s)))?;
        let mut pos = 0;
        let key = decode_from(&bytes, &mut pos)
            .ok_or_else(|| SchemaError::invalid(format!("malformed key: {}", s)))?;
        if pos != bytes.len() {
            return Err(SchemaError::invalid(format!("trailing data in key: {}", s)));
        }
        Ok(key)
    }

    /// Encode for binding against a column of the given type.
    pub fn to_sql_value(&self, ty: Option<DataType>) -> SqlValue {
        match ty {
            None | Some(DataType::Array) => SqlValue::Text(self.encode()),
            Some(DataType::Date) => match self {
                Key::Date(ms) => SqlValue::Integer(*ms),
                Key::Number(n) => SqlValue::Integer(*n as i64),
                other => other.native_sql_value(DataType::Date),
            },
            Some(t) => self.native_sql_value(t),
        }
    }

    fn native_sql_value(&self, ty: DataType) -> SqlValue {
        match self {
            Key::Number(n) => {
                if ty == DataType::Integer && n.is_finite() && n.fract() == 0.0 {
                    SqlValue::Integer(*n as i64)
                } else {
                    SqlValue::Real(*n)
                }
            }
            Key::Date(ms) => SqlValue::Integer(*ms),
            Key::String(s) => SqlValue::Text(s.clone()),
            Key::Binary(b) => SqlValue::Blob(b.clone()),
            Key::Array(_) => SqlValue::Text(self.encode()),
        }
    }

    /// Decode a value read from a column of the given type.
    pub fn from_sql_value(value: &SqlValue, ty: Option<DataType>) -> Option<Key> {
        match (ty, value) {
            (_, SqlValue::Null) => None,
            (None | Some(DataType::Array), SqlValue::Text(s)) => {
                Some(Key::decode(s).unwrap_or_else(|_| Key::String(s.clone())))
            }
            (Some(DataType::Date), SqlValue::Integer(ms)) => Some(Key::Date(*ms)),
            (Some(DataType::Date), SqlValue::Real(ms)) => Some(Key::Date(*ms as i64)),
            (Some(DataType::Date), SqlValue::Text(s)) => s.trim().parse::<i64>().ok().map(Key::Date),
            (_, SqlValue::Integer(i)) => Some(Key::Number(*i as f64)),
            (_, SqlValue::Real(f)) => Some(Key::from(*f)),
            (_, SqlValue::Text(s)) => Some(Key::String(s.clone())),
            (_, SqlValue::Blob(b)) => Some(Key::Binary(b.clone())),
        }
    }
}

/// Collapse `-0.0` into `0.0`; key comparison does not tell them apart.
fn canonical(n: f64) -> f64 {
    if n == 0.0 {
        0.0
    } else {
        n
    }
}

fn number_to_json(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

fn escape_into(bytes: &[u8], buf: &mut Vec<u8>) {
    for &b in bytes {
        match b {
            TERMINATOR => buf.extend_from_slice(&[ESCAPE, 0x01]),
            ESCAPE => buf.extend_from_slice(&[ESCAPE, 0x02]),
            other => buf.push(other),
        }
    }
    buf.push(TERMINATOR);
}

fn unescape_from(bytes: &[u8], pos: &mut usize) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    loop {
        let b = *bytes.get(*pos)?;
        *pos += 1;
        match b {
            TERMINATOR => return Some(out),
            ESCAPE => {
                let next = *bytes.get(*pos)?;
                *pos += 1;
                out.push(next.checked_sub(1)?);
            }
            other => out.push(other),
        }
    }
}

fn decode_from(bytes: &[u8], pos: &mut usize) -> Option<Key> {
    let tag = *bytes.get(*pos)?;
    *pos += 1;
    match tag {
        TAG_NUMBER | TAG_DATE => {
            let raw: [u8; 8] = bytes.get(*pos..*pos + 8)?.try_into().ok()?;
            *pos += 8;
            let ordered = u64::from_be_bytes(raw);
            if tag == TAG_DATE {
                return Some(Key::Date((ordered ^ (1 << 63)) as i64));
            }
            let bits = if ordered >> 63 == 1 {
                ordered ^ (1 << 63)
            } else {
                !ordered
            };
            Some(Key::Number(f64::from_bits(bits)))
        }
        TAG_STRING => String::from_utf8(unescape_from(bytes, pos)?)
            .ok()
            .map(Key::String),
        TAG_BINARY => unescape_from(bytes, pos).map(Key::Binary),
        TAG_ARRAY => {
            let mut items = Vec::new();
            loop {
                if *bytes.get(*pos)? == TERMINATOR {
                    *pos += 1;
                    return Some(Key::Array(items));
                }
                items.push(decode_from(bytes, pos)?);
            }
        }
        _ => None,
    }
}

fn unhex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(s.get(i..i + 2)?, 16).ok())
        .collect()
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Key::Number(a), Key::Number(b)) => canonical(*a).total_cmp(&canonical(*b)),
            (Key::Date(a), Key::Date(b)) => a.cmp(b),
            (Key::String(a), Key::String(b)) => a.as_bytes().cmp(b.as_bytes()),
            (Key::Binary(a), Key::Binary(b)) => a.cmp(b),
            (Key::Array(a), Key::Array(b)) => a.cmp(b),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Number(n) => write!(f, "{}", n),
            Key::Date(ms) => write!(f, "Date({})", ms),
            Key::String(s) => write!(f, "{:?}", s),
            Key::Binary(b) => write!(f, "Binary({} bytes)", b.len()),
            Key::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<f64> for Key {
    fn from(n: f64) -> Self {
        Key::Number(canonical(n))
    }
}

impl From<i64> for Key {
    fn from(n: i64) -> Self {
        Key::Number(n as f64)
    }
}

impl From<i32> for Key {
    fn from(n: i32) -> Self {
        Key::Number(n as f64)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::String(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::String(s)
    }
}

impl From<Vec<Key>> for Key {
    fn from(items: Vec<Key>) -> Self {
        Key::Array(items)
    }
}

/// Read a dotted path (`a.b.c`) out of a JSON record.
pub fn value_at_path<'a>(record: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(record, |current, segment| current.get(segment))
}

/// Write `value` at the given path segments, creating intermediate objects.
pub fn set_at_path(record: &mut Value, segments: &[String], value: Value) {
    let Some((last, parents)) = segments.split_last() else {
        return;
    };
    let mut current = record;
    for segment in parents {
        if !current.get(segment).map_or(false, Value::is_object) {
            if !current.is_object() {
                *current = Value::Object(serde_json::Map::new());
            }
            current[segment.as_str()] = Value::Object(serde_json::Map::new());
        }
        current = &mut current[segment.as_str()];
    }
    if !current.is_object() {
        *current = Value::Object(serde_json::Map::new());
    }
    current[last.as_str()] = value;
}
