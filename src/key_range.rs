use std::cmp::Ordering;

use serde_json::{json, Value};

use crate::error::{Result, SchemaError};
use crate::key::Key;
use crate::sql::SqlValue;
use crate::types::DataType;

/// Bounds on a key or index column. `None` on a side means unbounded.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct KeyRange {
    pub lower: Option<Key>,
    pub upper: Option<Key>,
    pub lower_open: bool,
    pub upper_open: bool,
}

impl KeyRange {
    pub fn only(key: impl Into<Key>) -> Self {
        let key = key.into();
        Self {
            lower: Some(key.clone()),
            upper: Some(key),
            lower_open: false,
            upper_open: false,
        }
    }

    pub fn lower_bound(key: impl Into<Key>, open: bool) -> Self {
        Self {
            lower: Some(key.into()),
            lower_open: open,
            ..Default::default()
        }
    }

    pub fn upper_bound(key: impl Into<Key>, open: bool) -> Self {
        Self {
            upper: Some(key.into()),
            upper_open: open,
            ..Default::default()
        }
    }

    pub fn bound(
        lower: impl Into<Key>,
        upper: impl Into<Key>,
        lower_open: bool,
        upper_open: bool,
    ) -> Result<Self> {
        Self::new(Some(lower.into()), Some(upper.into()), lower_open, upper_open)
    }

    /// Every string key starting with `prefix`.
    pub fn starts_with(prefix: &str) -> Self {
        let mut upper = prefix.to_string();
        upper.push(char::MAX);
        Self {
            lower: Some(Key::String(prefix.to_string())),
            upper: Some(Key::String(upper)),
            lower_open: false,
            upper_open: false,
        }
    }

    /// Validating constructor.
    pub fn new(
        lower: Option<Key>,
        upper: Option<Key>,
        lower_open: bool,
        upper_open: bool,
    ) -> Result<Self> {
        if let (Some(l), Some(u)) = (&lower, &upper) {
            match l.cmp(u) {
                Ordering::Greater => {
                    return Err(SchemaError::InvalidKeyRange(format!(
                        "lower bound {} is greater than upper bound {}",
                        l, u
                    )))
                }
                Ordering::Equal if lower_open || upper_open => {
                    return Err(SchemaError::InvalidKeyRange(format!(
                        "equal bounds {} must both be closed",
                        l
                    )))
                }
                _ => {}
            }
        }
        Ok(Self {
            lower,
            upper,
            lower_open,
            upper_open,
        })
    }

    pub fn is_only(&self) -> bool {
        match (&self.lower, &self.upper) {
            (Some(l), Some(u)) => !self.lower_open && !self.upper_open && l == u,
            _ => false,
        }
    }

    pub fn contains(&self, key: &Key) -> bool {
        let above = match &self.lower {
            Some(l) if self.lower_open => key > l,
            Some(l) => key >= l,
            None => true,
        };
        let below = match &self.upper {
            Some(u) if self.upper_open => key < u,
            Some(u) => key <= u,
            None => true,
        };
        above && below
    }

    /// Append predicates on `column` (already quoted) to `wheres` and their
    /// bind values to `params`.
    pub fn to_sql(
        &self,
        column: &str,
        ty: Option<DataType>,
        wheres: &mut Vec<String>,
        params: &mut Vec<SqlValue>,
    ) {
        if self.is_only() {
            if let Some(key) = &self.lower {
                wheres.push(format!("{} = ?", column));
                params.push(key.to_sql_value(ty));
            }
            return;
        }
        if let Some(lower) = &self.lower {
            let op = if self.lower_open { ">" } else { ">=" };
            wheres.push(format!("{} {} ?", column, op));
            params.push(lower.to_sql_value(ty));
        }
        if let Some(upper) = &self.upper {
            let op = if self.upper_open { "<" } else { "<=" };
            wheres.push(format!("{} {} ?", column, op));
            params.push(upper.to_sql_value(ty));
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "lower": self.lower.as_ref().map(Key::to_json),
            "upper": self.upper.as_ref().map(Key::to_json),
            "lowerOpen": self.lower_open,
            "upperOpen": self.upper_open,
        })
    }

    pub fn from_json(value: &Value) -> Result<Self> {
        let bound = |field: &str| -> Result<Option<Key>> {
            match value.get(field) {
                None | Some(Value::Null) => Ok(None),
                Some(v) => Key::from_json(v).map(Some).ok_or_else(|| {
                    SchemaError::InvalidKeyRange(format!("{} is not a valid key: {}", field, v))
                }),
            }
        };
        let flag = |field: &str| value.get(field).and_then(Value::as_bool).unwrap_or(false);
        Self::new(bound("lower")?, bound("upper")?, flag("lowerOpen"), flag("upperOpen"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bound_validation() {
        assert!(KeyRange::bound(1, 2, false, false).is_ok());
        assert!(KeyRange::bound(1, 1, false, false).is_ok());
        assert!(KeyRange::bound(1, 1, true, false).is_err());
        assert!(KeyRange::bound(2, 1, false, false).is_err());
    }

    #[test]
    fn test_contains() {
        let range = KeyRange::bound(1, 5, true, false).unwrap();
        assert!(!range.contains(&Key::from(1)));
        assert!(range.contains(&Key::from(3)));
        assert!(range.contains(&Key::from(5)));
        assert!(!range.contains(&Key::from(6)));
        assert!(KeyRange::starts_with("ab").contains(&Key::from("abc")));
        assert!(!KeyRange::starts_with("ab").contains(&Key::from("ac")));
    }

    #[test]
    fn test_only_to_sql() {
        let mut wheres = Vec::new();
        let mut params = Vec::new();
        KeyRange::only(7).to_sql("\"id\"", Some(DataType::Integer), &mut wheres, &mut params);
        assert_eq!(wheres, vec!["\"id\" = ?"]);
        assert_eq!(params, vec![SqlValue::Integer(7)]);
    }

    #[test]
    fn test_open_bounds_to_sql() {
        let mut wheres = Vec::new();
        let mut params = Vec::new();
        KeyRange::bound(1, 9, true, false)
            .unwrap()
            .to_sql("\"n\"", Some(DataType::Integer), &mut wheres, &mut params);
        assert_eq!(wheres, vec!["\"n\" > ?", "\"n\" <= ?"]);
        assert_eq!(params, vec![SqlValue::Integer(1), SqlValue::Integer(9)]);

        let mut wheres = Vec::new();
        let mut params = Vec::new();
        KeyRange::upper_bound("m", true).to_sql("\"s\"", None, &mut wheres, &mut params);
        assert_eq!(wheres, vec!["\"s\" < ?"]);
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn test_json() {
        let range = KeyRange::from_json(&json!({"lower": 1, "upperOpen": true, "upper": 4})).unwrap();
        assert_eq!(range, KeyRange::bound(1, 4, false, true).unwrap());
        assert!(KeyRange::from_json(&json!({"lower": {"x": 1}})).is_err());
        assert_eq!(KeyRange::from_json(&range.to_json()).unwrap(), range);
    }
}
