use crate::key_range::KeyRange;
use crate::types::QueryMethod;

/// A logical query against one store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub method: QueryMethod,
    /// Index name; `None` (or the primary column name) queries by primary key.
    pub index: Option<String>,
    pub range: Option<KeyRange>,
    pub reverse: bool,
    /// Collapse duplicate index values.
    pub unique: bool,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl Query {
    pub fn new(method: QueryMethod) -> Self {
        Self {
            method,
            ..Default::default()
        }
    }

    pub fn count() -> Self {
        Self::new(QueryMethod::Count)
    }

    pub fn index(mut self, name: impl Into<String>) -> Self {
        self.index = Some(name.into());
        self
    }

    pub fn range(mut self, range: KeyRange) -> Self {
        self.range = Some(range);
        self
    }

    pub fn reverse(mut self) -> Self {
        self.reverse = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let q = Query::new(QueryMethod::ListKeys)
            .index("tag")
            .range(KeyRange::only("a"))
            .reverse()
            .unique()
            .limit(5)
            .offset(10);
        assert_eq!(q.method, QueryMethod::ListKeys);
        assert_eq!(q.index.as_deref(), Some("tag"));
        assert!(q.reverse && q.unique);
        assert_eq!((q.limit, q.offset), (Some(5), Some(10)));
        assert_eq!(Query::count().method, QueryMethod::Count);
    }
}
