//! SQL fragments.
//!
//! Identifiers are always double-quoted through [`quote_ident`]; values never
//! appear in statement text, only as `?` placeholders with a parallel bind
//! list.

use std::collections::BTreeMap;
use std::fmt;

pub type SqlValue = rusqlite::types::Value;

/// A result row keyed by column name.
pub type Row = BTreeMap<String, SqlValue>;

/// Quote an identifier for SQLite, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `"table"."column"`
pub fn qualified(table: &str, column: &str) -> String {
    format!("{}.{}", quote_ident(table), quote_ident(column))
}

/// `n` comma separated placeholders.
pub fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn from_reverse(reverse: bool) -> Self {
        if reverse {
            Direction::Desc
        } else {
            Direction::Asc
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

/// Clauses of a compiled `SELECT`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlParts {
    pub select: String,
    pub from: String,
    /// Predicates joined by `AND`.
    pub wheres: Vec<String>,
    pub group: Option<String>,
    pub order: Vec<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl SqlParts {
    pub fn where_clause(&self) -> String {
        self.wheres.join(" AND ")
    }

    pub fn order_clause(&self) -> String {
        self.order.join(", ")
    }

    pub fn to_sql(&self) -> String {
        let mut sql = format!("SELECT {} FROM {}", self.select, self.from);
        if !self.wheres.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.where_clause());
        }
        if let Some(group) = &self.group {
            sql.push_str(" GROUP BY ");
            sql.push_str(group);
        }
        if !self.order.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order_clause());
        }
        match (self.limit, self.offset) {
            (Some(limit), offset) => {
                sql.push_str(&format!(" LIMIT {}", limit));
                if let Some(offset) = offset {
                    sql.push_str(&format!(" OFFSET {}", offset));
                }
            }
            // SQLite requires LIMIT before OFFSET
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {}", offset)),
            (None, None) => {}
        }
        sql
    }
}

impl fmt::Display for SqlParts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sql())
    }
}

/// Statement text with its bind values.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}
