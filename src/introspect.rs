//! Recover store schemas from the table definitions in `sqlite_master`.
//!
//! Only what the table SQL records is recovered: composite indexes come back
//! as plain columns and untyped columns as `TEXT`. Use
//! [`StoreSchema::hint_for_websql`] with the requested schema to restore the
//! rest.

use rusqlite::Connection;

use crate::error::Result;
use crate::index::IndexSchema;
use crate::schema::DatabaseSchema;
use crate::store::StoreSchema;
use crate::types::{
    DataType, KeyPath, DEFAULT_BLOB_COLUMN, PREFIX_MULTIENTRY, SQLITE_SPECIAL_COLUMN_NAME,
};

const INTERNAL_TABLES: [&str; 1] = ["__WebKitDatabaseInfoTable__"];

const TABLE_CONSTRAINTS: [&str; 5] = ["PRIMARY", "UNIQUE", "FOREIGN", "CHECK", "CONSTRAINT"];

#[derive(Debug, Clone, PartialEq)]
struct ColumnDef {
    name: String,
    sql_type: Option<String>,
    primary: bool,
    auto_increment: bool,
    unique: bool,
}

/// Read every store defined in the connected database.
pub fn inspect(conn: &Connection) -> Result<DatabaseSchema> {
    let mut stmt = conn.prepare(
        "SELECT name, sql FROM sqlite_master WHERE type = 'table' AND sql IS NOT NULL ORDER BY rowid",
    )?;
    let tables = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut stores = Vec::new();
    let mut side_tables = Vec::new();
    for (name, sql) in tables {
        if name.starts_with("sqlite_") || INTERNAL_TABLES.contains(&name.as_str()) {
            continue;
        }
        let Some(columns) = parse_columns(&sql) else {
            tracing::debug!(table = %name, "skipping table with unreadable definition");
            continue;
        };
        if let Some(rest) = name.strip_prefix(PREFIX_MULTIENTRY) {
            side_tables.push((rest.to_string(), columns));
        } else {
            stores.push(store_from_columns(&name, &columns)?);
        }
    }

    for (rest, columns) in side_tables {
        // store names may contain ':', so match the longest known store
        let owner = stores
            .iter_mut()
            .filter(|s| rest.starts_with(&format!("{}:", s.name())))
            .max_by_key(|s| s.name().len());
        let (Some(store), Some(column)) = (owner, columns.get(1)) else {
            tracing::debug!(table = %rest, "orphan multi-entry table");
            continue;
        };
        let index_name = rest[store.name().len() + 1..].to_string();
        let index = IndexSchema::from_parts(
            Some(index_name),
            Some(KeyPath::Single(column.name.clone())),
            column.sql_type.as_deref().and_then(DataType::parse),
            column.unique,
            true,
        )?;
        store.add_index(index)?;
    }

    tracing::debug!(stores = stores.len(), "inspected database");
    DatabaseSchema::new(None, stores)
}

fn store_from_columns(name: &str, columns: &[ColumnDef]) -> Result<StoreSchema> {
    let mut key_path = None;
    let mut data_type = None;
    let mut auto_increment = None;
    let mut fixed = true;
    let mut indexes = Vec::new();

    for column in columns {
        let ty = column.sql_type.as_deref().and_then(DataType::parse);
        if column.primary {
            if column.name != SQLITE_SPECIAL_COLUMN_NAME {
                key_path = Some(if column.name.contains(',') {
                    KeyPath::composite(column.name.split(','))
                } else {
                    KeyPath::Single(column.name.clone())
                });
            }
            data_type = ty;
            if column.auto_increment {
                auto_increment = Some(true);
            }
        } else if column.name == DEFAULT_BLOB_COLUMN {
            fixed = false;
        } else {
            indexes.push(IndexSchema::from_parts(
                Some(column.name.clone()),
                Some(KeyPath::Single(column.name.clone())),
                ty,
                column.unique,
                false,
            )?);
        }
    }
    if key_path.as_ref().map_or(false, KeyPath::is_composite) {
        data_type = None;
    }

    StoreSchema::new(
        name,
        key_path,
        auto_increment,
        data_type,
        indexes,
        false,
        fixed,
        false,
    )
}

/// Column definitions of a `CREATE TABLE` statement. Table constraints are
/// skipped.
fn parse_columns(sql: &str) -> Option<Vec<ColumnDef>> {
    let open = find_unquoted(sql, '(')?;
    let close = sql.rfind(')')?;
    if close <= open {
        return None;
    }
    let body = &sql[open + 1..close];
    let mut out = Vec::new();
    for def in split_unquoted(body, ',') {
        let tokens = split_unquoted(def.trim(), ' ');
        let mut tokens = tokens.into_iter().filter(|t| !t.is_empty());
        let Some(first) = tokens.next() else {
            continue;
        };
        if TABLE_CONSTRAINTS.contains(&first.to_uppercase().as_str()) {
            continue;
        }
        let rest: Vec<String> = tokens.map(|t| t.to_uppercase()).collect();
        let sql_type = rest
            .first()
            .filter(|t| !matches!(t.as_str(), "PRIMARY" | "UNIQUE" | "NOT" | "DEFAULT"))
            .cloned();
        out.push(ColumnDef {
            name: unquote(first),
            sql_type,
            primary: rest.iter().any(|t| t == "PRIMARY"),
            auto_increment: rest.iter().any(|t| t == "AUTOINCREMENT"),
            unique: rest.iter().any(|t| t == "UNIQUE"),
        });
    }
    Some(out)
}

fn find_unquoted(s: &str, needle: char) -> Option<usize> {
    let mut quote = None;
    for (i, c) in s.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' || c == '`' => quote = Some(c),
            None if c == needle => return Some(i),
            None => {}
        }
    }
    None
}

/// Split on `sep` outside quotes and parentheses.
fn split_unquoted(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quote = None;
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '"' | '\'' | '`' | '[' => quote = Some(if c == '[' { ']' } else { c }),
                '(' => depth += 1,
                ')' => depth = depth.saturating_sub(1),
                _ if c == sep && depth == 0 => {
                    parts.push(&s[start..i]);
                    start = i + c.len_utf8();
                }
                _ => {}
            },
        }
    }
    parts.push(&s[start..]);
    parts
}

fn unquote(token: &str) -> String {
    let bytes = token.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'"' && last == b'"') || (first == b'`' && last == b'`') {
            let q = first as char;
            return token[1..token.len() - 1].replace(&format!("{}{}", q, q), &q.to_string());
        }
        if first == b'[' && last == b']' {
            return token[1..token.len() - 1].to_string();
        }
    }
    token.to_string()
}
