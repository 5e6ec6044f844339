//! Table definitions and write statements for a store.

use crate::key_range::KeyRange;
use crate::sql::{placeholders, quote_ident, SqlValue, Statement};
use crate::store::{SqlNamesValues, StoreSchema};
use crate::types::{DataType, DEFAULT_BLOB_COLUMN};

/// `CREATE TABLE` / `CREATE INDEX` statements for a store: the main table,
/// one side table per multi-entry index, then the secondary indexes.
pub fn create_table_statements(store: &StoreSchema) -> Vec<String> {
    let q_key = store.sql_key_column_name_quoted();
    let mut columns = vec![format!("{} {} PRIMARY KEY", q_key, store.sql_type())];
    if store.is_auto_increment() == Some(true) && store.sql_type() == "INTEGER" {
        columns[0].push_str(" AUTOINCREMENT");
    }
    if has_blob_column(store) {
        columns.push(format!("{} BLOB", quote_ident(DEFAULT_BLOB_COLUMN)));
    }

    let mut side_tables = Vec::new();
    let mut indexes = Vec::new();
    for index in store.indexes() {
        if index.name() == store.sql_key_column_name() || index.name() == DEFAULT_BLOB_COLUMN {
            continue;
        }
        let unique = if index.is_unique() { " UNIQUE" } else { "" };
        if index.is_multi_entry() {
            let table = quote_ident(&store.multi_entry_table_name(index));
            side_tables.push(format!(
                "CREATE TABLE IF NOT EXISTS {} ({} {}, {} {}{})",
                table,
                q_key,
                store.sql_type(),
                index.sql_column_name_quoted(),
                index.sql_type(),
                unique
            ));
            side_tables.push(format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                quote_ident(&format!("{}-{}", store.multi_entry_table_name(index), index.name())),
                table,
                index.sql_column_name_quoted()
            ));
            continue;
        }
        columns.push(format!(
            "{} {}{}",
            index.sql_column_name_quoted(),
            index.sql_type(),
            unique
        ));
        // unique columns are indexed by their constraint
        if !index.is_unique() && index.data_type() != Some(DataType::Blob) {
            indexes.push(format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                quote_ident(&format!("{}-{}", store.name(), index.name())),
                store.quoted_name(),
                index.sql_column_name_quoted()
            ));
        }
    }

    let mut out = Vec::with_capacity(1 + side_tables.len() + indexes.len());
    out.push(format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        store.quoted_name(),
        columns.join(", ")
    ));
    out.extend(side_tables);
    out.extend(indexes);
    for sql in &out {
        tracing::debug!(store = %store.name(), %sql, "ddl");
    }
    out
}

/// Whether the store keeps the JSON record in `_default_`.
pub fn has_blob_column(store: &StoreSchema) -> bool {
    !store.is_fixed() || (!store.used_inline_key() && store.count_index() == 0)
}

pub fn drop_table_statements(store: &StoreSchema) -> Vec<String> {
    let mut out: Vec<String> = store
        .indexes()
        .iter()
        .filter(|i| i.is_multi_entry())
        .map(|i| {
            format!(
                "DROP TABLE IF EXISTS {}",
                quote_ident(&store.multi_entry_table_name(i))
            )
        })
        .collect();
    out.push(format!("DROP TABLE IF EXISTS {}", store.quoted_name()));
    out
}

/// `INSERT` (or `INSERT OR REPLACE`) of the encoded record.
pub fn insert_statement(store: &StoreSchema, nv: &SqlNamesValues, replace: bool) -> Statement {
    let verb = if replace { "INSERT OR REPLACE" } else { "INSERT" };
    let sql = format!(
        "{} INTO {} ({}) VALUES ({})",
        verb,
        store.quoted_name(),
        nv.columns.join(", "),
        nv.slots.join(", ")
    );
    Statement::new(sql, nv.values.clone())
}

/// Rows of one multi-entry side table for a record's primary key.
pub fn multi_entry_insert(
    store: &StoreSchema,
    index_name: &str,
    primary_key: SqlValue,
    entries: Vec<SqlValue>,
) -> Vec<Statement> {
    let Some(index) = store.get_index(index_name) else {
        return Vec::new();
    };
    let sql = format!(
        "INSERT INTO {} ({}, {}) VALUES ({})",
        quote_ident(&store.multi_entry_table_name(index)),
        store.sql_key_column_name_quoted(),
        index.sql_column_name_quoted(),
        placeholders(2)
    );
    entries
        .into_iter()
        .map(|entry| Statement::new(sql.clone(), vec![primary_key.clone(), entry]))
        .collect()
}

/// Deletes for every record whose primary key lies in `range` (all records
/// when `None`). Side table rows are removed first.
pub fn delete_sql(store: &StoreSchema, range: Option<&KeyRange>) -> Vec<Statement> {
    let q_key = store.sql_key_column_name_quoted();
    let mut wheres = Vec::new();
    let mut params = Vec::new();
    if let Some(range) = range {
        range.to_sql(q_key, store.data_type(), &mut wheres, &mut params);
    }
    let where_clause = if wheres.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", wheres.join(" AND "))
    };

    let mut out: Vec<Statement> = store
        .indexes()
        .iter()
        .filter(|i| i.is_multi_entry())
        .map(|i| {
            let side = quote_ident(&store.multi_entry_table_name(i));
            let sql = if where_clause.is_empty() {
                format!("DELETE FROM {}", side)
            } else {
                format!(
                    "DELETE FROM {} WHERE {} IN (SELECT {} FROM {}{})",
                    side,
                    q_key,
                    q_key,
                    store.quoted_name(),
                    where_clause
                )
            };
            Statement::new(sql, params.clone())
        })
        .collect();
    out.push(Statement::new(
        format!("DELETE FROM {}{}", store.quoted_name(), where_clause),
        params,
    ));
    out
}
