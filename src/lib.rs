//! storesql - compile object store schemas to SQLite
//!
//! # Example
//!
//! ```
//! use storesql::{IndexSchema, KeyRange, Query, QueryMethod, StoreSchema};
//!
//! let store = StoreSchema::builder("article")
//!     .key_path("id")
//!     .index(IndexSchema::new("tag"))
//!     .build()
//!     .unwrap();
//!
//! let mut params = Vec::new();
//! let query = Query::new(QueryMethod::ListKeys)
//!     .index("tag")
//!     .range(KeyRange::only("rust"));
//! let sql = store.to_sql(&mut params, &query).unwrap();
//! assert_eq!(
//!     sql,
//!     r#"SELECT "id", "tag" FROM "article" WHERE "tag" = ? ORDER BY "tag" ASC, "id" ASC"#
//! );
//! assert_eq!(params.len(), 1);
//! ```

pub mod db;
pub mod ddl;
pub mod error;
pub mod index;
pub mod introspect;
pub mod key;
pub mod key_range;
pub mod query;
pub mod schema;
pub mod sql;
pub mod store;
pub mod types;

pub use db::{Db, Position};
pub use error::{Result, SchemaError};
pub use index::IndexSchema;
pub use key::Key;
pub use key_range::KeyRange;
pub use query::Query;
pub use schema::DatabaseSchema;
pub use sql::{Row, SqlParts, SqlValue, Statement};
pub use store::{SqlNamesValues, StoreBuilder, StoreSchema, WriteEvent, WriteHook, WriteKind};
pub use types::{DataType, KeyPath, QueryMethod, Validation};
