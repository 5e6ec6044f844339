use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

use storesql::introspect;
use storesql::{DatabaseSchema, Db, Key, KeyRange, Query, QueryMethod, SqlValue, Validation};

#[derive(Parser)]
#[command(name = "storesql")]
#[command(about = "Compile object store schemas to SQLite")]
struct Args {
    /// Ignore unknown attributes in schema files
    #[arg(long, global = true)]
    lenient: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print CREATE statements for every store
    Ddl {
        /// Schema JSON file
        schema: PathBuf,
    },
    /// Compile a query and print its SQL and bind values
    Query {
        schema: PathBuf,
        #[arg(short, long)]
        store: String,
        #[arg(short, long)]
        index: Option<String>,
        /// none, count, keys, primary-key, ...
        #[arg(short, long, default_value = "none")]
        method: String,
        /// Lower bound, as JSON (bare words are strings)
        #[arg(long)]
        lower: Option<String>,
        #[arg(long)]
        upper: Option<String>,
        #[arg(long)]
        lower_open: bool,
        #[arg(long)]
        upper_open: bool,
        #[arg(short, long)]
        reverse: bool,
        #[arg(short, long)]
        unique: bool,
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long)]
        offset: Option<u32>,
    },
    /// Print the schema recovered from a database file
    Inspect {
        #[arg(short, long, default_value = "storesql.db")]
        db: String,
    },
    /// Compare a schema file with a database file
    Diff {
        schema: PathBuf,
        #[arg(short, long, default_value = "storesql.db")]
        db: String,
    },
    /// Create or recreate tables in a database file to match a schema
    Migrate {
        schema: PathBuf,
        #[arg(short, long, default_value = "storesql.db")]
        db: String,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let validation = if args.lenient {
        Validation::Lenient
    } else {
        Validation::Strict
    };

    match args.command {
        Command::Ddl { schema } => {
            let schema = load_schema(&schema, validation)?;
            for store in schema.stores() {
                for sql in storesql::ddl::create_table_statements(store) {
                    println!("{};", sql);
                }
            }
        }
        Command::Query {
            schema,
            store,
            index,
            method,
            lower,
            upper,
            lower_open,
            upper_open,
            reverse,
            unique,
            limit,
            offset,
        } => {
            let schema = load_schema(&schema, validation)?;
            let store = schema.store(&store)?;
            let method =
                QueryMethod::from_str(&method).ok_or_else(|| anyhow!("unknown method: {}", method))?;
            let range = match (lower, upper) {
                (None, None) => None,
                (lower, upper) => Some(KeyRange::new(
                    lower.as_deref().map(parse_key).transpose()?,
                    upper.as_deref().map(parse_key).transpose()?,
                    lower_open,
                    upper_open,
                )?),
            };
            let query = Query {
                method,
                index,
                range,
                reverse,
                unique,
                limit,
                offset,
            };
            let mut params = Vec::new();
            let sql = store.to_sql(&mut params, &query)?;
            println!("{}", sql);
            let params: Vec<Value> = params.iter().map(param_to_json).collect();
            println!("{}", Value::Array(params));
        }
        Command::Inspect { db } => {
            let conn = rusqlite::Connection::open(&db)?;
            let schema = introspect::inspect(&conn)?;
            println!("{}", serde_json::to_string_pretty(&schema.to_json())?);
        }
        Command::Diff { schema, db } => {
            let requested = load_schema(&schema, validation)?;
            let conn = rusqlite::Connection::open(&db)?;
            let live = introspect::inspect(&conn)?;
            let mut clean = true;
            for store in requested.stores() {
                let msg = match live.get_store(store.name()) {
                    Some(existing) => {
                        store.difference(Some(&existing.hint_for_websql(store)?))
                    }
                    None => store.difference(None),
                };
                if !msg.is_empty() {
                    clean = false;
                    println!("{}: {}", store.name(), msg);
                }
            }
            if clean {
                println!("no difference");
            }
        }
        Command::Migrate { schema, db } => {
            let requested = load_schema(&schema, validation)?;
            let opened = Db::open(&db, requested)?;
            tracing::info!("Migrated database: {}", db);
            println!("{}", serde_json::to_string_pretty(&opened.inspect()?.to_json())?);
        }
    }

    Ok(())
}

fn load_schema(path: &Path, validation: Validation) -> anyhow::Result<DatabaseSchema> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let json: Value = serde_json::from_str(&text)?;
    // a bare store list is accepted too
    let json = match json {
        Value::Array(stores) => json!({ "stores": stores }),
        other => other,
    };
    Ok(DatabaseSchema::from_json_with(&json, validation)?)
}

fn parse_key(s: &str) -> anyhow::Result<Key> {
    let value = serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.to_string()));
    Key::from_json(&value).ok_or_else(|| anyhow!("not a valid key: {}", s))
}

fn param_to_json(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => json!(i),
        SqlValue::Real(f) => json!(f),
        SqlValue::Text(s) => json!(s),
        SqlValue::Blob(b) => json!(b),
    }
}
