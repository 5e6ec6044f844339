use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("index \"{index}\" not found in store \"{store}\"")]
    IndexNotFound { store: String, index: String },

    #[error("store \"{0}\" not found")]
    StoreNotFound(String),

    #[error("store name mismatch: {expected} != {found}")]
    StoreMismatch { expected: String, found: String },

    #[error("invalid key range: {0}")]
    InvalidKeyRange(String),

    #[error("record in store \"{0}\" has no key")]
    MissingKey(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SchemaError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        SchemaError::InvalidArgument(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, SchemaError>;
