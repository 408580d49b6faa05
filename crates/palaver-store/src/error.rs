use thiserror::Error;

/// Parent table named by a foreign-key diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FkTable {
    Users,
    Chats,
    Messages,
}

impl std::fmt::Display for FkTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FkTable::Users => "users",
            FkTable::Chats => "chats",
            FkTable::Messages => "messages",
        };
        write!(f, "{name}")
    }
}

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A foreign-key constraint failed.  `missing` names the parent table
    /// whose row was absent so callers can distinguish "chat missing" from
    /// "user missing" and backfill the right dependency.
    #[error("Foreign key violation inserting into {table}: missing row in {missing} ({key})")]
    ConstraintViolation {
        /// Table the write targeted.
        table: &'static str,
        /// Parent table the absent row belongs to.
        missing: FkTable,
        /// Key value that failed to resolve.
        key: String,
    },

    /// An operation ran before [`Database::init`](crate::Database::init).
    #[error("Store not initialized: call Database::init first")]
    NotInitialized,

    /// A query expected exactly one row but found none.
    #[error("Record not found")]
    NotFound,

    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// JSON payload (de)serialization failure.
    #[error("Payload serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// UUID parsing error.
    #[error("UUID error: {0}")]
    Uuid(#[from] uuid::Error),

    /// Chrono parsing error.
    #[error("Timestamp parse error: {0}")]
    ChronoParse(#[from] chrono::ParseError),
}

impl StoreError {
    /// Whether this is a foreign-key diagnostic the sync engine can recover
    /// from by backfilling the missing dependency.
    pub fn missing_dependency(&self) -> Option<FkTable> {
        match self {
            StoreError::ConstraintViolation { missing, .. } => Some(*missing),
            _ => None,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
