//! Centralized error types for the pool syncer

use thiserror::Error;

/// Main syncer error type
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SyncError {
    /// Configuration and schema errors never succeed on retry
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Configuration(_) | SyncError::Schema(_))
    }
}

/// Storage-specific errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Connection pool exhausted")]
    PoolExhausted,

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Upstream chain-sync errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Chain-sync session closed: {0}")]
    SessionClosed(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("No intersection found among {0} offered points")]
    NoIntersection(usize),
}

/// Per-output decode failures. These never abort the enclosing block.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("{family} pool output carries {found} marker tokens, expected exactly one")]
    MissingMarker { family: &'static str, found: usize },

    #[error("{family} pool output has {relevant} relevant assets after excluding marker tokens")]
    MalformedPoolOutput { family: &'static str, relevant: usize },

    #[error("Datum {0} is not present in the block's witnesses")]
    MissingDatumWitness(String),

    #[error("Pool output carries no datum")]
    MissingDatum,

    #[error("Invalid datum: {0}")]
    InvalidDatum(String),
}

/// Result type alias for syncer operations
pub type SyncResult<T> = Result<T, SyncError>;

/// SQLSTATE classes 23 (integrity constraint) and 42 (syntax / undefined
/// object) mean the schema does not match what the syncer writes.
impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string()).unwrap_or_default();
                if code.starts_with("23") || code.starts_with("42") {
                    SyncError::Schema(format!("{} (SQLSTATE {})", db_err.message(), code))
                } else {
                    SyncError::Storage(StorageError::Database(err.to_string()))
                }
            }
            sqlx::Error::PoolTimedOut => SyncError::Storage(StorageError::PoolExhausted),
            _ => SyncError::Storage(StorageError::Database(err.to_string())),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for SyncError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        SyncError::Storage(StorageError::MigrationFailed(err.to_string()))
    }
}

impl From<redis::RedisError> for SyncError {
    fn from(err: redis::RedisError) -> Self {
        SyncError::Storage(StorageError::Cache(err.to_string()))
    }
}

impl From<deadpool_redis::PoolError> for SyncError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        SyncError::Storage(StorageError::Cache(err.to_string()))
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}
