//! Error types for checkpoint storage.

use thiserror::Error;

/// Result type for checkpoint operations.
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Errors that can occur in a checkpoint backend.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    /// Migration failed.
    #[error("Migration error: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    /// Snapshot could not be serialized or deserialized.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// The stored record is malformed (unknown status, bad timestamp).
    #[error("Corrupt checkpoint record: {0}")]
    CorruptRecord(String),
}
