//! Error types for the catalog store.

use thiserror::Error;

/// Catalog operation result type.
pub type Result<T> = std::result::Result<T, DbError>;

/// Catalog store errors.
#[derive(Error, Debug)]
pub enum DbError {
    /// SQLx error (connection, query, etc.)
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// IO error (file system operations)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
