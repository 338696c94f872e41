//! Database error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    /// A stored row could not be turned back into a domain value.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

pub type DbResult<T> = std::result::Result<T, DbError>;

impl From<DbError> for remotebuild_core::Error {
    fn from(err: DbError) -> Self {
        remotebuild_core::Error::Internal(err.to_string())
    }
}
