use sqlx::migrate::MigrateError;
use thiserror::Error;

/// Errors from opening or preparing the store
#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] MigrateError),
}
