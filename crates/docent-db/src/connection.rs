use std::time::Duration;

use sqlx::sqlite::SqlitePoolOptions;

use crate::{DbError, migrations};

pub type DbPool = sqlx::SqlitePool;

pub async fn connect(database_url: &str) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(database_url, 5, 30).await
}

pub async fn connect_with_settings(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
) -> Result<DbPool, sqlx::Error> {
    SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(timeout_secs.max(1)))
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
                sqlx::query("PRAGMA busy_timeout = 5000").execute(&mut *conn).await?;
                Ok(())
            })
        })
        .connect(database_url)
        .await
}

/// Open (creating if needed) the database file at `path` and bring its schema
/// up to date.
pub async fn open(path: &str) -> Result<DbPool, DbError> {
    let url = format!("sqlite://{}?mode=rwc", path);
    let pool = connect(&url).await?;
    migrations::run_pending(&pool).await?;
    tracing::debug!(path, "Database ready");
    Ok(pool)
}
