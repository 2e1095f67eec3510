use async_trait::async_trait;
use chrono::Utc;
use docent_agent::{Checkpoint, CheckpointError, Checkpointer, ThreadId};
use sqlx::Row;

use crate::DbPool;

/// Checkpoints persisted in the `checkpoints` table, one row per thread.
#[derive(Clone)]
pub struct SqliteCheckpointer {
    pool: DbPool,
}

impl SqliteCheckpointer {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Threads currently waiting on an interrupt, most recent first
    pub async fn suspended(&self) -> Result<Vec<ThreadId>, CheckpointError> {
        let rows = sqlx::query(
            "SELECT thread_id FROM checkpoints WHERE suspended = 1 ORDER BY updated_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;
        rows.iter().map(thread_from_row).collect()
    }

    /// Remove threads not touched for `max_age`; returns how many were removed
    pub async fn purge_older_than(&self, max_age: chrono::Duration) -> Result<u64, CheckpointError> {
        let cutoff = Utc::now() - max_age;
        let result = sqlx::query("DELETE FROM checkpoints WHERE updated_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl Checkpointer for SqliteCheckpointer {
    async fn load(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>, CheckpointError> {
        let row = sqlx::query("SELECT data FROM checkpoints WHERE thread_id = ?")
            .bind(thread_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

        row.map(|row| -> Result<Checkpoint, CheckpointError> {
            let data: String = row.try_get("data").map_err(storage)?;
            Ok(serde_json::from_str(&data)?)
        })
        .transpose()
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let data = serde_json::to_string(checkpoint)?;
        sqlx::query(
            "INSERT INTO checkpoints (thread_id, step, suspended, data, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(thread_id) DO UPDATE SET
                step = excluded.step,
                suspended = excluded.suspended,
                data = excluded.data,
                updated_at = excluded.updated_at",
        )
        .bind(checkpoint.thread_id.to_string())
        .bind(checkpoint.step as i64)
        .bind(checkpoint.is_suspended())
        .bind(data)
        .bind(checkpoint.updated_at)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn delete(&self, thread_id: &ThreadId) -> Result<bool, CheckpointError> {
        let result = sqlx::query("DELETE FROM checkpoints WHERE thread_id = ?")
            .bind(thread_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self) -> Result<Vec<ThreadId>, CheckpointError> {
        let rows = sqlx::query("SELECT thread_id FROM checkpoints ORDER BY updated_at DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;
        rows.iter().map(thread_from_row).collect()
    }
}

fn thread_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ThreadId, CheckpointError> {
    let id: String = row.try_get("thread_id").map_err(storage)?;
    id.parse()
        .map_err(|e| CheckpointError::Storage(format!("invalid thread id {:?}: {}", id, e)))
}

fn storage(e: sqlx::Error) -> CheckpointError {
    CheckpointError::Storage(e.to_string())
}
