use async_trait::async_trait;
use docent_agent::capability::{DataAccess, DataError, QueryOutput};
use serde_json::{Map, Value};
use sqlx::{Column, Row, TypeInfo, ValueRef, sqlite::SqliteRow};

use crate::DbPool;

/// Runs single statements against the museum store.
///
/// Statements are executed as given; safety checks happen before a statement
/// reaches this type.
#[derive(Clone)]
pub struct SqliteDataAccess {
    pool: DbPool,
}

impl SqliteDataAccess {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DataAccess for SqliteDataAccess {
    async fn execute(&self, sql: &str) -> Result<QueryOutput, DataError> {
        let statement = sql.trim().trim_end_matches(';');

        if produces_rows(statement) {
            let rows = sqlx::query(statement)
                .fetch_all(&self.pool)
                .await
                .map_err(data_error)?;
            let rows = rows.iter().map(row_to_json).collect::<Result<Vec<_>, _>>()?;
            tracing::debug!(rows = rows.len(), "Query returned rows");
            return Ok(QueryOutput::Rows { rows });
        }

        let result = sqlx::query(statement)
            .execute(&self.pool)
            .await
            .map_err(data_error)?;
        let last_insert_id = leading_word(statement)
            .eq_ignore_ascii_case("INSERT")
            .then(|| result.last_insert_rowid());
        tracing::debug!(rows = result.rows_affected(), "Statement applied");
        Ok(QueryOutput::Affected {
            rows_affected: result.rows_affected(),
            last_insert_id,
        })
    }
}

fn leading_word(sql: &str) -> &str {
    sql.split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .find(|w| !w.is_empty())
        .unwrap_or("")
}

/// Whether the statement yields a result set rather than a change count.
fn produces_rows(sql: &str) -> bool {
    let leader = leading_word(sql).to_ascii_uppercase();
    matches!(leader.as_str(), "SELECT" | "WITH" | "EXPLAIN" | "VALUES" | "PRAGMA")
        || sql
            .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
            .any(|w| w.eq_ignore_ascii_case("RETURNING"))
}

fn row_to_json(row: &SqliteRow) -> Result<Map<String, Value>, DataError> {
    let mut object = Map::new();
    for (index, column) in row.columns().iter().enumerate() {
        object.insert(column.name().to_string(), column_value(row, index)?);
    }
    Ok(object)
}

/// Decode by the value's storage class; SQLite columns are dynamically typed.
fn column_value(row: &SqliteRow, index: usize) -> Result<Value, DataError> {
    let raw = row.try_get_raw(index).map_err(data_error)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let type_name = raw.type_info().name().to_ascii_uppercase();

    let value = match type_name.as_str() {
        "INTEGER" | "INT" | "INT8" | "BIGINT" | "BOOLEAN" => {
            Value::from(row.try_get_unchecked::<i64, _>(index).map_err(data_error)?)
        }
        "REAL" | "NUMERIC" | "FLOAT" | "DOUBLE" => {
            let number = row.try_get_unchecked::<f64, _>(index).map_err(data_error)?;
            serde_json::Number::from_f64(number)
                .map(Value::Number)
                .unwrap_or(Value::Null)
        }
        "BLOB" => {
            let bytes = row.try_get_unchecked::<Vec<u8>, _>(index).map_err(data_error)?;
            Value::String(format!("<{} bytes>", bytes.len()))
        }
        _ => Value::String(
            row.try_get_unchecked::<String, _>(index)
                .map_err(data_error)?,
        ),
    };
    Ok(value)
}

/// Statement-level failures go back to the model; anything else means the
/// store itself is unavailable.
fn data_error(e: sqlx::Error) -> DataError {
    match e {
        sqlx::Error::Database(db) => DataError::Rejected(db.message().to_string()),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::TypeNotFound { .. } => {
            DataError::Rejected(e.to_string())
        }
        other => {
            tracing::warn!("Database unavailable: {}", other);
            DataError::Unavailable(other.to_string())
        }
    }
}
