use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;

use crate::repository::{KeyValueStore, StorageError};

use super::SqliteRepository;

// SQLITE_FULL
const DISK_FULL_CODE: &str = "13";

fn map_write_error(err: &sqlx::Error, key: &str) -> StorageError {
    let full = err
        .as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == DISK_FULL_CODE);
    if full {
        StorageError::QuotaExceeded {
            key: key.to_owned(),
        }
    } else {
        StorageError::Connection(err.to_string())
    }
}

#[async_trait]
impl KeyValueStore for SqliteRepository {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let row = sqlx::query("SELECT value FROM kv_items WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| StorageError::Connection(err.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let value: String = row
            .try_get("value")
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        Ok(Some(value))
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO kv_items (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            ",
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|err| map_write_error(&err, key))?;

        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM kv_items WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|err| StorageError::Connection(err.to_string()))?;
        Ok(())
    }
}
