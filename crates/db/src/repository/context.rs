//! `context_entries` repository functions.

use serde_json::Value;
use sqlx::PgExecutor;

use crate::{models::ContextEntryRow, DbError};

pub async fn get_entry<'e, E: PgExecutor<'e>>(executor: E, key: &str) -> Result<Option<ContextEntryRow>, DbError> {
    let row = sqlx::query_as::<_, ContextEntryRow>(
        r#"SELECT key, value, updated_at FROM context_entries WHERE key = $1"#,
    )
    .bind(key)
    .fetch_optional(executor)
    .await?;

    Ok(row)
}

/// Insert or overwrite `key`.
pub async fn put_entry<'e, E: PgExecutor<'e>>(executor: E, key: &str, value: &Value) -> Result<(), DbError> {
    sqlx::query(
        r#"
        INSERT INTO context_entries (key, value, updated_at)
        VALUES ($1, $2, now())
        ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = now()
        "#,
    )
    .bind(key)
    .bind(value)
    .execute(executor)
    .await?;

    Ok(())
}
