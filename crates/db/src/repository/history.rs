//! `run_history` repository functions.

use sqlx::PgExecutor;
use uuid::Uuid;

use engine::HistoryEntry;

use crate::{
    models::{kind_label, HistoryRow},
    DbError,
};

/// Append one history entry. Re-inserting the same `(run_id, seq)` is a
/// no-op, so a replayed checkpoint cannot duplicate history.
pub async fn insert_entry<'e, E: PgExecutor<'e>>(executor: E, entry: &HistoryEntry) -> Result<(), DbError> {
    let seq = i64::try_from(entry.seq).map_err(|e| DbError::Invalid(format!("seq: {e}")))?;
    let attempt = i32::try_from(entry.attempt).map_err(|e| DbError::Invalid(format!("attempt: {e}")))?;
    let error = entry.error.as_ref().map(serde_json::to_value).transpose()?;

    sqlx::query(
        r#"
        INSERT INTO run_history (run_id, seq, step_name, kind, attempt, payload, error, recorded_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (run_id, seq) DO NOTHING
        "#,
    )
    .bind(entry.run_id)
    .bind(seq)
    .bind(entry.step_name.as_deref())
    .bind(kind_label(entry.kind)?)
    .bind(attempt)
    .bind(entry.payload.as_ref())
    .bind(error)
    .bind(entry.timestamp)
    .execute(executor)
    .await?;

    Ok(())
}

/// All entries of a run in `seq` order.
pub async fn list_history<'e, E: PgExecutor<'e>>(executor: E, run_id: Uuid) -> Result<Vec<HistoryRow>, DbError> {
    let rows = sqlx::query_as::<_, HistoryRow>(
        r#"
        SELECT run_id, seq, step_name, kind, attempt, payload, error, recorded_at
        FROM run_history
        WHERE run_id = $1
        ORDER BY seq
        "#,
    )
    .bind(run_id)
    .fetch_all(executor)
    .await?;

    Ok(rows)
}
