//! `runs` repository functions.

use sqlx::PgExecutor;
use uuid::Uuid;

use engine::RunState;

use crate::{models::RunRow, DbError};

/// Insert or replace the checkpoint of `state.run_id`.
pub async fn upsert_run<'e, E: PgExecutor<'e>>(executor: E, state: &RunState) -> Result<(), DbError> {
    let document = serde_json::to_value(state)?;

    sqlx::query(
        r#"
        INSERT INTO runs (run_id, graph, status, current_step, state, started_at, updated_at, finished_at)
        VALUES ($1, $2, $3, $4, $5, $6, now(), $7)
        ON CONFLICT (run_id) DO UPDATE
        SET status = EXCLUDED.status,
            current_step = EXCLUDED.current_step,
            state = EXCLUDED.state,
            updated_at = now(),
            finished_at = EXCLUDED.finished_at
        "#,
    )
    .bind(state.run_id)
    .bind(&state.graph)
    .bind(state.status.to_string())
    .bind(&state.current_step)
    .bind(document)
    .bind(state.started_at)
    .bind(state.finished_at)
    .execute(executor)
    .await?;

    Ok(())
}

/// Fetch a single run checkpoint.
pub async fn get_run<'e, E: PgExecutor<'e>>(executor: E, run_id: Uuid) -> Result<RunRow, DbError> {
    sqlx::query_as::<_, RunRow>(
        r#"
        SELECT run_id, graph, status, current_step, state, started_at, updated_at, finished_at
        FROM runs
        WHERE run_id = $1
        "#,
    )
    .bind(run_id)
    .fetch_optional(executor)
    .await?
    .ok_or(DbError::NotFound)
}

/// Runs whose last checkpoint is not terminal: they were live when the
/// process that owned them stopped.
pub async fn list_unfinished<'e, E: PgExecutor<'e>>(executor: E) -> Result<Vec<RunRow>, DbError> {
    let rows = sqlx::query_as::<_, RunRow>(
        r#"
        SELECT run_id, graph, status, current_step, state, started_at, updated_at, finished_at
        FROM runs
        WHERE status IN ('pending', 'running')
        ORDER BY started_at
        "#,
    )
    .fetch_all(executor)
    .await?;

    Ok(rows)
}
