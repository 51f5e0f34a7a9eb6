//! Postgres-backed [`Checkpointer`]: each transition upserts the run's
//! checkpoint and appends its history row in one transaction. Runs the
//! engine no longer holds in memory are read back from the same tables.

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use engine::{Checkpointer, HistoryEntry, RunState, SavedRun};

use crate::repository::{history, runs};
use crate::{DbError, DbPool};

#[derive(Debug, Clone)]
pub struct PgCheckpointer {
    pool: DbPool,
}

impl PgCheckpointer {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Checkpointer for PgCheckpointer {
    async fn save(&self, state: &RunState, entry: &HistoryEntry) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        runs::upsert_run(&mut *tx, state).await?;
        history::insert_entry(&mut *tx, entry).await?;
        tx.commit().await?;

        debug!(run_id = %state.run_id, seq = entry.seq, status = %state.status, "checkpoint saved");
        Ok(())
    }

    async fn load(&self, run_id: Uuid) -> anyhow::Result<Option<SavedRun>> {
        let row = match runs::get_run(&self.pool, run_id).await {
            Ok(row) => row,
            Err(DbError::NotFound) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let history = history::list_history(&self.pool, run_id)
            .await?
            .into_iter()
            .map(|row| row.into_entry())
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(SavedRun { state: row.into_state()?, history }))
    }
}
