//! Checkpoint boundary: after every transition the executor hands the
//! serializable run state and the new history entry to a [`Checkpointer`].
//! Recovery from checkpoints is the host's concern.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

use crate::history::HistoryEntry;
use crate::run::{RunState, RunSummary};

/// A run as last persisted.
#[derive(Debug, Clone)]
pub struct SavedRun {
    pub state: RunState,
    pub history: Vec<HistoryEntry>,
}

impl SavedRun {
    pub fn summary(&self) -> RunSummary {
        self.state.summary(self.history.len())
    }
}

/// Failures are logged by the executor and never affect the run.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    async fn save(&self, state: &RunState, entry: &HistoryEntry) -> anyhow::Result<()>;

    /// Read back a run that is no longer held in memory.
    async fn load(&self, _run_id: Uuid) -> anyhow::Result<Option<SavedRun>> {
        Ok(None)
    }
}

/// Per-run background writer. Saves happen in order on their own task, so
/// a slow or stalled checkpointer never holds up the run itself.
pub(crate) struct CheckpointQueue {
    tx: Option<mpsc::UnboundedSender<(RunState, HistoryEntry)>>,
    worker: JoinHandle<()>,
}

impl CheckpointQueue {
    pub(crate) fn spawn(checkpointer: Arc<dyn Checkpointer>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<(RunState, HistoryEntry)>();
        let worker = tokio::spawn(async move {
            while let Some((state, entry)) = rx.recv().await {
                if let Err(e) = checkpointer.save(&state, &entry).await {
                    warn!(run_id = %state.run_id, seq = entry.seq, error = %e, "checkpoint failed");
                }
            }
        });
        Self { tx: Some(tx), worker }
    }

    pub(crate) fn push(&self, state: &RunState, entry: HistoryEntry) {
        if let Some(tx) = &self.tx {
            if tx.send((state.clone(), entry)).is_err() {
                warn!(run_id = %state.run_id, "checkpoint writer is gone");
            }
        }
    }

    /// Close the queue and wait up to `limit` for queued saves to land.
    /// Returns false when the writer had to be abandoned.
    pub(crate) async fn drain(&mut self, limit: Duration) -> bool {
        if self.tx.take().is_none() {
            return true;
        }
        match tokio::time::timeout(limit, &mut self.worker).await {
            Ok(_) => true,
            Err(_) => {
                self.worker.abort();
                false
            }
        }
    }
}
