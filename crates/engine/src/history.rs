//! History/Audit log: the append-only, ordered record of one run, and the
//! journal that shares it (with the latest run state) between the run's
//! executor and readers of the control surface.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{watch, RwLock};
use uuid::Uuid;

use crate::error::StepFailure;
use crate::run::{RunState, RunStatus, RunSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryEventKind {
    RunStarted,
    StepSucceeded,
    StepFailed,
    StepRetrying,
    StepCaught,
    /// The step was in flight when the run was cancelled or timed out.
    StepAbandoned,
    RunSucceeded,
    RunFailed,
    RunTimedOut,
    RunCancelled,
}

/// One transition. Never mutated once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub run_id: Uuid,
    /// 0-based, gap-free.
    pub seq: u64,
    /// Absent for run-level entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_name: Option<String>,
    pub kind: HistoryEventKind,
    pub timestamp: DateTime<Utc>,
    /// 1-based attempt number of the step (0 for run-level entries).
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepFailure>,
}

/// Append-only entry list for one run.
#[derive(Debug, Clone, Default)]
pub struct History {
    run_id: Uuid,
    entries: Vec<HistoryEntry>,
}

impl History {
    pub fn new(run_id: Uuid) -> Self {
        Self { run_id, entries: Vec::new() }
    }

    pub fn record(
        &mut self,
        kind: HistoryEventKind,
        step_name: Option<&str>,
        attempt: u32,
        payload: Option<Value>,
        error: Option<StepFailure>,
    ) -> &HistoryEntry {
        let entry = HistoryEntry {
            run_id: self.run_id,
            seq: self.entries.len() as u64,
            step_name: step_name.map(str::to_owned),
            kind,
            timestamp: Utc::now(),
            attempt,
            payload,
            error,
        };
        self.entries.push(entry);
        &self.entries[self.entries.len() - 1]
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

struct Shared {
    state: RunState,
    history: History,
}

/// Write half of a run's journal. Held only by the run's executor.
pub struct JournalWriter {
    shared: Arc<RwLock<Shared>>,
    status: watch::Sender<RunStatus>,
}

/// Read half of a run's journal, handed to the control surface.
#[derive(Clone)]
pub struct JournalReader {
    shared: Arc<RwLock<Shared>>,
    status: watch::Receiver<RunStatus>,
}

/// Create the journal for a run starting in `state`.
pub fn journal(state: RunState) -> (JournalWriter, JournalReader) {
    let (tx, rx) = watch::channel(state.status);
    let shared = Arc::new(RwLock::new(Shared {
        history: History::new(state.run_id),
        state,
    }));
    (
        JournalWriter { shared: shared.clone(), status: tx },
        JournalReader { shared, status: rx },
    )
}

impl JournalWriter {
    /// Append an entry and return a copy of it.
    pub async fn append(
        &self,
        kind: HistoryEventKind,
        step_name: Option<&str>,
        attempt: u32,
        payload: Option<Value>,
        error: Option<StepFailure>,
    ) -> HistoryEntry {
        let mut shared = self.shared.write().await;
        shared.history.record(kind, step_name, attempt, payload, error).clone()
    }

    /// Replace the published snapshot of the run state.
    pub async fn publish(&self, state: &RunState) {
        self.shared.write().await.state = state.clone();
        self.status.send_if_modified(|current| {
            let changed = *current != state.status;
            *current = state.status;
            changed
        });
    }
}

impl JournalReader {
    pub fn status(&self) -> RunStatus {
        *self.status.borrow()
    }

    pub async fn state(&self) -> RunState {
        self.shared.read().await.state.clone()
    }

    pub async fn summary(&self) -> RunSummary {
        let shared = self.shared.read().await;
        shared.state.summary(shared.history.len())
    }

    pub async fn history(&self) -> Vec<HistoryEntry> {
        self.shared.read().await.history.entries().to_vec()
    }

    /// Resolve once the run reaches a terminal status.
    pub async fn wait_terminal(&self) -> RunStatus {
        let mut status = self.status.clone();
        let terminal = status.wait_for(|s| s.is_terminal()).await.ok().map(|s| *s);
        match terminal {
            Some(terminal) => terminal,
            // Writer dropped without a terminal status; report what we have.
            None => self.state().await.status,
        }
    }
}
