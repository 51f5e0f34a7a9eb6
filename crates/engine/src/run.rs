//! Run state: the serializable checkpoint boundary of one run.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::FailureKind;
use crate::graph::StateGraph;

// ---------------------------------------------------------------------------
// RunStatus
// ---------------------------------------------------------------------------

/// `Pending → Running → {Succeeded, Failed, TimedOut, Cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::TimedOut => write!(f, "timed_out"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending"   => Ok(Self::Pending),
            "running"   => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed"    => Ok(Self::Failed),
            "timed_out" => Ok(Self::TimedOut),
            "cancelled" => Ok(Self::Cancelled),
            other       => Err(format!("unknown run status: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// RunState
// ---------------------------------------------------------------------------

/// Why a run ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFailure {
    pub kind: FailureKind,
    pub step: String,
    pub message: String,
}

/// Owned exclusively by the run's executor while the run is live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: Uuid,
    /// Name of the graph being executed.
    pub graph: String,
    pub status: RunStatus,
    pub current_step: String,
    /// Attempts already made (and failed) for `current_step`.
    pub attempt: u32,
    /// The data document.
    pub data: Value,
    pub started_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<RunFailure>,
    /// Entries per step, tracked for bounded re-execution.
    #[serde(default)]
    pub visits: BTreeMap<String, u32>,
}

impl RunState {
    /// A `Pending` run positioned at the graph's start step.
    pub fn new(run_id: Uuid, graph: &StateGraph, data: Value, budget: Duration) -> Self {
        let started_at = Utc::now();
        let deadline = chrono::Duration::from_std(budget)
            .ok()
            .and_then(|d| started_at.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Self {
            run_id,
            graph: graph.name().to_owned(),
            status: RunStatus::Pending,
            current_step: graph.start().to_owned(),
            attempt: 0,
            data,
            started_at,
            deadline,
            finished_at: None,
            failure: None,
            visits: BTreeMap::new(),
        }
    }

    pub fn summary(&self, history_len: usize) -> RunSummary {
        RunSummary {
            run_id: self.run_id,
            graph: self.graph.clone(),
            status: self.status,
            current_step: self.current_step.clone(),
            attempt: self.attempt,
            data: self.data.clone(),
            started_at: self.started_at,
            deadline: self.deadline,
            finished_at: self.finished_at,
            failure: self.failure.clone(),
            history_len,
        }
    }
}

/// What `status(run_id)` reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub graph: String,
    pub status: RunStatus,
    pub current_step: String,
    pub attempt: u32,
    pub data: Value,
    pub started_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub failure: Option<RunFailure>,
    pub history_len: usize,
}
