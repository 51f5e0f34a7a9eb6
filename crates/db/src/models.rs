//! Row structs that map 1-to-1 onto database tables.
//!
//! These are *persistence* models. Conversions to the engine's domain types
//! live here; behaviour does not.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

use engine::{HistoryEntry, HistoryEventKind, RunState, RunStatus};

use crate::DbError;

// ---------------------------------------------------------------------------
// runs
// ---------------------------------------------------------------------------

/// The latest checkpoint of a run.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RunRow {
    pub run_id: Uuid,
    pub graph: String,
    pub status: String,
    pub current_step: String,
    /// Full serialized `RunState`.
    pub state: Value,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunRow {
    pub fn status(&self) -> Result<RunStatus, DbError> {
        self.status.parse().map_err(DbError::Invalid)
    }

    pub fn into_state(self) -> Result<RunState, DbError> {
        Ok(serde_json::from_value(self.state)?)
    }
}

// ---------------------------------------------------------------------------
// run_history
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct HistoryRow {
    pub run_id: Uuid,
    pub seq: i64,
    pub step_name: Option<String>,
    pub kind: String,
    pub attempt: i32,
    pub payload: Option<Value>,
    pub error: Option<Value>,
    pub recorded_at: DateTime<Utc>,
}

impl HistoryRow {
    pub fn into_entry(self) -> Result<HistoryEntry, DbError> {
        let kind: HistoryEventKind = serde_json::from_value(Value::String(self.kind))?;
        let error = self.error.map(serde_json::from_value).transpose()?;
        Ok(HistoryEntry {
            run_id: self.run_id,
            seq: u64::try_from(self.seq).map_err(|e| DbError::Invalid(format!("seq: {e}")))?,
            step_name: self.step_name,
            kind,
            timestamp: self.recorded_at,
            attempt: u32::try_from(self.attempt).map_err(|e| DbError::Invalid(format!("attempt: {e}")))?,
            payload: self.payload,
            error,
        })
    }
}

/// The text stored in `run_history.kind`.
pub fn kind_label(kind: HistoryEventKind) -> Result<String, DbError> {
    match serde_json::to_value(kind)? {
        Value::String(label) => Ok(label),
        other => Err(DbError::Invalid(format!("history kind serialized as {other}"))),
    }
}

// ---------------------------------------------------------------------------
// context_entries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ContextEntryRow {
    pub key: String,
    pub value: Value,
    pub updated_at: DateTime<Utc>,
}
