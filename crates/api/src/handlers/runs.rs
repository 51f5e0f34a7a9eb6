use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::instrument;
use uuid::Uuid;

use engine::{HistoryEntry, RunSummary};

use crate::{ApiError, AppState};

fn empty_document() -> Value {
    json!({})
}

#[derive(Debug, Deserialize)]
pub struct StartRunDto {
    /// Initial data document.
    #[serde(default = "empty_document")]
    pub input: Value,
    /// Overall budget for the run; the graph or server default otherwise.
    #[serde(default)]
    pub deadline_secs: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct RunAccepted {
    pub run_id: Uuid,
}

#[instrument(skip(state, payload))]
pub async fn start(
    Path(name): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<StartRunDto>,
) -> Result<(StatusCode, Json<RunAccepted>), ApiError> {
    if payload.deadline_secs == Some(0) {
        return Err(ApiError::BadRequest("deadline_secs must be positive".into()));
    }

    let run_id = state
        .engine
        .start(&name, payload.input, payload.deadline_secs.map(Duration::from_secs))?;
    Ok((StatusCode::ACCEPTED, Json(RunAccepted { run_id })))
}

pub async fn status(
    Path(run_id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<RunSummary>, ApiError> {
    Ok(Json(state.engine.status(run_id).await?))
}

#[instrument(skip(state))]
pub async fn cancel(
    Path(run_id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<RunSummary>), ApiError> {
    state.engine.cancel(run_id).await?;
    Ok((StatusCode::ACCEPTED, Json(state.engine.status(run_id).await?)))
}

pub async fn history(
    Path(run_id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<Vec<HistoryEntry>>, ApiError> {
    Ok(Json(state.engine.history(run_id).await?))
}
