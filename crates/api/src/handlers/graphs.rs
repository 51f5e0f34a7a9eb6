use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use tracing::instrument;

use engine::{GraphDefinition, StateGraph};

use crate::{ApiError, AppState};

#[derive(Debug, Serialize)]
pub struct GraphSummary {
    pub name: String,
    pub start: String,
    pub steps: usize,
    pub terminal_steps: Vec<String>,
    pub capabilities: Vec<String>,
    pub timeout_secs: Option<u64>,
    pub max_step_visits: Option<u32>,
}

impl From<&StateGraph> for GraphSummary {
    fn from(graph: &StateGraph) -> Self {
        Self {
            name: graph.name().to_owned(),
            start: graph.start().to_owned(),
            steps: graph.steps().len(),
            terminal_steps: graph.terminal_steps().into_iter().map(str::to_owned).collect(),
            capabilities: graph.capabilities().into_iter().map(str::to_owned).collect(),
            timeout_secs: graph.definition().timeout_secs,
            max_step_visits: graph.max_step_visits(),
        }
    }
}

pub async fn list(State(state): State<AppState>) -> Json<Vec<GraphSummary>> {
    Json(state.engine.graphs().iter().map(|g| GraphSummary::from(g.as_ref())).collect())
}

pub async fn get(
    Path(name): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<GraphDefinition>, ApiError> {
    let graph = state
        .engine
        .graph(&name)
        .ok_or(engine::EngineError::UnknownGraph(name))?;
    Ok(Json(graph.definition().clone()))
}

#[instrument(skip_all, fields(graph = %definition.name))]
pub async fn create(
    State(state): State<AppState>,
    Json(definition): Json<GraphDefinition>,
) -> Result<(StatusCode, Json<GraphSummary>), ApiError> {
    let graph = state.engine.register_graph(definition)?;
    Ok((StatusCode::CREATED, Json(GraphSummary::from(graph.as_ref()))))
}
