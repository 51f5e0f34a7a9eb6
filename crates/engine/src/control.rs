//! Run control surface: register graphs, start runs, and observe or cancel
//! them while they execute on the tokio runtime.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use capabilities::{
    CapabilityRegistry, ContextStore, EventSink, InMemoryContextStore, TracingEventSink,
};

use crate::checkpoint::{Checkpointer, SavedRun};
use crate::error::{EngineError, GraphError};
use crate::executor::{ExecutorConfig, RunExecutor};
use crate::graph::StateGraph;
use crate::history::{journal, HistoryEntry, JournalReader};
use crate::models::{GraphDefinition, StepKind};
use crate::run::{RunState, RunSummary};

struct RunHandle {
    journal: JournalReader,
    cancel: CancellationToken,
}

/// Registry of graphs plus the table of live and recently finished runs.
///
/// Finished runs are dropped from memory after
/// `ExecutorConfig::finished_run_retention`; from then on they are read
/// back through the checkpointer, when one is configured.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct WorkflowEngine {
    graphs: DashMap<String, Arc<StateGraph>>,
    runs: Arc<DashMap<Uuid, RunHandle>>,
    registry: Arc<CapabilityRegistry>,
    store: Arc<dyn ContextStore>,
    events: Arc<dyn EventSink>,
    checkpointer: Option<Arc<dyn Checkpointer>>,
    config: ExecutorConfig,
}

impl WorkflowEngine {
    /// Engine with an in-memory context store, a tracing event sink and the
    /// default configuration.
    pub fn new(registry: CapabilityRegistry) -> Self {
        Self {
            graphs: DashMap::new(),
            runs: Arc::new(DashMap::new()),
            registry: Arc::new(registry),
            store: Arc::new(InMemoryContextStore::new()),
            events: Arc::new(TracingEventSink),
            checkpointer: None,
            config: ExecutorConfig::default(),
        }
    }

    pub fn with_context_store(mut self, store: Arc<dyn ContextStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_checkpointer(mut self, checkpointer: Arc<dyn Checkpointer>) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Graphs
    // -----------------------------------------------------------------------

    /// Validate a definition against the graph rules and the capability
    /// registry, then make it available to `start`. Re-registering a name
    /// replaces the graph for future runs only.
    pub fn register_graph(&self, definition: GraphDefinition) -> Result<Arc<StateGraph>, EngineError> {
        let graph = validate(&self.registry, definition)?;
        let graph = Arc::new(graph);
        info!(graph = graph.name(), steps = graph.steps().len(), "graph registered");
        self.graphs.insert(graph.name().to_owned(), Arc::clone(&graph));
        Ok(graph)
    }

    pub fn graph(&self, name: &str) -> Option<Arc<StateGraph>> {
        self.graphs.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// All registered graphs, sorted by name.
    pub fn graphs(&self) -> Vec<Arc<StateGraph>> {
        let mut graphs: Vec<_> = self.graphs.iter().map(|entry| Arc::clone(entry.value())).collect();
        graphs.sort_by(|a, b| a.name().cmp(b.name()));
        graphs
    }

    // -----------------------------------------------------------------------
    // Runs
    // -----------------------------------------------------------------------

    /// Start a run of `graph` with `input` as the initial data document.
    ///
    /// The run budget is `deadline` when given, else the graph's
    /// `timeout_secs`, else the configured default. Must be called from
    /// within a tokio runtime.
    #[instrument(skip(self, input))]
    pub fn start(&self, graph: &str, input: Value, deadline: Option<Duration>) -> Result<Uuid, EngineError> {
        let graph = self
            .graph(graph)
            .ok_or_else(|| EngineError::UnknownGraph(graph.to_owned()))?;

        let budget = deadline
            .or_else(|| graph.timeout())
            .unwrap_or(self.config.default_run_timeout);
        let run_id = Uuid::new_v4();
        let state = RunState::new(run_id, &graph, input, budget);
        let (writer, reader) = journal(state.clone());
        let cancel = CancellationToken::new();

        self.runs.insert(run_id, RunHandle { journal: reader, cancel: cancel.clone() });

        let executor = RunExecutor::new(
            graph,
            Arc::clone(&self.registry),
            Arc::clone(&self.store),
            Arc::clone(&self.events),
            self.config.clone(),
        )
        .with_checkpointer(self.checkpointer.clone());
        // Budgets too large for the clock are treated as a century.
        let now = Instant::now();
        let deadline = now
            .checked_add(budget)
            .unwrap_or_else(|| now + Duration::from_secs(100 * 365 * 24 * 3600));

        let runs = Arc::clone(&self.runs);
        let retention = self.config.finished_run_retention;
        tokio::spawn(async move {
            executor.run(state, deadline, writer, cancel).await;
            tokio::time::sleep(retention).await;
            runs.remove(&run_id);
            debug!(%run_id, "finished run evicted from memory");
        });

        info!(%run_id, ?budget, "run accepted");
        Ok(run_id)
    }

    pub async fn status(&self, run_id: Uuid) -> Result<RunSummary, EngineError> {
        match self.reader(run_id) {
            Some(reader) => Ok(reader.summary().await),
            None => Ok(self.archived(run_id).await?.summary()),
        }
    }

    pub async fn history(&self, run_id: Uuid) -> Result<Vec<HistoryEntry>, EngineError> {
        match self.reader(run_id) {
            Some(reader) => Ok(reader.history().await),
            None => Ok(self.archived(run_id).await?.history),
        }
    }

    /// Request cancellation. Idempotent; a no-op once the run is terminal
    /// or no longer held by this engine.
    pub async fn cancel(&self, run_id: Uuid) -> Result<(), EngineError> {
        let live = self.runs.get(&run_id).map(|handle| {
            if !handle.journal.status().is_terminal() {
                info!(%run_id, "cancellation requested");
                handle.cancel.cancel();
            }
        });
        match live {
            Some(()) => Ok(()),
            None => self.archived(run_id).await.map(|_| ()),
        }
    }

    /// Resolve with the final summary once the run is terminal.
    pub async fn wait(&self, run_id: Uuid) -> Result<RunSummary, EngineError> {
        match self.reader(run_id) {
            Some(reader) => {
                reader.wait_terminal().await;
                Ok(reader.summary().await)
            }
            None => Ok(self.archived(run_id).await?.summary()),
        }
    }

    fn reader(&self, run_id: Uuid) -> Option<JournalReader> {
        self.runs.get(&run_id).map(|handle| handle.journal.clone())
    }

    async fn archived(&self, run_id: Uuid) -> Result<SavedRun, EngineError> {
        let checkpointer = self.checkpointer.as_ref().ok_or(EngineError::UnknownRun(run_id))?;
        match checkpointer.load(run_id).await {
            Ok(Some(saved)) => Ok(saved),
            Ok(None) => Err(EngineError::UnknownRun(run_id)),
            Err(e) => Err(EngineError::Archive { run_id, message: e.to_string() }),
        }
    }
}

/// Build the graph and check that every Task names a registered capability.
pub fn validate(registry: &CapabilityRegistry, definition: GraphDefinition) -> Result<StateGraph, GraphError> {
    let graph = StateGraph::build(definition)?;
    for step in graph.steps() {
        if let StepKind::Task { capability, .. } = &step.kind {
            if !registry.contains(capability) {
                return Err(GraphError::UnknownCapability {
                    step: step.name.clone(),
                    capability: capability.clone(),
                });
            }
        }
    }
    Ok(graph)
}
