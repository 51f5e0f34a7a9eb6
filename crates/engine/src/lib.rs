//! `engine` crate — graph definitions, validation, and the run executor.

pub mod checkpoint;
pub mod control;
pub mod error;
pub mod executor;
pub mod expression;
pub mod graph;
pub mod history;
pub mod invoker;
pub mod models;
pub mod policy;
pub mod run;
pub mod timer;

pub use checkpoint::{Checkpointer, SavedRun};
pub use control::{validate, WorkflowEngine};
pub use error::{EngineError, FailureKind, GraphError, StepFailure};
pub use executor::{ExecutorConfig, RunExecutor};
pub use expression::{Path, Predicate};
pub use graph::StateGraph;
pub use history::{HistoryEntry, HistoryEventKind};
pub use models::{
    CatchPolicy, ChoiceRule, ErrorMatcher, GraphDefinition, RetryPolicy, StepDefinition, StepKind,
};
pub use run::{RunFailure, RunState, RunStatus, RunSummary};
