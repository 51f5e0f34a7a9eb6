//! Engine-level error types.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use capabilities::CapabilityError;

use crate::expression::ExpressionError;

/// Malformed graph definitions, detected by [`crate::StateGraph::build`].
/// Fatal and never retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    #[error("graph has no steps")]
    Empty,

    /// Two or more steps share the same name.
    #[error("duplicate step name: '{0}'")]
    DuplicateStep(String),

    #[error("start step '{0}' is not defined")]
    UnknownStart(String),

    /// An edge references a step name that doesn't exist in the graph.
    #[error("step '{step}' references unknown step '{target}' ({edge} edge)")]
    UnknownTarget {
        step: String,
        target: String,
        edge: &'static str,
    },

    #[error("choice step '{0}' must not declare `next`; use rules and `default`")]
    ChoiceWithNext(String),

    #[error("wait step '{step}' is invalid: {reason}")]
    InvalidWait { step: String, reason: String },

    #[error("pass step '{step}' is invalid: {reason}")]
    InvalidPass { step: String, reason: String },

    #[error("retry policy on step '{step}' is invalid: {reason}")]
    InvalidRetryPolicy { step: String, reason: String },

    #[error("steps not reachable from start: {0:?}")]
    Unreachable(Vec<String>),

    /// A cycle through `next` edges, or any cycle when bounded re-execution
    /// is not enabled.
    #[error("graph contains a cycle through steps {steps:?}")]
    Cycle { steps: Vec<String> },

    #[error("step '{step}' invokes unregistered capability '{capability}'")]
    UnknownCapability { step: String, capability: String },

    #[error("invalid graph definition: {0}")]
    InvalidDefinition(String),
}

/// Classification of a step failure, used by retry and catch policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A capability exceeded its invocation timeout (or reported one).
    Timeout,
    /// The external task reported a failure.
    CapabilityError,
    /// The data document did not have the expected shape.
    InvalidInput,
    /// The graph could not be followed at run time. Never retried or caught.
    GraphError,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::CapabilityError => "capability_error",
            Self::InvalidInput => "invalid_input",
            Self::GraphError => "graph_error",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure of one step attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("{kind}: {message}")]
pub struct StepFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl StepFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(FailureKind::InvalidInput, message)
    }

    pub fn graph(message: impl Into<String>) -> Self {
        Self::new(FailureKind::GraphError, message)
    }
}

impl From<CapabilityError> for StepFailure {
    fn from(err: CapabilityError) -> Self {
        match err {
            CapabilityError::Failed(msg) => Self::new(FailureKind::CapabilityError, msg),
            CapabilityError::Timeout(msg) => Self::new(FailureKind::Timeout, msg),
            CapabilityError::InvalidInput(msg) => Self::new(FailureKind::InvalidInput, msg),
        }
    }
}

impl From<ExpressionError> for StepFailure {
    fn from(err: ExpressionError) -> Self {
        Self::invalid_input(err.to_string())
    }
}

/// Errors from the run control surface. A failed *run* is never one of
/// these; callers inspect its status instead.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("unknown graph '{0}'")]
    UnknownGraph(String),

    #[error("unknown run {0}")]
    UnknownRun(Uuid),

    /// The run is not in memory and the checkpointer could not read it back.
    #[error("run {run_id} could not be loaded: {message}")]
    Archive { run_id: Uuid, message: String },
}
