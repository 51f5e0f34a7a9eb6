//! Core definition models for the workflow engine.
//!
//! These types are the source of truth for what a workflow graph looks like
//! in memory and on disk. They serialise to/from the JSON graph definition
//! format; [`crate::StateGraph::build`] validates them.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FailureKind;
use crate::expression::{Path, Predicate};

// ---------------------------------------------------------------------------
// Policies
// ---------------------------------------------------------------------------

/// Which failure kinds a retry or catch policy applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorMatcher {
    /// Every catchable kind. For retries this excludes `invalid_input`:
    /// re-running against the same data document cannot change the outcome.
    All,
    Timeout,
    CapabilityError,
    InvalidInput,
}

impl ErrorMatcher {
    fn matches(self, kind: FailureKind) -> bool {
        match self {
            Self::All => kind != FailureKind::GraphError,
            Self::Timeout => kind == FailureKind::Timeout,
            Self::CapabilityError => kind == FailureKind::CapabilityError,
            Self::InvalidInput => kind == FailureKind::InvalidInput,
        }
    }
}

fn all_errors() -> Vec<ErrorMatcher> {
    vec![ErrorMatcher::All]
}

fn default_max_attempts() -> u32 {
    3
}

fn default_interval_secs() -> f64 {
    1.0
}

fn default_backoff_rate() -> f64 {
    2.0
}

/// Exponential back-off retry for a step.
///
/// `max_attempts` counts every attempt including the first, so
/// `max_attempts = 3` allows two retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "all_errors")]
    pub errors: Vec<ErrorMatcher>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: f64,
    #[serde(default = "default_backoff_rate")]
    pub backoff_rate: f64,
    /// Upper bound on a single back-off delay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delay_secs: Option<f64>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, interval: Duration, backoff_rate: f64) -> Self {
        Self {
            errors: all_errors(),
            max_attempts,
            interval_secs: interval.as_secs_f64(),
            backoff_rate,
            max_delay_secs: None,
        }
    }

    pub fn on(mut self, errors: Vec<ErrorMatcher>) -> Self {
        self.errors = errors;
        self
    }

    pub fn applies_to(&self, kind: FailureKind) -> bool {
        self.errors.iter().any(|matcher| match matcher {
            ErrorMatcher::All => kind != FailureKind::InvalidInput && matcher.matches(kind),
            other => other.matches(kind),
        })
    }
}

fn default_error_path() -> Path {
    Path::parse("$.error").unwrap_or_else(|_| Path::root())
}

/// Route matching failures to another step, recording the error detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatchPolicy {
    #[serde(default = "all_errors")]
    pub errors: Vec<ErrorMatcher>,
    pub next: String,
    /// Where `{ error, cause, step }` is written. Defaults to `$.error`.
    #[serde(default = "default_error_path")]
    pub result_path: Path,
}

impl CatchPolicy {
    pub fn new(errors: Vec<ErrorMatcher>, next: impl Into<String>) -> Self {
        Self { errors, next: next.into(), result_path: default_error_path() }
    }

    pub fn applies_to(&self, kind: FailureKind) -> bool {
        self.errors.iter().any(|matcher| matcher.matches(kind))
    }
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// One rule of a Choice step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceRule {
    pub condition: Predicate,
    pub next: String,
}

/// Kind-specific parameters of a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    /// Invoke a registered capability.
    Task {
        capability: String,
        /// Per-invocation timeout; the executor's default applies when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_secs: Option<u64>,
    },
    /// Suspend the run. Exactly one of the two sources must be set.
    Wait {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seconds: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seconds_path: Option<Path>,
    },
    /// Ordered rules, first match wins; `default` when none match.
    Choice {
        rules: Vec<ChoiceRule>,
        default: String,
    },
    /// Merge a static or path-derived value; pass-through when neither is set.
    Pass {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value_path: Option<Path>,
    },
}

impl StepKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Task { .. } => "task",
            Self::Wait { .. } => "wait",
            Self::Choice { .. } => "choice",
            Self::Pass { .. } => "pass",
        }
    }
}

/// A single step in the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Unique within the graph (referenced by edges).
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(flatten)]
    pub kind: StepKind,
    /// Default edge. A non-Choice step without one is terminal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    /// Slice of the document handed to a Task. Defaults to `$`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_path: Option<Path>,
    /// Slice of the Task result (or Pass value) that is kept. Defaults to `$`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<Path>,
    /// Where the kept value is written. Absent means shallow merge into the
    /// document root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_path: Option<Path>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retry: Vec<RetryPolicy>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub catch: Vec<CatchPolicy>,
}

impl StepDefinition {
    fn with_kind(name: impl Into<String>, kind: StepKind) -> Self {
        Self {
            name: name.into(),
            comment: None,
            kind,
            next: None,
            input_path: None,
            output_path: None,
            result_path: None,
            retry: Vec::new(),
            catch: Vec::new(),
        }
    }

    pub fn task(name: impl Into<String>, capability: impl Into<String>) -> Self {
        Self::with_kind(name, StepKind::Task { capability: capability.into(), timeout_secs: None })
    }

    pub fn wait_seconds(name: impl Into<String>, seconds: f64) -> Self {
        Self::with_kind(name, StepKind::Wait { seconds: Some(seconds), seconds_path: None })
    }

    pub fn wait_path(name: impl Into<String>, path: Path) -> Self {
        Self::with_kind(name, StepKind::Wait { seconds: None, seconds_path: Some(path) })
    }

    pub fn choice(name: impl Into<String>, rules: Vec<ChoiceRule>, default: impl Into<String>) -> Self {
        Self::with_kind(name, StepKind::Choice { rules, default: default.into() })
    }

    pub fn pass(name: impl Into<String>) -> Self {
        Self::with_kind(name, StepKind::Pass { value: None, value_path: None })
    }

    pub fn pass_value(name: impl Into<String>, value: Value) -> Self {
        Self::with_kind(name, StepKind::Pass { value: Some(value), value_path: None })
    }

    pub fn then(mut self, next: impl Into<String>) -> Self {
        self.next = Some(next.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        if let StepKind::Task { timeout_secs, .. } = &mut self.kind {
            *timeout_secs = Some(timeout.as_secs());
        }
        self
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry.push(policy);
        self
    }

    pub fn with_catch(mut self, policy: CatchPolicy) -> Self {
        self.catch.push(policy);
        self
    }

    pub fn with_input_path(mut self, path: Path) -> Self {
        self.input_path = Some(path);
        self
    }

    pub fn with_output_path(mut self, path: Path) -> Self {
        self.output_path = Some(path);
        self
    }

    pub fn with_result_path(mut self, path: Path) -> Self {
        self.result_path = Some(path);
        self
    }

    /// Choice steps always route somewhere; others end the run without `next`.
    pub fn is_terminal(&self) -> bool {
        self.next.is_none() && !matches!(self.kind, StepKind::Choice { .. })
    }

    /// Every outgoing edge as `(target, edge kind)`.
    pub fn edges(&self) -> Vec<(&str, &'static str)> {
        let mut edges = Vec::new();
        if let Some(next) = &self.next {
            edges.push((next.as_str(), "next"));
        }
        if let StepKind::Choice { rules, default } = &self.kind {
            edges.extend(rules.iter().map(|rule| (rule.next.as_str(), "choice")));
            edges.push((default.as_str(), "default"));
        }
        edges.extend(self.catch.iter().map(|c| (c.next.as_str(), "catch")));
        edges
    }
}

// ---------------------------------------------------------------------------
// GraphDefinition
// ---------------------------------------------------------------------------

/// A complete, unvalidated workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDefinition {
    /// Identifier the run control surface addresses the graph by.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub start: String,
    /// Overall deadline applied to runs that do not request their own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Enables bounded re-execution: choice/catch edges may re-enter earlier
    /// steps, and no step may be entered more than this many times per run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_step_visits: Option<u32>,
    pub steps: Vec<StepDefinition>,
}

impl GraphDefinition {
    pub fn new(name: impl Into<String>, start: impl Into<String>, steps: Vec<StepDefinition>) -> Self {
        Self {
            name: name.into(),
            comment: None,
            start: start.into(),
            timeout_secs: None,
            max_step_visits: None,
            steps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn step_wire_format_is_flat_and_tagged() {
        let step: StepDefinition = serde_json::from_value(json!({
            "name": "InitiateCall",
            "type": "task",
            "capability": "call.initiate",
            "timeout_secs": 30,
            "output_path": "$.Payload",
            "next": "WaitForConnection",
            "retry": [{ "max_attempts": 2, "interval_secs": 2, "backoff_rate": 2 }]
        }))
        .unwrap();

        assert_eq!(
            step.kind,
            StepKind::Task { capability: "call.initiate".into(), timeout_secs: Some(30) }
        );
        assert_eq!(step.next.as_deref(), Some("WaitForConnection"));
        assert_eq!(step.retry[0].errors, vec![ErrorMatcher::All]);
        assert_eq!(step.retry[0].max_attempts, 2);
        assert_eq!(step.output_path.as_ref().map(Path::as_str), Some("$.Payload"));
    }

    #[test]
    fn definition_round_trips_through_json() {
        let definition = GraphDefinition::new(
            "route",
            "Route",
            vec![
                StepDefinition::choice(
                    "Route",
                    vec![ChoiceRule {
                        condition: Predicate::equals("$.kind".parse().unwrap(), "a"),
                        next: "A".into(),
                    }],
                    "B",
                ),
                StepDefinition::pass_value("A", json!({ "picked": "a" })),
                StepDefinition::wait_seconds("B", 1.5)
                    .with_catch(CatchPolicy::new(vec![ErrorMatcher::InvalidInput], "A")),
            ],
        );

        let text = serde_json::to_string(&definition).unwrap();
        let back: GraphDefinition = serde_json::from_str(&text).unwrap();
        assert_eq!(back, definition);
    }

    #[test]
    fn catch_defaults_to_error_path() {
        let policy: CatchPolicy = serde_json::from_value(json!({ "next": "Failed" })).unwrap();
        assert_eq!(policy.result_path.as_str(), "$.error");
        assert!(policy.applies_to(FailureKind::InvalidInput));
        assert!(!policy.applies_to(FailureKind::GraphError));
    }

    #[test]
    fn retry_all_skips_invalid_input() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1), 2.0);
        assert!(policy.applies_to(FailureKind::Timeout));
        assert!(policy.applies_to(FailureKind::CapabilityError));
        assert!(!policy.applies_to(FailureKind::InvalidInput));

        let explicit = policy.on(vec![ErrorMatcher::InvalidInput]);
        assert!(explicit.applies_to(FailureKind::InvalidInput));
        assert!(!explicit.applies_to(FailureKind::Timeout));
    }

    #[test]
    fn terminal_and_edges() {
        let choice = StepDefinition::choice("Route", vec![], "End");
        assert!(!choice.is_terminal());
        assert_eq!(choice.edges(), vec![("End", "default")]);

        let end = StepDefinition::pass("End");
        assert!(end.is_terminal());
        assert!(end.edges().is_empty());
    }
}
