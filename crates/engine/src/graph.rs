//! State graph validation. Run this before registering or executing a
//! workflow.
//!
//! Rules enforced by [`StateGraph::build`]:
//! 1. Step names must be unique and `start` must exist.
//! 2. Every edge (`next`, choice rule, choice default, catch) must reference
//!    a defined step.
//! 3. Kind-specific parameters and retry policies must be well formed.
//! 4. Every step must be reachable from `start`.
//! 5. `next` edges must be acyclic; other edges too, unless the definition
//!    enables bounded re-execution with `max_step_visits`.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::time::Duration;

use crate::error::GraphError;
use crate::models::{GraphDefinition, RetryPolicy, StepDefinition, StepKind};

/// A validated, immutable workflow graph, shared read-only (behind an
/// `Arc`) by every run.
#[derive(Debug, Clone)]
pub struct StateGraph {
    definition: GraphDefinition,
    index: HashMap<String, usize>,
}

impl StateGraph {
    /// Validate `definition` and build the graph.
    ///
    /// # Errors
    /// The first [`GraphError`] found, checked in the order listed in the
    /// module docs.
    pub fn build(definition: GraphDefinition) -> Result<Self, GraphError> {
        if definition.steps.is_empty() {
            return Err(GraphError::Empty);
        }

        // -------------------------------------------------------------------
        // 1. Unique names, known start
        // -------------------------------------------------------------------
        let mut index = HashMap::with_capacity(definition.steps.len());
        for (position, step) in definition.steps.iter().enumerate() {
            if index.insert(step.name.clone(), position).is_some() {
                return Err(GraphError::DuplicateStep(step.name.clone()));
            }
        }

        if !index.contains_key(&definition.start) {
            return Err(GraphError::UnknownStart(definition.start.clone()));
        }

        if definition.max_step_visits == Some(0) {
            return Err(GraphError::InvalidDefinition(
                "max_step_visits must be at least 1".into(),
            ));
        }

        // -------------------------------------------------------------------
        // 2 + 3. Edge endpoints and per-step parameters
        // -------------------------------------------------------------------
        for step in &definition.steps {
            for (target, edge) in step.edges() {
                if !index.contains_key(target) {
                    return Err(GraphError::UnknownTarget {
                        step: step.name.clone(),
                        target: target.to_owned(),
                        edge,
                    });
                }
            }
            validate_step(step)?;
        }

        let graph = Self { definition, index };

        // -------------------------------------------------------------------
        // 4. Reachability
        // -------------------------------------------------------------------
        let reachable: HashSet<&str> = graph.reachability_order().into_iter().collect();
        let unreachable: Vec<String> = graph
            .definition
            .steps
            .iter()
            .filter(|s| !reachable.contains(s.name.as_str()))
            .map(|s| s.name.clone())
            .collect();
        if !unreachable.is_empty() {
            return Err(GraphError::Unreachable(unreachable));
        }

        // -------------------------------------------------------------------
        // 5. Cycles
        // -------------------------------------------------------------------
        graph.check_acyclic(|_, edge| edge == "next")?;
        if graph.definition.max_step_visits.is_none() {
            graph.check_acyclic(|_, _| true)?;
        }

        Ok(graph)
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn start(&self) -> &str {
        &self.definition.start
    }

    pub fn step(&self, name: &str) -> Option<&StepDefinition> {
        self.index.get(name).map(|&i| &self.definition.steps[i])
    }

    pub fn steps(&self) -> &[StepDefinition] {
        &self.definition.steps
    }

    pub fn is_terminal(&self, name: &str) -> bool {
        self.step(name).is_some_and(StepDefinition::is_terminal)
    }

    /// Names of steps that end a run, in definition order.
    pub fn terminal_steps(&self) -> Vec<&str> {
        self.definition
            .steps
            .iter()
            .filter(|s| s.is_terminal())
            .map(|s| s.name.as_str())
            .collect()
    }

    /// Capability names referenced by Task steps.
    pub fn capabilities(&self) -> BTreeSet<&str> {
        self.definition
            .steps
            .iter()
            .filter_map(|s| match &s.kind {
                StepKind::Task { capability, .. } => Some(capability.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.definition.timeout_secs.map(Duration::from_secs)
    }

    pub fn max_step_visits(&self) -> Option<u32> {
        self.definition.max_step_visits
    }

    /// The definition this graph was built from. Building it again yields an
    /// equivalent graph.
    pub fn definition(&self) -> &GraphDefinition {
        &self.definition
    }

    /// Breadth-first order of the steps reachable from `start`.
    pub fn reachability_order(&self) -> Vec<&str> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut order = Vec::with_capacity(self.definition.steps.len());
        let mut queue: VecDeque<&str> = VecDeque::from([self.start()]);
        seen.insert(self.start());

        while let Some(name) = queue.pop_front() {
            order.push(name);
            if let Some(step) = self.step(name) {
                for (target, _) in step.edges() {
                    if seen.insert(target) {
                        queue.push_back(target);
                    }
                }
            }
        }
        order
    }

    /// Kahn's algorithm over the edges accepted by `include`.
    fn check_acyclic(&self, include: impl Fn(&str, &str) -> bool) -> Result<(), GraphError> {
        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        let mut in_degree: HashMap<&str, usize> = HashMap::new();

        for step in &self.definition.steps {
            adjacency.entry(step.name.as_str()).or_default();
            in_degree.entry(step.name.as_str()).or_insert(0);
        }

        for step in &self.definition.steps {
            for (target, edge) in step.edges() {
                if include(target, edge) {
                    adjacency.entry(step.name.as_str()).or_default().push(target);
                    *in_degree.entry(target).or_insert(0) += 1;
                }
            }
        }

        // Seed the queue with steps that have no incoming edges.
        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(&name, _)| name)
            .collect();

        let mut visited = 0usize;
        while let Some(name) = queue.pop_front() {
            visited += 1;
            if let Some(neighbours) = adjacency.get(name) {
                for &neighbour in neighbours {
                    let deg = in_degree.entry(neighbour).or_insert(0);
                    *deg -= 1;
                    if *deg == 0 {
                        queue.push_back(neighbour);
                    }
                }
            }
        }

        // If we didn't visit every step the graph contains a cycle.
        if visited != self.definition.steps.len() {
            let mut steps: Vec<String> = in_degree
                .into_iter()
                .filter(|(_, d)| *d > 0)
                .map(|(name, _)| name.to_owned())
                .collect();
            steps.sort();
            return Err(GraphError::Cycle { steps });
        }
        Ok(())
    }
}

fn validate_step(step: &StepDefinition) -> Result<(), GraphError> {
    match &step.kind {
        StepKind::Choice { .. } if step.next.is_some() => {
            return Err(GraphError::ChoiceWithNext(step.name.clone()));
        }
        StepKind::Wait { seconds, seconds_path } => {
            if seconds.is_some() == seconds_path.is_some() {
                return Err(GraphError::InvalidWait {
                    step: step.name.clone(),
                    reason: "exactly one of `seconds` or `seconds_path` is required".into(),
                });
            }
        }
        StepKind::Pass { value: Some(_), value_path: Some(_) } => {
            return Err(GraphError::InvalidPass {
                step: step.name.clone(),
                reason: "`value` and `value_path` are mutually exclusive".into(),
            });
        }
        _ => {}
    }

    for policy in &step.retry {
        validate_retry(&step.name, policy)?;
    }
    Ok(())
}

fn validate_retry(step: &str, policy: &RetryPolicy) -> Result<(), GraphError> {
    let invalid = |reason: &str| GraphError::InvalidRetryPolicy {
        step: step.to_owned(),
        reason: reason.to_owned(),
    };

    if policy.max_attempts < 1 {
        return Err(invalid("max_attempts must be at least 1"));
    }
    if !(policy.backoff_rate.is_finite() && policy.backoff_rate >= 1.0) {
        return Err(invalid("backoff_rate must be at least 1"));
    }
    if !(policy.interval_secs.is_finite() && policy.interval_secs >= 0.0) {
        return Err(invalid("interval_secs must be a non-negative number"));
    }
    if let Some(max) = policy.max_delay_secs {
        if !(max.is_finite() && max >= 0.0) {
            return Err(invalid("max_delay_secs must be a non-negative number"));
        }
    }
    if policy.errors.is_empty() {
        return Err(invalid("errors must name at least one failure kind"));
    }
    Ok(())
}
