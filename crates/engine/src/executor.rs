//! Run execution engine.
//!
//! `RunExecutor` drives one run of a [`StateGraph`] from its start step to a
//! terminal status:
//! 1. Checks cancellation and the overall deadline before every dispatch.
//! 2. Dispatches the current step by kind (Task, Wait, Choice, Pass).
//! 3. Appends a history entry for the attempted transition, then moves
//!    `current_step`.
//! 4. Hands failures to the retry/catch policy engine; only unhandled or
//!    exhausted failures end the run as `Failed`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use capabilities::{CapabilityRegistry, ContextStore, EventSink, InvocationContext};

use crate::checkpoint::{CheckpointQueue, Checkpointer};
use crate::error::StepFailure;
use crate::expression::{self, merge_into, Path};
use crate::graph::StateGraph;
use crate::history::{HistoryEventKind, JournalWriter};
use crate::invoker;
use crate::models::{ChoiceRule, StepDefinition, StepKind};
use crate::policy::{self, Decision};
use crate::run::{RunFailure, RunState, RunStatus};
use crate::timer::{Raced, Timer};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for the executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Invocation timeout for Task steps that do not set `timeout_secs`.
    pub default_task_timeout: Duration,
    /// Overall run budget when neither the caller nor the graph sets one.
    pub default_run_timeout: Duration,
    /// How long a finishing run waits for its queued checkpoints.
    pub checkpoint_flush_timeout: Duration,
    /// How long a finished run stays queryable in memory.
    pub finished_run_retention: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_task_timeout: Duration::from_secs(300),
            default_run_timeout: Duration::from_secs(600),
            checkpoint_flush_timeout: Duration::from_secs(10),
            finished_run_retention: Duration::from_secs(3600),
        }
    }
}

// ---------------------------------------------------------------------------
// Internal step results
// ---------------------------------------------------------------------------

/// A successful dispatch.
#[derive(Debug)]
struct Advance {
    /// Replacement data document; `None` leaves it untouched.
    data: Option<Value>,
    /// Recorded as the history payload.
    output: Option<Value>,
    /// `None` ends the run.
    next: Option<String>,
}

/// Where a run's transitions go.
struct Recorder {
    journal: JournalWriter,
    checkpoints: Option<CheckpointQueue>,
}

/// One history entry about to be appended.
struct Transition<'a> {
    kind: HistoryEventKind,
    step: Option<&'a str>,
    attempt: u32,
    payload: Option<Value>,
    error: Option<StepFailure>,
}

impl<'a> Transition<'a> {
    fn run(kind: HistoryEventKind) -> Self {
        Self { kind, step: None, attempt: 0, payload: None, error: None }
    }

    fn step(kind: HistoryEventKind, step: &'a str, attempt: u32) -> Self {
        Self { kind, step: Some(step), attempt, payload: None, error: None }
    }

    fn payload(mut self, payload: Option<Value>) -> Self {
        self.payload = payload;
        self
    }

    fn error(mut self, error: StepFailure) -> Self {
        self.error = Some(error);
        self
    }
}

// ---------------------------------------------------------------------------
// RunExecutor
// ---------------------------------------------------------------------------

/// Drives a single run. Holds only shared, read-only collaborators, so one
/// executor per run is cheap.
pub struct RunExecutor {
    graph: Arc<StateGraph>,
    registry: Arc<CapabilityRegistry>,
    store: Arc<dyn ContextStore>,
    events: Arc<dyn EventSink>,
    checkpointer: Option<Arc<dyn Checkpointer>>,
    config: ExecutorConfig,
}

impl RunExecutor {
    /// Create a new executor.
    pub fn new(
        graph: Arc<StateGraph>,
        registry: Arc<CapabilityRegistry>,
        store: Arc<dyn ContextStore>,
        events: Arc<dyn EventSink>,
        config: ExecutorConfig,
    ) -> Self {
        Self { graph, registry, store, events, checkpointer: None, config }
    }

    pub fn with_checkpointer(mut self, checkpointer: Option<Arc<dyn Checkpointer>>) -> Self {
        self.checkpointer = checkpointer;
        self
    }

    /// Run until a terminal status and return the final state.
    ///
    /// `deadline` is the monotonic counterpart of `state.deadline`. The run
    /// never returns an error: failures are reflected in the returned
    /// state and in the journal.
    #[instrument(skip_all, fields(run_id = %state.run_id, graph = %state.graph))]
    pub async fn run(
        &self,
        mut state: RunState,
        deadline: Instant,
        journal: JournalWriter,
        cancel: CancellationToken,
    ) -> RunState {
        let timer = Timer::new(deadline, cancel);
        let mut rec = Recorder {
            journal,
            checkpoints: self.checkpointer.clone().map(CheckpointQueue::spawn),
        };

        state.status = RunStatus::Running;
        self.record(
            &mut rec,
            &state,
            Transition::run(HistoryEventKind::RunStarted).payload(Some(state.data.clone())),
        )
        .await;
        self.emit("run.started", &state);
        info!(start = %state.current_step, "run started");

        loop {
            if timer.is_cancelled() {
                return self.abandon(state, &mut rec, RunStatus::Cancelled).await;
            }
            if timer.expired() {
                return self.abandon(state, &mut rec, RunStatus::TimedOut).await;
            }

            let Some(step) = self.graph.step(&state.current_step) else {
                let failure = StepFailure::graph(format!("step '{}' is not defined", state.current_step));
                return self.fail(state, &mut rec, failure).await;
            };

            if state.attempt == 0 {
                let visits = state.visits.entry(step.name.clone()).or_insert(0);
                *visits += 1;
                if let Some(max) = self.graph.max_step_visits() {
                    if *visits > max {
                        let failure = StepFailure::graph(format!(
                            "step '{}' entered more than {max} times",
                            step.name
                        ));
                        return self.fail(state, &mut rec, failure).await;
                    }
                }
            }

            let attempt = state.attempt + 1;
            debug!(step = %step.name, kind = step.kind.label(), attempt, "dispatching step");

            let advance = match self.dispatch(step, &state, attempt, &timer).await {
                Raced::Done(Ok(advance)) => advance,
                Raced::Done(Err(failure)) => {
                    state.attempt = attempt;
                    warn!(step = %step.name, attempt, kind = %failure.kind, error = %failure.message, "step failed");
                    self.record(
                        &mut rec,
                        &state,
                        Transition::step(HistoryEventKind::StepFailed, &step.name, attempt)
                            .error(failure.clone()),
                    )
                    .await;

                    match policy::decide(step, &failure, attempt) {
                        Decision::Retry { delay } => {
                            info!(step = %step.name, attempt, ?delay, "retrying step");
                            self.record(
                                &mut rec,
                                &state,
                                Transition::step(HistoryEventKind::StepRetrying, &step.name, attempt)
                                    .payload(Some(json!({ "delay_ms": delay.as_millis() as u64 }))),
                            )
                            .await;
                            match timer.sleep(delay).await {
                                Raced::Done(()) => continue,
                                Raced::Cancelled => {
                                    return self.abandon(state, &mut rec, RunStatus::Cancelled).await
                                }
                                Raced::Deadline => {
                                    return self.abandon(state, &mut rec, RunStatus::TimedOut).await
                                }
                            }
                        }
                        Decision::Catch(catcher) => {
                            let detail = policy::error_detail(&step.name, &failure);
                            if let Err(e) = catcher.result_path.write(&mut state.data, detail.clone()) {
                                return self.fail(state, &mut rec, e.into()).await;
                            }
                            info!(step = %step.name, next = %catcher.next, "failure caught");
                            self.record(
                                &mut rec,
                                &state,
                                Transition::step(HistoryEventKind::StepCaught, &step.name, attempt)
                                    .payload(Some(json!({ "next": catcher.next, "detail": detail }))),
                            )
                            .await;
                            state.current_step = catcher.next.clone();
                            state.attempt = 0;
                            rec.journal.publish(&state).await;
                            continue;
                        }
                        Decision::Fail => return self.fail(state, &mut rec, failure).await,
                    }
                }
                Raced::Cancelled => return self.abandon(state, &mut rec, RunStatus::Cancelled).await,
                Raced::Deadline => return self.abandon(state, &mut rec, RunStatus::TimedOut).await,
            };

            if let Some(data) = advance.data {
                state.data = data;
            }
            self.record(
                &mut rec,
                &state,
                Transition::step(HistoryEventKind::StepSucceeded, &step.name, attempt)
                    .payload(advance.output),
            )
            .await;
            state.attempt = 0;

            match advance.next {
                Some(next) => {
                    debug!(from = %step.name, to = %next, "transition");
                    state.current_step = next;
                    rec.journal.publish(&state).await;
                }
                None => return self.finish(state, &mut rec, RunStatus::Succeeded).await,
            }
        }
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    async fn dispatch(
        &self,
        step: &StepDefinition,
        state: &RunState,
        attempt: u32,
        timer: &Timer,
    ) -> Raced<Result<Advance, StepFailure>> {
        match &step.kind {
            StepKind::Task { capability, timeout_secs } => {
                self.run_task(step, capability, *timeout_secs, state, attempt, timer).await
            }
            StepKind::Wait { seconds, seconds_path } => {
                let duration = match wait_duration(*seconds, seconds_path.as_ref(), &state.data) {
                    Ok(duration) => duration,
                    Err(failure) => return Raced::Done(Err(failure)),
                };
                match timer.sleep(duration).await {
                    Raced::Done(()) => Raced::Done(Ok(Advance {
                        data: None,
                        output: Some(json!({ "waited_ms": duration.as_millis() as u64 })),
                        next: step.next.clone(),
                    })),
                    Raced::Deadline => Raced::Deadline,
                    Raced::Cancelled => Raced::Cancelled,
                }
            }
            StepKind::Choice { rules, default } => {
                Raced::Done(choose(rules, default, &state.data).map(|next| Advance {
                    data: None,
                    output: Some(json!({ "next": next })),
                    next: Some(next),
                }))
            }
            StepKind::Pass { value, value_path } => {
                Raced::Done(pass(step, value.as_ref(), value_path.as_ref(), &state.data))
            }
        }
    }

    async fn run_task(
        &self,
        step: &StepDefinition,
        capability: &str,
        timeout_secs: Option<u64>,
        state: &RunState,
        attempt: u32,
        timer: &Timer,
    ) -> Raced<Result<Advance, StepFailure>> {
        let Some(target) = self.registry.get(capability) else {
            return Raced::Done(Err(StepFailure::graph(format!(
                "capability '{capability}' is not registered"
            ))));
        };

        let input = match select(step.input_path.as_ref(), &state.data) {
            Ok(input) => input.clone(),
            Err(failure) => return Raced::Done(Err(failure)),
        };

        let ctx = InvocationContext {
            run_id: state.run_id,
            step_name: step.name.clone(),
            attempt,
            store: Arc::clone(&self.store),
            events: Arc::clone(&self.events),
        };
        let timeout = timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.config.default_task_timeout);

        match timer.race(invoker::invoke(target.as_ref(), input, &ctx, timeout)).await {
            Raced::Done(Ok(result)) => Raced::Done(apply_result(step, &state.data, result).map(
                |(data, kept)| Advance { data: Some(data), output: Some(kept), next: step.next.clone() },
            )),
            Raced::Done(Err(failure)) => Raced::Done(Err(failure)),
            Raced::Deadline => Raced::Deadline,
            Raced::Cancelled => Raced::Cancelled,
        }
    }

    // -----------------------------------------------------------------------
    // Terminal transitions
    // -----------------------------------------------------------------------

    /// The current step was pending or in flight; record it as abandoned.
    async fn abandon(&self, state: RunState, rec: &mut Recorder, status: RunStatus) -> RunState {
        let attempt = state.attempt + 1;
        self.record(
            rec,
            &state,
            Transition::step(HistoryEventKind::StepAbandoned, &state.current_step, attempt),
        )
        .await;
        self.finish(state, rec, status).await
    }

    async fn fail(&self, mut state: RunState, rec: &mut Recorder, failure: StepFailure) -> RunState {
        state.failure = Some(RunFailure {
            kind: failure.kind,
            step: state.current_step.clone(),
            message: failure.message,
        });
        self.finish(state, rec, RunStatus::Failed).await
    }

    async fn finish(&self, mut state: RunState, rec: &mut Recorder, status: RunStatus) -> RunState {
        state.status = status;
        state.finished_at = Some(Utc::now());

        let (kind, event_type) = match status {
            RunStatus::Succeeded => (HistoryEventKind::RunSucceeded, "run.succeeded"),
            RunStatus::TimedOut => (HistoryEventKind::RunTimedOut, "run.timed_out"),
            RunStatus::Cancelled => (HistoryEventKind::RunCancelled, "run.cancelled"),
            _ => (HistoryEventKind::RunFailed, "run.failed"),
        };

        let mut transition = Transition::run(kind).payload(Some(state.data.clone()));
        if let Some(failure) = &state.failure {
            transition = transition.error(StepFailure::new(failure.kind, failure.message.clone()));
        }
        self.record(rec, &state, transition).await;
        self.emit(event_type, &state);

        match status {
            RunStatus::Succeeded => info!(step = %state.current_step, "run succeeded"),
            _ => warn!(%status, step = %state.current_step, "run ended without success"),
        }
        state
    }

    // -----------------------------------------------------------------------
    // Side channels
    // -----------------------------------------------------------------------

    /// Append to history, queue the checkpoint, then publish the state
    /// snapshot. A terminal snapshot is published only once queued
    /// checkpoints have landed or the flush limit has passed.
    async fn record(&self, rec: &mut Recorder, state: &RunState, t: Transition<'_>) {
        let entry = rec.journal.append(t.kind, t.step, t.attempt, t.payload, t.error).await;

        if let Some(queue) = &mut rec.checkpoints {
            queue.push(state, entry);
            let limit = self.config.checkpoint_flush_timeout;
            if state.status.is_terminal() && !queue.drain(limit).await {
                warn!(?limit, "checkpoints not flushed before the run ended");
            }
        }
        rec.journal.publish(state).await;
    }

    /// Fire-and-forget lifecycle event.
    fn emit(&self, event_type: &'static str, state: &RunState) {
        let payload = json!({
            "run_id": state.run_id,
            "graph": state.graph,
            "status": state.status,
            "step": state.current_step,
            "failure": state.failure,
        });
        let sink = Arc::clone(&self.events);
        tokio::spawn(async move {
            if let Err(e) = sink.publish(event_type, payload).await {
                warn!(event_type, error = %e, "event publication failed");
            }
        });
    }
}

// ---------------------------------------------------------------------------
// Data-flow helpers
// ---------------------------------------------------------------------------

fn select<'a>(path: Option<&Path>, data: &'a Value) -> Result<&'a Value, StepFailure> {
    match path {
        Some(path) => Ok(path.select(data)?),
        None => Ok(data),
    }
}

/// Apply `output_path` to `result`, then write it into a copy of `data` at
/// `result_path` (or merge it at the root). Returns the new document and
/// the kept value.
fn apply_result(step: &StepDefinition, data: &Value, result: Value) -> Result<(Value, Value), StepFailure> {
    let kept = match &step.output_path {
        Some(path) => path.select(&result)?.clone(),
        None => result,
    };

    let mut doc = data.clone();
    match &step.result_path {
        Some(path) => path.write(&mut doc, kept.clone())?,
        None => merge_into(&mut doc, kept.clone())?,
    }
    Ok((doc, kept))
}

fn wait_duration(seconds: Option<f64>, path: Option<&Path>, data: &Value) -> Result<Duration, StepFailure> {
    let secs = match (seconds, path) {
        (Some(secs), _) => secs,
        (None, Some(path)) => {
            let value = path.select(data)?;
            value.as_f64().ok_or_else(|| {
                StepFailure::invalid_input(format!("wait duration at '{path}' is not numeric (got {value})"))
            })?
        }
        (None, None) => return Err(StepFailure::graph("wait step has no duration")),
    };

    if !(secs.is_finite() && secs > 0.0) {
        return Err(StepFailure::invalid_input(format!(
            "wait duration must be a positive number of seconds, got {secs}"
        )));
    }
    Duration::try_from_secs_f64(secs)
        .map_err(|e| StepFailure::invalid_input(format!("wait duration {secs}s: {e}")))
}

/// First matching rule wins; `default` when none match.
fn choose(rules: &[ChoiceRule], default: &str, data: &Value) -> Result<String, StepFailure> {
    for rule in rules {
        if expression::evaluate(&rule.condition, data)? {
            return Ok(rule.next.clone());
        }
    }
    Ok(default.to_owned())
}

fn pass(
    step: &StepDefinition,
    value: Option<&Value>,
    value_path: Option<&Path>,
    data: &Value,
) -> Result<Advance, StepFailure> {
    let source = match (value, value_path) {
        (Some(value), _) => value.clone(),
        (None, Some(path)) => path.select(data)?.clone(),
        (None, None) => {
            return Ok(Advance { data: None, output: None, next: step.next.clone() });
        }
    };

    let (doc, kept) = apply_result(step, data, source)?;
    Ok(Advance { data: Some(doc), output: Some(kept), next: step.next.clone() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::Predicate;
    use crate::error::FailureKind;

    fn path(raw: &str) -> Path {
        raw.parse().unwrap()
    }

    #[test]
    fn output_path_then_result_path() {
        let step = StepDefinition::task("InitiateCall", "call.initiate")
            .with_output_path(path("$.Payload"))
            .with_result_path(path("$.call"));
        let (doc, kept) = apply_result(
            &step,
            &json!({ "phone": "+15550100" }),
            json!({ "Payload": { "call_sid": "CA1" }, "StatusCode": 200 }),
        )
        .unwrap();

        assert_eq!(kept, json!({ "call_sid": "CA1" }));
        assert_eq!(doc, json!({ "phone": "+15550100", "call": { "call_sid": "CA1" } }));
    }

    #[test]
    fn missing_output_path_is_invalid_input() {
        let step = StepDefinition::task("Analyze", "a").with_output_path(path("$.Payload"));
        let err = apply_result(&step, &json!({}), json!({ "other": 1 })).unwrap_err();
        assert_eq!(err.kind, FailureKind::InvalidInput);
    }

    #[test]
    fn scalar_result_without_result_path_cannot_merge() {
        let step = StepDefinition::task("Count", "c");
        let err = apply_result(&step, &json!({}), json!(3)).unwrap_err();
        assert_eq!(err.kind, FailureKind::InvalidInput);
    }

    #[test]
    fn wait_duration_rules() {
        let data = json!({ "delay": 2.5, "zero": 0, "negative": -1, "text": "soon" });
        assert_eq!(wait_duration(Some(10.0), None, &data).unwrap(), Duration::from_secs(10));
        assert_eq!(
            wait_duration(None, Some(&path("$.delay")), &data).unwrap(),
            Duration::from_millis(2500)
        );

        for bad in ["$.zero", "$.negative", "$.text", "$.absent"] {
            let err = wait_duration(None, Some(&path(bad)), &data).unwrap_err();
            assert_eq!(err.kind, FailureKind::InvalidInput, "{bad}");
        }
        assert_eq!(wait_duration(Some(0.0), None, &data).unwrap_err().kind, FailureKind::InvalidInput);
        assert_eq!(wait_duration(Some(-3.0), None, &data).unwrap_err().kind, FailureKind::InvalidInput);
    }

    #[test]
    fn choice_is_first_match_wins() {
        let rules = vec![
            ChoiceRule { condition: Predicate::exists(path("$.a")), next: "X".into() },
            ChoiceRule { condition: Predicate::exists(path("$.b")), next: "Y".into() },
        ];
        let both = json!({ "a": 1, "b": 2 });
        for _ in 0..10 {
            assert_eq!(choose(&rules, "Z", &both).unwrap(), "X");
        }
        assert_eq!(choose(&rules, "Z", &json!({ "b": 2 })).unwrap(), "Y");
        assert_eq!(choose(&rules, "Z", &json!({})).unwrap(), "Z");
    }

    #[test]
    fn pass_from_path_and_identity() {
        let data = json!({ "analysis": { "connection_type": "human" } });

        let step = StepDefinition::pass("Lift").then("Next");
        let advance = pass(&step, None, Some(&path("$.analysis")), &data).unwrap();
        assert_eq!(
            advance.data.unwrap(),
            json!({ "analysis": { "connection_type": "human" }, "connection_type": "human" })
        );

        let identity = StepDefinition::pass("Noop").then("Next");
        let advance = pass(&identity, None, None, &data).unwrap();
        assert!(advance.data.is_none());
        assert_eq!(advance.next.as_deref(), Some("Next"));

        let err = pass(&step, None, Some(&path("$.missing")), &data).unwrap_err();
        assert_eq!(err.kind, FailureKind::InvalidInput);
    }
}
