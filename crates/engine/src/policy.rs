//! Retry/Catch Policy Engine.
//!
//! Given a step failure and the number of attempts made so far, decides
//! whether to retry (after an exponential back-off), route to a catch
//! target, or fail the run. Stateless; the executor owns the counters.

use std::time::Duration;

use serde_json::{json, Value};

use crate::error::{FailureKind, StepFailure};
use crate::models::{CatchPolicy, RetryPolicy, StepDefinition};

/// What the executor should do with a failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision<'a> {
    /// Sleep for `delay`, then dispatch the same step again.
    Retry { delay: Duration },
    /// Record the error at the policy's result path and move to its target.
    Catch(&'a CatchPolicy),
    /// No policy applies (or retries are exhausted and nothing catches).
    Fail,
}

/// Decide the fate of a failed attempt.
///
/// `attempts` is the number of attempts made for the current step,
/// including the one that just failed (so it is at least 1). The first
/// retry policy whose matchers cover the failure kind is the one consulted.
/// Graph errors are never retried or caught.
pub fn decide<'a>(step: &'a StepDefinition, failure: &StepFailure, attempts: u32) -> Decision<'a> {
    if failure.kind == FailureKind::GraphError {
        return Decision::Fail;
    }

    if let Some(policy) = step.retry.iter().find(|p| p.applies_to(failure.kind)) {
        if attempts < policy.max_attempts {
            return Decision::Retry { delay: backoff_delay(policy, attempts) };
        }
    }

    match step.catch.iter().find(|c| c.applies_to(failure.kind)) {
        Some(policy) => Decision::Catch(policy),
        None => Decision::Fail,
    }
}

/// `interval * backoff_rate^(attempt - 1)`, capped by `max_delay_secs`.
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
    let mut secs = policy.interval_secs * policy.backoff_rate.powi(exponent);
    if let Some(max) = policy.max_delay_secs {
        secs = secs.min(max);
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

/// The document fragment a catch policy writes at its result path.
pub fn error_detail(step: &str, failure: &StepFailure) -> Value {
    json!({
        "error": failure.kind,
        "cause": failure.message,
        "step": step,
    })
}
