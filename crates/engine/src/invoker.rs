//! Task Invoker adapter: one capability call, bounded by the step's
//! invocation timeout, with the result classified into a [`StepFailure`].

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, instrument};

use capabilities::{Capability, InvocationContext};

use crate::error::{FailureKind, StepFailure};

/// Invoke `capability` and enforce `timeout` regardless of whether the
/// capability honours it. On timeout the invocation future is dropped.
#[instrument(skip_all, fields(run_id = %ctx.run_id, step = %ctx.step_name, attempt = ctx.attempt))]
pub async fn invoke(
    capability: &dyn Capability,
    input: Value,
    ctx: &InvocationContext,
    timeout: Duration,
) -> Result<Value, StepFailure> {
    match tokio::time::timeout(timeout, capability.invoke(input, ctx)).await {
        Ok(Ok(output)) => {
            debug!("capability returned");
            Ok(output)
        }
        Ok(Err(err)) => {
            debug!(error = %err, "capability failed");
            Err(err.into())
        }
        Err(_elapsed) => Err(StepFailure::new(
            FailureKind::Timeout,
            format!("capability did not answer within {timeout:?}"),
        )),
    }
}
