//! Adapter for external operations that are started once and then polled
//! until they settle (e.g. a speech analysis job).

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::{Capability, CapabilityError, InvocationContext};

/// State reported by one poll.
#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus {
    Pending,
    Complete(Value),
    Failed(String),
}

/// A submit-then-poll external operation.
#[async_trait]
pub trait PolledOperation: Send + Sync {
    /// Start the operation and return an opaque handle.
    async fn submit(&self, input: Value, ctx: &InvocationContext) -> Result<String, CapabilityError>;

    async fn poll(&self, handle: &str, ctx: &InvocationContext) -> Result<PollStatus, CapabilityError>;
}

/// Turns a [`PolledOperation`] into a [`Capability`].
///
/// The engine's per-invocation timeout still bounds the whole loop;
/// `max_polls` only guards against an operation that never settles when no
/// timeout is configured.
pub struct Polling<P> {
    operation: P,
    interval: Duration,
    max_polls: Option<u32>,
}

impl<P: PolledOperation> Polling<P> {
    pub fn new(operation: P, interval: Duration) -> Self {
        Self { operation, interval, max_polls: None }
    }

    pub fn with_max_polls(mut self, max_polls: u32) -> Self {
        self.max_polls = Some(max_polls);
        self
    }
}

#[async_trait]
impl<P: PolledOperation> Capability for Polling<P> {
    async fn invoke(&self, input: Value, ctx: &InvocationContext) -> Result<Value, CapabilityError> {
        let handle = self.operation.submit(input, ctx).await?;
        let mut polls = 0u32;

        loop {
            match self.operation.poll(&handle, ctx).await? {
                PollStatus::Complete(value) => return Ok(value),
                PollStatus::Failed(message) => return Err(CapabilityError::Failed(message)),
                PollStatus::Pending => {
                    polls += 1;
                    if self.max_polls.is_some_and(|max| polls >= max) {
                        return Err(CapabilityError::Timeout(format!(
                            "operation '{handle}' still pending after {polls} polls"
                        )));
                    }
                    debug!(run_id = %ctx.run_id, step = %ctx.step_name, handle, polls, "operation pending");
                    tokio::time::sleep(self.interval).await;
                }
            }
        }
    }
}
