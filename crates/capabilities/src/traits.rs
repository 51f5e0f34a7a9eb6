//! The `Capability` trait, the contract every Task invoker must fulfil.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::{CapabilityError, ContextStore, EventSink};

/// Context handed to every capability invocation.
///
/// Defined here (in the capabilities crate) so both the engine and the
/// individual capability implementations can import it without a circular
/// dependency.
#[derive(Clone)]
pub struct InvocationContext {
    /// ID of the run that owns the Task step.
    pub run_id: Uuid,
    /// Name of the Task step being executed.
    pub step_name: String,
    /// 1-based attempt number for this step (retries increment it).
    pub attempt: u32,
    /// Durable key-value store for call/business context.
    pub store: Arc<dyn ContextStore>,
    /// Fire-and-forget sink for downstream events.
    pub events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationContext")
            .field("run_id", &self.run_id)
            .field("step_name", &self.step_name)
            .field("attempt", &self.attempt)
            .finish_non_exhaustive()
    }
}

/// The core capability trait.
///
/// A capability is stateless per invocation: it receives the slice of the
/// run's data document selected by the step's input path and returns a JSON
/// result. Timeouts are enforced by the caller, so implementations may
/// simply await their external system.
#[async_trait]
pub trait Capability: Send + Sync {
    async fn invoke(&self, input: Value, ctx: &InvocationContext) -> Result<Value, CapabilityError>;
}
