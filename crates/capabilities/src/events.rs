//! Fire-and-forget event publication to downstream systems.

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::EventError;

/// Publication failures are reported to the caller, which logs them; they
/// never fail a run.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event_type: &str, payload: Value) -> Result<(), EventError>;
}

/// Writes every event to the `tracing` subscriber. Default sink for the
/// binary when no downstream bus is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn publish(&self, event_type: &str, payload: Value) -> Result<(), EventError> {
        info!(target: "stepwise::events", event_type, %payload, "event published");
        Ok(())
    }
}
