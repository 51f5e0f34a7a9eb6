//! Capabilities that ship with the engine.
//!
//! | name             | input                                  | output |
//! |------------------|----------------------------------------|--------|
//! | `echo`           | anything                               | the input |
//! | `context.get`    | `{ "key": string }`                    | `{ "key", "found", "value" }` |
//! | `context.put`    | `{ "key": string, "value": any }`      | `{ "key", "stored": true }` |
//! | `events.publish` | `{ "event_type": string, "payload"? }` | `{ "event_type", "published" }` |

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::{Capability, CapabilityError, CapabilityRegistry, InvocationContext};

/// Register every built-in under its conventional name.
pub fn register_builtins(registry: &mut CapabilityRegistry) {
    registry.register("echo", Arc::new(Echo));
    registry.register("context.get", Arc::new(ContextGet));
    registry.register("context.put", Arc::new(ContextPut));
    registry.register("events.publish", Arc::new(PublishEvent));
}

fn required_str<'a>(input: &'a Value, field: &str) -> Result<&'a str, CapabilityError> {
    input
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| CapabilityError::InvalidInput(format!("missing string field '{field}'")))
}

/// Returns its input unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct Echo;

#[async_trait]
impl Capability for Echo {
    async fn invoke(&self, input: Value, _ctx: &InvocationContext) -> Result<Value, CapabilityError> {
        Ok(input)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ContextGet;

#[async_trait]
impl Capability for ContextGet {
    async fn invoke(&self, input: Value, ctx: &InvocationContext) -> Result<Value, CapabilityError> {
        let key = required_str(&input, "key")?;
        let value = ctx.store.get(key).await?;
        debug!(run_id = %ctx.run_id, key, found = value.is_some(), "context read");
        Ok(json!({
            "key": key,
            "found": value.is_some(),
            "value": value.unwrap_or(Value::Null),
        }))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ContextPut;

#[async_trait]
impl Capability for ContextPut {
    async fn invoke(&self, input: Value, ctx: &InvocationContext) -> Result<Value, CapabilityError> {
        let key = required_str(&input, "key")?;
        let value = input
            .get("value")
            .cloned()
            .ok_or_else(|| CapabilityError::InvalidInput("missing field 'value'".into()))?;
        ctx.store.put(key, value).await?;
        debug!(run_id = %ctx.run_id, key, "context written");
        Ok(json!({ "key": key, "stored": true }))
    }
}

/// Publishes to the run's event sink. A sink failure is logged and reported
/// as `published: false`; it never fails the step.
#[derive(Debug, Default, Clone, Copy)]
pub struct PublishEvent;

#[async_trait]
impl Capability for PublishEvent {
    async fn invoke(&self, input: Value, ctx: &InvocationContext) -> Result<Value, CapabilityError> {
        let event_type = required_str(&input, "event_type")?;
        let payload = input.get("payload").cloned().unwrap_or(Value::Null);

        let published = match ctx.events.publish(event_type, payload).await {
            Ok(()) => true,
            Err(e) => {
                warn!(run_id = %ctx.run_id, event_type, error = %e, "event publication failed");
                false
            }
        };
        Ok(json!({ "event_type": event_type, "published": published }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{test_context, RecordingEventSink};
    use crate::EventError;
    use crate::EventSink;

    #[tokio::test]
    async fn echo_returns_input() {
        let ctx = test_context("Echo");
        let out = Echo.invoke(json!({ "a": [1, 2] }), &ctx).await.unwrap();
        assert_eq!(out, json!({ "a": [1, 2] }));
    }

    #[tokio::test]
    async fn context_put_then_get_goes_through_the_store() {
        let ctx = test_context("Context");
        ContextPut
            .invoke(json!({ "key": "call:1", "value": { "folios": 3 } }), &ctx)
            .await
            .unwrap();

        let out = ContextGet.invoke(json!({ "key": "call:1" }), &ctx).await.unwrap();
        assert_eq!(out["found"], true);
        assert_eq!(out["value"], json!({ "folios": 3 }));

        let missing = ContextGet.invoke(json!({ "key": "call:2" }), &ctx).await.unwrap();
        assert_eq!(missing["found"], false);
        assert_eq!(missing["value"], Value::Null);
    }

    #[tokio::test]
    async fn context_get_without_key_is_invalid_input() {
        let ctx = test_context("Context");
        let err = ContextGet.invoke(json!({}), &ctx).await.unwrap_err();
        assert!(matches!(err, CapabilityError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn publish_event_reaches_the_sink() {
        let sink = Arc::new(RecordingEventSink::default());
        let mut ctx = test_context("PublishCallEnded");
        ctx.events = sink.clone();

        let out = PublishEvent
            .invoke(json!({ "event_type": "CallEnded", "payload": { "call_id": "c-1" } }), &ctx)
            .await
            .unwrap();

        assert_eq!(out["published"], true);
        assert_eq!(
            sink.events(),
            vec![("CallEnded".to_string(), json!({ "call_id": "c-1" }))]
        );
    }

    struct BrokenSink;

    #[async_trait]
    impl EventSink for BrokenSink {
        async fn publish(&self, _event_type: &str, _payload: Value) -> Result<(), EventError> {
            Err(EventError::Unavailable("bus down".into()))
        }
    }

    #[tokio::test]
    async fn sink_failure_does_not_fail_the_step() {
        let mut ctx = test_context("PublishCallEnded");
        ctx.events = Arc::new(BrokenSink);

        let out = PublishEvent
            .invoke(json!({ "event_type": "CallEnded" }), &ctx)
            .await
            .unwrap();
        assert_eq!(out["published"], false);
    }
}
