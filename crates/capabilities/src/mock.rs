//! `MockCapability` — a test double for `Capability`, plus a recording
//! event sink.
//!
//! Useful in unit and integration tests where a real external system is
//! either unavailable or irrelevant.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::{
    Capability, CapabilityError, EventError, EventSink, InMemoryContextStore, InvocationContext,
};

/// Behaviour injected into `MockCapability` at construction time.
pub enum MockBehaviour {
    /// Return a specific JSON value.
    ReturnValue(Value),
    /// Always fail with the given error.
    Fail(CapabilityError),
    /// Fail the first `failures` calls, then return `value`.
    FailThenReturn {
        failures: u32,
        error: CapabilityError,
        value: Value,
    },
    /// Sleep (on the tokio clock) before returning `value`.
    Delay(Duration, Value),
    /// Park until [`MockCapability::release`] is called, then return `value`.
    Blocked(Value),
}

/// A mock capability that records every call it receives and returns a
/// programmer-specified result.
pub struct MockCapability {
    /// Label used in test assertions.
    pub name: String,
    /// What the capability will do when `invoke` is called.
    pub behaviour: MockBehaviour,
    /// All inputs seen by this capability (in call order).
    pub calls: Arc<Mutex<Vec<Value>>>,
    completed: AtomicU32,
    release: Notify,
}

impl MockCapability {
    fn with_behaviour(name: impl Into<String>, behaviour: MockBehaviour) -> Self {
        Self {
            name: name.into(),
            behaviour,
            calls: Arc::new(Mutex::new(Vec::new())),
            completed: AtomicU32::new(0),
            release: Notify::new(),
        }
    }

    /// Create a mock that always succeeds with the given value.
    pub fn returning(name: impl Into<String>, value: Value) -> Self {
        Self::with_behaviour(name, MockBehaviour::ReturnValue(value))
    }

    /// Create a mock that always fails with `error`.
    pub fn failing(name: impl Into<String>, error: CapabilityError) -> Self {
        Self::with_behaviour(name, MockBehaviour::Fail(error))
    }

    /// Create a mock that fails `failures` times before succeeding.
    pub fn failing_then_returning(
        name: impl Into<String>,
        failures: u32,
        error: CapabilityError,
        value: Value,
    ) -> Self {
        Self::with_behaviour(name, MockBehaviour::FailThenReturn { failures, error, value })
    }

    /// Create a mock that takes `delay` to answer.
    pub fn delayed(name: impl Into<String>, delay: Duration, value: Value) -> Self {
        Self::with_behaviour(name, MockBehaviour::Delay(delay, value))
    }

    /// Create a mock that blocks until released.
    pub fn blocked(name: impl Into<String>, value: Value) -> Self {
        Self::with_behaviour(name, MockBehaviour::Blocked(value))
    }

    /// Let a parked invocation finish.
    pub fn release(&self) {
        self.release.notify_one();
    }

    /// Number of times this capability has been invoked.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Inputs received so far.
    pub fn inputs(&self) -> Vec<Value> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of invocations that ran to completion (success or failure).
    pub fn completed_count(&self) -> u32 {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Capability for MockCapability {
    async fn invoke(&self, input: Value, _ctx: &InvocationContext) -> Result<Value, CapabilityError> {
        let call_number = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(input);
            calls.len() as u32
        };

        let result = match &self.behaviour {
            MockBehaviour::ReturnValue(v) => Ok(v.clone()),
            MockBehaviour::Fail(err) => Err(err.clone()),
            MockBehaviour::FailThenReturn { failures, error, value } => {
                if call_number <= *failures {
                    Err(error.clone())
                } else {
                    Ok(value.clone())
                }
            }
            MockBehaviour::Delay(delay, v) => {
                tokio::time::sleep(*delay).await;
                Ok(v.clone())
            }
            MockBehaviour::Blocked(v) => {
                self.release.notified().await;
                Ok(v.clone())
            }
        };

        self.completed.fetch_add(1, Ordering::SeqCst);
        result
    }
}

/// Event sink that keeps every published event in memory.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<(String, Value)>>,
}

impl RecordingEventSink {
    pub fn events(&self) -> Vec<(String, Value)> {
        self.events.lock().unwrap().clone()
    }

    pub fn event_types(&self) -> Vec<String> {
        self.events().into_iter().map(|(t, _)| t).collect()
    }
}

#[async_trait]
impl EventSink for RecordingEventSink {
    async fn publish(&self, event_type: &str, payload: Value) -> Result<(), EventError> {
        self.events.lock().unwrap().push((event_type.to_owned(), payload));
        Ok(())
    }
}

/// An `InvocationContext` backed by fresh in-memory collaborators.
pub fn test_context(step_name: &str) -> InvocationContext {
    InvocationContext {
        run_id: Uuid::new_v4(),
        step_name: step_name.to_owned(),
        attempt: 1,
        store: Arc::new(InMemoryContextStore::new()),
        events: Arc::new(RecordingEventSink::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn fail_then_return_switches_after_failures() {
        let ctx = test_context("Flaky");
        let mock = MockCapability::failing_then_returning(
            "flaky",
            2,
            CapabilityError::Failed("busy".into()),
            json!({ "ok": true }),
        );

        assert!(mock.invoke(json!(1), &ctx).await.is_err());
        assert!(mock.invoke(json!(2), &ctx).await.is_err());
        assert_eq!(mock.invoke(json!(3), &ctx).await.unwrap(), json!({ "ok": true }));
        assert_eq!(mock.inputs(), vec![json!(1), json!(2), json!(3)]);
        assert_eq!(mock.completed_count(), 3);
    }

    #[tokio::test]
    async fn blocked_mock_waits_for_release() {
        let ctx = test_context("Parked");
        let mock = Arc::new(MockCapability::blocked("parked", json!("done")));

        let task = {
            let mock = mock.clone();
            tokio::spawn(async move { mock.invoke(json!({}), &ctx).await })
        };

        tokio::task::yield_now().await;
        assert_eq!(mock.completed_count(), 0);

        mock.release();
        assert_eq!(task.await.unwrap().unwrap(), json!("done"));
        assert_eq!(mock.completed_count(), 1);
    }
}
