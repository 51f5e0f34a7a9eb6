//! Error types for capabilities and the interfaces they consume.

use thiserror::Error;

/// Errors returned by a capability's `invoke` method.
///
/// The engine classifies the variant into a failure kind before consulting
/// the step's retry and catch policies:
/// - `Failed`       — the external task reported a failure.
/// - `Timeout`      — the external system itself gave up waiting.
/// - `InvalidInput` — the input handed to the capability was unusable.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CapabilityError {
    #[error("capability failed: {0}")]
    Failed(String),

    #[error("capability timed out: {0}")]
    Timeout(String),

    #[error("invalid capability input: {0}")]
    InvalidInput(String),
}

/// Errors from a [`crate::ContextStore`] backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("context store backend error: {0}")]
    Backend(String),

    #[error("context value could not be serialized: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Errors from an [`crate::EventSink`]. Never fatal to a run.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("event sink unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for CapabilityError {
    fn from(err: StoreError) -> Self {
        CapabilityError::Failed(err.to_string())
    }
}
