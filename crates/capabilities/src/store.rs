//! Key-value context store used by capabilities to read and write durable
//! call context. The engine never calls it directly; it only passes the
//! handle through [`crate::InvocationContext`].

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use crate::StoreError;

#[async_trait]
pub trait ContextStore: Send + Sync {
    /// `Ok(None)` when the key is absent.
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Last write wins.
    async fn put(&self, key: &str, value: Value) -> Result<(), StoreError>;
}

/// Process-local store. Contents are lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryContextStore {
    entries: DashMap<String, Value>,
}

impl InMemoryContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl ContextStore for InMemoryContextStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn put(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.entries.insert(key.to_owned(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn missing_key_reads_as_none() {
        let store = InMemoryContextStore::new();
        assert_eq!(store.get("call:42").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn put_overwrites_previous_value() {
        let store = InMemoryContextStore::new();
        store.put("call:42", json!({ "status": "dialing" })).await.unwrap();
        store.put("call:42", json!({ "status": "connected" })).await.unwrap();

        assert_eq!(
            store.get("call:42").await.unwrap(),
            Some(json!({ "status": "connected" }))
        );
        assert_eq!(store.len(), 1);
    }
}
