//! Postgres-backed [`ContextStore`].

use async_trait::async_trait;
use serde_json::Value;

use capabilities::{ContextStore, StoreError};

use crate::repository::context;
use crate::{DbError, DbPool};

#[derive(Debug, Clone)]
pub struct PgContextStore {
    pool: DbPool,
}

impl PgContextStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        StoreError::Backend(err.to_string())
    }
}

#[async_trait]
impl ContextStore for PgContextStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let row = context::get_entry(&self.pool, key).await?;
        Ok(row.map(|r| r.value))
    }

    async fn put(&self, key: &str, value: Value) -> Result<(), StoreError> {
        context::put_entry(&self.pool, key, &value).await?;
        Ok(())
    }
}
