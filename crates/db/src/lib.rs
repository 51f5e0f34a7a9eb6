//! `db` crate — Postgres persistence for runs, their history, and the
//! key-value context store.
//!
//! Repository functions are plain SQL. The two adapters, [`PgCheckpointer`]
//! and [`PgContextStore`], plug them into the engine's and capabilities'
//! traits.

pub mod checkpointer;
pub mod context_store;
pub mod error;
pub mod models;
pub mod pool;
pub mod repository;

pub use checkpointer::PgCheckpointer;
pub use context_store::PgContextStore;
pub use error::DbError;
pub use pool::DbPool;
