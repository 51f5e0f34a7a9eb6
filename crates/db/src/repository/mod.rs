//! Repository functions — one function per database operation.
//!
//! Every function takes a Postgres executor (the pool, or a transaction when
//! writes must land together) and returns a `Result<T, DbError>`.
//! No business logic, only SQL.

pub mod context;
pub mod history;
pub mod runs;
