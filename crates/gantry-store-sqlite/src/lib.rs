//! SQLite backend for the gantry entity store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! pool without blocking the async runtime. Capability hooks run before the
//! write; the record row, its side records, and their links then commit in a
//! single transaction.

mod cache;
mod encode;
mod schema;
mod store;

pub mod error;

pub use cache::CacheProvider;
pub use error::{Error, Result};
pub use store::SqliteStore;

#[cfg(test)]
mod tests;
