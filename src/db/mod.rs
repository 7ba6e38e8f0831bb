//! Persistent cache: schema and typed store.

pub mod schema;
pub mod store;

pub use store::{CacheStats, CacheStore};
