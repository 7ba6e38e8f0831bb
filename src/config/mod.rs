//! Run configuration: YAML schema, defaults and validation.

pub mod schema;

pub use schema::{CacheConfig, CachedOnly, ClientConfig, RunConfig, TargetConfig, TraversalConfig};
