//! steam-degrees: degrees of separation on the Steam friend graph.
//!
//! Breadth-first search from one account towards the nearest member of a
//! target set (Valve employees), caching every friend list in SQLite so that
//! repeated runs cost no requests and Steam's rate limits are respected.

pub mod cli;
pub mod client;
pub mod config;
pub mod db;
pub mod detector;
pub mod error;
pub mod observability;
pub mod report;
pub mod runner;
pub mod steam;
pub mod traversal;
pub mod types;
