//! Market Sweep - marketplace search fan-out engine
//!
//! A single search query is spread across every geographic partition of the
//! upstream marketplace, each partition is crawled through a rotating pool of
//! egress proxies, and results are merged into one SQLite store while job
//! progress is tracked per partition.

// Module declarations
pub mod domain;
pub mod application;
pub mod infrastructure;

// Re-export the entry points most callers need
pub use application::{SearchHandle, SearchService};
pub use infrastructure::config::AppConfig;
