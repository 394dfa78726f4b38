//! Application layer - the crawl orchestration core
//!
//! Admission (dedup registry), per-partition retry with proxy rotation, the
//! bounded worker pool, and the completion tracker, tied together by
//! [`SearchService`].

pub mod area_crawl;
pub mod completion_tracker;
pub mod dedup_registry;
pub mod dispatcher;
pub mod search_service;

#[cfg(test)]
pub(crate) mod testing;

pub use area_crawl::{AreaCrawl, AreaCrawlOutcome};
pub use completion_tracker::{CompletionOutcome, CompletionTracker};
pub use dedup_registry::{Admission, DedupRegistry};
pub use dispatcher::{DispatchSummary, JobDispatcher};
pub use search_service::{SearchError, SearchHandle, SearchService, StatusReport};
