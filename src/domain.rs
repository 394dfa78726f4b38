//! Domain module - entities, value objects and collaborator contracts
//!
//! Each module is its own file in the domain/ directory; public exports are
//! defined here for convenience.

pub mod attempt;
pub mod job_status;
pub mod partition;
pub mod proxy;
pub mod repositories;
pub mod result_item;
pub mod search_job;

pub use attempt::{AttemptFailure, AttemptId, AttemptState, format_error_message};
pub use job_status::JobStatus;
pub use partition::{NewPartition, Partition};
pub use proxy::{ProxyDescriptor, ProxyProvider};
pub use repositories::PersistenceGateway;
pub use result_item::{
    NewResultItem, RawItem, ResultPage, ResultQuery, ResultSort, ResultView, StoredResultItem,
};
pub use search_job::{JobId, NormalizedQuery, SearchJob};
