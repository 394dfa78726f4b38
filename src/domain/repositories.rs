//! Persistence contract used by the crawl orchestration core
//!
//! The store is the source of truth for job progress: the completion tracker
//! only ever looks at what has been written here.

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::attempt::{AttemptFailure, AttemptId};
use crate::domain::job_status::JobStatus;
use crate::domain::partition::Partition;
use crate::domain::proxy::ProxyDescriptor;
use crate::domain::result_item::{NewResultItem, ResultPage, ResultQuery, StoredResultItem};
use crate::domain::search_job::{JobId, SearchJob};

#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    // Reference data
    async fn load_partitions(&self) -> Result<Vec<Partition>>;

    // Jobs
    async fn create_job(&self, job: &SearchJob) -> Result<()>;
    async fn find_job(&self, job_id: JobId) -> Result<Option<SearchJob>>;
    async fn latest_job_for_query(&self, query: &str) -> Result<Option<SearchJob>>;
    async fn recent_queries(&self, requester: &str, limit: u32) -> Result<Vec<SearchJob>>;

    // Partition attempts
    async fn create_attempt(
        &self,
        job_id: JobId,
        partition: &Partition,
        query: &str,
        proxy: &ProxyDescriptor,
    ) -> Result<AttemptId>;
    async fn mark_attempt_started(
        &self,
        attempt_id: AttemptId,
        proxy: &ProxyDescriptor,
    ) -> Result<()>;
    async fn complete_attempt(
        &self,
        attempt_id: AttemptId,
        item_count: usize,
        proxy: &ProxyDescriptor,
    ) -> Result<()>;
    async fn fail_attempt(
        &self,
        attempt_id: AttemptId,
        error_message: &str,
        proxy: &ProxyDescriptor,
    ) -> Result<()>;

    // Results
    async fn upsert_results(
        &self,
        job_id: JobId,
        query: &str,
        items: &[NewResultItem],
    ) -> Result<Vec<StoredResultItem>>;
    async fn search_results(&self, job_id: JobId, query: &ResultQuery) -> Result<ResultPage>;

    // Progress
    async fn job_status(&self, job_id: JobId) -> Result<JobStatus>;
    async fn failed_attempts(&self, job_id: JobId) -> Result<Vec<AttemptFailure>>;
}
