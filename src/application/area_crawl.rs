//! Retry-bounded crawl of one partition with proxy rotation
//!
//! ```text
//! create attempt (pending)
//!   -> mark started
//!   -> fetch with current proxy
//!        ok  -> upsert results -> complete attempt        => Succeeded
//!        err -> rotations += 1
//!               rotations < 2 x pool size -> advance proxy, fetch again
//!               otherwise  -> fail attempt                 => Exhausted
//! anything escaping the loop -> fail attempt ("processing error") => Aborted
//! ```
//!
//! Fetches within one partition are strictly sequential: the crawl owns its
//! proxy pool instance and holds one proxy at a time.

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, error, info, warn};

use crate::domain::attempt::AttemptId;
use crate::domain::partition::Partition;
use crate::domain::repositories::PersistenceGateway;
use crate::domain::result_item::{NewResultItem, StoredResultItem};
use crate::domain::search_job::JobId;
use crate::infrastructure::area_scraper::AreaFetcher;
use crate::infrastructure::proxy_pool::ProxyPool;
use crate::infrastructure::scrape_error::FailureKind;

/// Terminal state of one partition crawl.
#[derive(Debug)]
pub enum AreaCrawlOutcome {
    Succeeded {
        attempt_id: AttemptId,
        items: Vec<StoredResultItem>,
        fetches: usize,
    },
    /// Every rotation failed; the attempt is recorded as failed.
    Exhausted { attempt_id: AttemptId, fetches: usize },
    /// An error outside the fetch loop (usually persistence).
    Aborted {
        attempt_id: Option<AttemptId>,
        error: String,
    },
}

impl AreaCrawlOutcome {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    /// Stored items for a successful crawl, empty otherwise.
    #[must_use]
    pub fn into_items(self) -> Vec<StoredResultItem> {
        match self {
            Self::Succeeded { items, .. } => items,
            _ => Vec::new(),
        }
    }
}

#[derive(Clone)]
pub struct AreaCrawl {
    gateway: Arc<dyn PersistenceGateway>,
    fetcher: Arc<dyn AreaFetcher>,
    job_id: JobId,
    query: String,
}

impl AreaCrawl {
    pub fn new(
        gateway: Arc<dyn PersistenceGateway>,
        fetcher: Arc<dyn AreaFetcher>,
        job_id: JobId,
        query: impl Into<String>,
    ) -> Self {
        Self { gateway, fetcher, job_id, query: query.into() }
    }

    /// Upper bound on fetches for one partition.
    #[must_use]
    pub fn rotation_cap(pool: &ProxyPool) -> usize {
        2 * pool.len()
    }

    /// Runs the partition to a terminal state. Never returns an error: every
    /// failure ends up recorded on the partition attempt.
    pub async fn run(&self, partition: &Partition, pool: &mut ProxyPool) -> AreaCrawlOutcome {
        let attempt_id = match self
            .gateway
            .create_attempt(self.job_id, partition, &self.query, pool.current())
            .await
        {
            Ok(id) => id,
            Err(e) => {
                error!(
                    job_id = %self.job_id,
                    partition = %partition.param,
                    "Failed to create partition attempt: {:#}",
                    e
                );
                return AreaCrawlOutcome::Aborted { attempt_id: None, error: format!("{e:#}") };
            }
        };

        match self.fetch_with_rotation(attempt_id, partition, pool).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let message = format!("processing error: {e:#}");
                error!(
                    job_id = %self.job_id,
                    partition = %partition.param,
                    attempt = attempt_id,
                    "❌ {}",
                    message
                );
                if let Err(record_err) =
                    self.gateway.fail_attempt(attempt_id, &message, pool.current()).await
                {
                    error!(
                        attempt = attempt_id,
                        "Failed to record attempt failure: {:#}",
                        record_err
                    );
                }
                AreaCrawlOutcome::Aborted { attempt_id: Some(attempt_id), error: message }
            }
        }
    }

    async fn fetch_with_rotation(
        &self,
        attempt_id: AttemptId,
        partition: &Partition,
        pool: &mut ProxyPool,
    ) -> Result<AreaCrawlOutcome> {
        let cap = Self::rotation_cap(pool);
        let mut rotations = 0;

        self.gateway.mark_attempt_started(attempt_id, pool.current()).await?;

        loop {
            let proxy_label = pool.current().label();
            debug!(partition = %partition.param, proxy = %proxy_label, "Fetching partition");

            let error = match self.fetcher.fetch(pool.current(), partition, &self.query).await {
                Ok(raw) => {
                    let found = raw.len();
                    let items: Vec<NewResultItem> =
                        raw.into_iter().map(NewResultItem::from_raw).collect();
                    let stored =
                        self.gateway.upsert_results(self.job_id, &self.query, &items).await?;
                    self.gateway.complete_attempt(attempt_id, found, pool.current()).await?;
                    info!(
                        job_id = %self.job_id,
                        partition = %partition.param,
                        proxy = %proxy_label,
                        "✅ {} items from {}",
                        found,
                        partition.display_name()
                    );
                    return Ok(AreaCrawlOutcome::Succeeded {
                        attempt_id,
                        items: stored,
                        fetches: rotations + 1,
                    });
                }
                Err(e) => e,
            };

            rotations += 1;
            let reason = match error.kind() {
                FailureKind::RateLimited => "Rate limited",
                FailureKind::Extraction => "Page extraction failed",
                FailureKind::Transient => "Fetch failed",
            };
            warn!(
                partition = %partition.param,
                proxy = %proxy_label,
                "{} ({}/{}): {}",
                reason,
                rotations,
                cap,
                error
            );

            if rotations >= cap {
                let message = format!("all proxies failed ({rotations} attempts): {error}");
                self.gateway.fail_attempt(attempt_id, &message, pool.current()).await?;
                warn!(
                    job_id = %self.job_id,
                    partition = %partition.param,
                    "🚫 Partition exhausted after {} attempts",
                    rotations
                );
                return Ok(AreaCrawlOutcome::Exhausted { attempt_id, fetches: rotations });
            }

            let next = pool.advance();
            debug!(partition = %partition.param, "Rotating to proxy {}", next.label());
        }
    }
}
