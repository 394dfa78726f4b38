//! Bounded worker pool driving partition crawls for one job
//!
//! A fixed number of workers pull partitions from one shared queue until it
//! drains. Every dequeued partition gets its own proxy pool seeded at its
//! dispatch index so concurrent crawls start on different proxies.

use std::collections::VecDeque;
use std::ops::AddAssign;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::area_crawl::{AreaCrawl, AreaCrawlOutcome};
use crate::domain::partition::Partition;
use crate::domain::repositories::PersistenceGateway;
use crate::domain::search_job::JobId;
use crate::infrastructure::area_scraper::AreaFetcher;
use crate::infrastructure::proxy_pool::ProxyPool;

/// Per-run tally of partition outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub dispatched: usize,
    pub succeeded: usize,
    pub exhausted: usize,
    pub aborted: usize,
    /// Partitions never dequeued because of shutdown.
    pub skipped: usize,
}

impl DispatchSummary {
    fn record(&mut self, outcome: &AreaCrawlOutcome) {
        self.dispatched += 1;
        match outcome {
            AreaCrawlOutcome::Succeeded { .. } => self.succeeded += 1,
            AreaCrawlOutcome::Exhausted { .. } => self.exhausted += 1,
            AreaCrawlOutcome::Aborted { .. } => self.aborted += 1,
        }
    }
}

impl AddAssign for DispatchSummary {
    fn add_assign(&mut self, other: Self) {
        self.dispatched += other.dispatched;
        self.succeeded += other.succeeded;
        self.exhausted += other.exhausted;
        self.aborted += other.aborted;
        self.skipped += other.skipped;
    }
}

struct QueueState {
    pending: VecDeque<Partition>,
    next_index: usize,
}

/// Shared work queue. Pop hands out the partition together with its
/// dispatch index under one lock.
struct WorkQueue {
    state: Mutex<QueueState>,
}

impl WorkQueue {
    fn new(partitions: Vec<Partition>, first_index: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                pending: partitions.into(),
                next_index: first_index,
            }),
        }
    }

    async fn pop(&self) -> Option<(usize, Partition)> {
        let mut state = self.state.lock().await;
        let partition = state.pending.pop_front()?;
        let index = state.next_index;
        state.next_index += 1;
        Some((index, partition))
    }

    async fn remaining(&self) -> usize {
        self.state.lock().await.pending.len()
    }
}

#[derive(Clone)]
pub struct JobDispatcher {
    gateway: Arc<dyn PersistenceGateway>,
    fetcher: Arc<dyn AreaFetcher>,
    max_concurrent: usize,
    shutdown: CancellationToken,
}

impl JobDispatcher {
    pub fn new(
        gateway: Arc<dyn PersistenceGateway>,
        fetcher: Arc<dyn AreaFetcher>,
        max_concurrent: usize,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            gateway,
            fetcher,
            max_concurrent: max_concurrent.max(1),
            shutdown,
        }
    }

    /// Crawls every partition and returns once the queue has drained (or
    /// shutdown stopped the workers from taking more).
    ///
    /// `first_index` is the dispatch index of `partitions[0]`; the caller
    /// uses index 0 for the partition it crawls itself.
    pub async fn run(
        &self,
        job_id: JobId,
        query: &str,
        partitions: Vec<Partition>,
        pool: &ProxyPool,
        first_index: usize,
    ) -> DispatchSummary {
        let total = partitions.len();
        if total == 0 {
            debug!(job_id = %job_id, "No partitions to dispatch");
            return DispatchSummary::default();
        }

        let workers = self.max_concurrent.min(total);
        info!(job_id = %job_id, "🚀 Dispatching {} partitions over {} workers", total, workers);

        let queue = Arc::new(WorkQueue::new(partitions, first_index));
        let crawl = AreaCrawl::new(
            Arc::clone(&self.gateway),
            Arc::clone(&self.fetcher),
            job_id,
            query,
        );

        let handles: Vec<_> = (0..workers)
            .map(|worker| {
                let queue = Arc::clone(&queue);
                let crawl = crawl.clone();
                let pool = pool.clone();
                let shutdown = self.shutdown.clone();
                tokio::spawn(
                    async move { run_worker(worker, &queue, &crawl, &pool, &shutdown).await },
                )
            })
            .collect();

        let mut summary = DispatchSummary::default();
        for joined in join_all(handles).await {
            match joined {
                Ok(partial) => summary += partial,
                Err(e) => error!(job_id = %job_id, "Crawl worker panicked: {}", e),
            }
        }
        summary.skipped = queue.remaining().await;

        if summary.skipped > 0 {
            warn!(job_id = %job_id, "Shutdown left {} partitions undispatched", summary.skipped);
        }
        info!(
            job_id = %job_id,
            "Dispatch finished: {} dispatched, {} succeeded, {} exhausted, {} aborted",
            summary.dispatched, summary.succeeded, summary.exhausted, summary.aborted
        );
        summary
    }
}

async fn run_worker(
    worker: usize,
    queue: &WorkQueue,
    crawl: &AreaCrawl,
    pool: &ProxyPool,
    shutdown: &CancellationToken,
) -> DispatchSummary {
    let mut summary = DispatchSummary::default();
    loop {
        if shutdown.is_cancelled() {
            debug!(worker, "Shutdown requested, worker stopping");
            break;
        }
        let Some((index, partition)) = queue.pop().await else {
            break;
        };
        let mut seeded = pool.seeded_at(index);
        let outcome = crawl.run(&partition, &mut seeded).await;
        summary.record(&outcome);
    }
    summary
}
