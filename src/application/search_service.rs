//! Search facade: admission, first-partition response, background fan-out
//!
//! The caller gets the first partition's listings right away. Each admitted
//! job runs start to finish on one spawned task whose handle is returned with
//! the response.

use std::sync::Arc;

use anyhow::anyhow;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::area_crawl::AreaCrawl;
use crate::application::completion_tracker::{CompletionOutcome, CompletionTracker};
use crate::application::dedup_registry::{Admission, DedupRegistry};
use crate::application::dispatcher::JobDispatcher;
use crate::domain::attempt::AttemptFailure;
use crate::domain::job_status::JobStatus;
use crate::domain::partition::Partition;
use crate::domain::proxy::ProxyDescriptor;
use crate::domain::repositories::PersistenceGateway;
use crate::domain::result_item::{ResultPage, ResultQuery, StoredResultItem};
use crate::domain::search_job::{JobId, NormalizedQuery, SearchJob};
use crate::infrastructure::area_scraper::AreaFetcher;
use crate::infrastructure::config::{AppConfig, CompletionConfig, DispatchConfig};
use crate::infrastructure::proxy_pool::{EgressProbe, ProxyPool};

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Search query is empty")]
    EmptyQuery,

    #[error("No proxies configured")]
    NoProxies,

    #[error("Persistence error: {0:#}")]
    Persistence(#[from] anyhow::Error),
}

/// Immediate answer to a submitted query.
#[derive(Debug)]
pub struct SearchHandle {
    pub job_id: JobId,
    /// The query was already in flight; `items` come from that job.
    pub reused: bool,
    pub items: Vec<StoredResultItem>,
    /// Background dispatch and tracking, only for newly admitted jobs.
    pub completion: Option<JoinHandle<CompletionOutcome>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub job: Option<SearchJob>,
    pub status: JobStatus,
    pub failures: Vec<AttemptFailure>,
    /// The job still holds its query's registry slot.
    pub in_flight: bool,
}

#[derive(Clone)]
pub struct SearchService {
    gateway: Arc<dyn PersistenceGateway>,
    fetcher: Arc<dyn AreaFetcher>,
    probe: Arc<dyn EgressProbe>,
    registry: Arc<DedupRegistry>,
    proxies: Vec<ProxyDescriptor>,
    dispatch: DispatchConfig,
    completion: CompletionConfig,
    shutdown: CancellationToken,
}

impl SearchService {
    pub fn new(
        gateway: Arc<dyn PersistenceGateway>,
        fetcher: Arc<dyn AreaFetcher>,
        probe: Arc<dyn EgressProbe>,
        registry: Arc<DedupRegistry>,
        config: &AppConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            gateway,
            fetcher,
            probe,
            registry,
            proxies: config.proxies.clone(),
            dispatch: config.dispatch.clone(),
            completion: config.completion.clone(),
            shutdown,
        }
    }

    /// Admits `raw_query` and answers with the first partition's listings.
    ///
    /// A newly admitted job runs on its own task from the start, so the slot
    /// is released by that task even when the caller stops waiting.
    pub async fn submit(
        &self,
        raw_query: &str,
        requester: Option<String>,
    ) -> Result<SearchHandle, SearchError> {
        let query = NormalizedQuery::new(raw_query).ok_or(SearchError::EmptyQuery)?;

        let job_id = match self.registry.admit(&query).await {
            Admission::InFlight(job_id) => {
                info!(
                    job_id = %job_id,
                    "♻️ '{}' is already being crawled, serving current results",
                    query
                );
                return Ok(SearchHandle {
                    job_id,
                    reused: true,
                    items: self.current_items(job_id).await,
                    completion: None,
                });
            }
            Admission::Admitted(job_id) => job_id,
        };

        let (first_tx, first_rx) = oneshot::channel();
        let job = self.clone().run_job(job_id, query.clone(), requester, first_tx);
        let completion = tokio::spawn(job);

        match first_rx.await {
            Ok(Ok(items)) => Ok(SearchHandle {
                job_id,
                reused: false,
                items,
                completion: Some(completion),
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                // 첫 응답 전에 태스크가 죽은 경우
                self.registry.release(&query, job_id).await;
                Err(SearchError::Persistence(anyhow!(
                    "search task for job {job_id} ended before its first response"
                )))
            }
        }
    }

    // 진행 중인 작업의 현재까지 결과 (작업 행이 아직 없으면 빈 목록)
    async fn current_items(&self, job_id: JobId) -> Vec<StoredResultItem> {
        let options = ResultQuery::first(self.dispatch.initial_result_limit);
        match self.gateway.search_results(job_id, &options).await {
            Ok(page) => page.items.into_iter().map(|view| view.item).collect(),
            Err(e) => {
                warn!(job_id = %job_id, "Could not load in-flight results: {:#}", e);
                Vec::new()
            }
        }
    }

    async fn run_job(
        self,
        job_id: JobId,
        query: NormalizedQuery,
        requester: Option<String>,
        first_response: oneshot::Sender<Result<Vec<StoredResultItem>, SearchError>>,
    ) -> CompletionOutcome {
        let (pool, rest, items) = match self.open_job(job_id, &query, requester).await {
            Ok(opened) => opened,
            Err(e) => {
                self.registry.release(&query, job_id).await;
                let outcome = CompletionOutcome::Failed { error: e.to_string() };
                let _ = first_response.send(Err(e));
                return outcome;
            }
        };

        if first_response.send(Ok(items)).is_err() {
            debug!(job_id = %job_id, "Caller stopped waiting; crawl continues in background");
        }

        let dispatcher = JobDispatcher::new(
            Arc::clone(&self.gateway),
            Arc::clone(&self.fetcher),
            self.dispatch.max_concurrent_crawls,
            self.shutdown.clone(),
        );
        dispatcher.run(job_id, query.as_str(), rest, &pool, 1).await;

        CompletionTracker::new(
            Arc::clone(&self.gateway),
            Arc::clone(&self.registry),
            self.completion.clone(),
            self.shutdown.clone(),
        )
        .watch(job_id, &query)
        .await
    }

    /// Creates the job row, probes the pool and crawls the first partition.
    async fn open_job(
        &self,
        job_id: JobId,
        query: &NormalizedQuery,
        requester: Option<String>,
    ) -> Result<(ProxyPool, Vec<Partition>, Vec<StoredResultItem>), SearchError> {
        let mut pool = ProxyPool::new(self.proxies.clone()).ok_or(SearchError::NoProxies)?;

        let job = SearchJob::new(job_id, query, requester);
        self.gateway.create_job(&job).await?;

        let mut partitions = self.gateway.load_partitions().await?;
        if self.dispatch.shuffle_partitions {
            fastrand::shuffle(&mut partitions);
        }
        info!(job_id = %job_id, "🔍 New search '{}' over {} partitions", query, partitions.len());

        pool.probe(self.probe.as_ref()).await;

        let mut partitions = partitions.into_iter();
        let items = match partitions.next() {
            Some(first) => {
                AreaCrawl::new(
                    Arc::clone(&self.gateway),
                    Arc::clone(&self.fetcher),
                    job_id,
                    query.as_str(),
                )
                .run(&first, &mut pool)
                .await
                .into_items()
            }
            None => {
                warn!(job_id = %job_id, "No partitions loaded; nothing to crawl");
                Vec::new()
            }
        };

        Ok((pool, partitions.collect(), items))
    }

    pub async fn status(&self, job_id: JobId) -> Result<StatusReport, SearchError> {
        let job = self.gateway.find_job(job_id).await?;
        let status = self.gateway.job_status(job_id).await?;
        let failures = self.gateway.failed_attempts(job_id).await?;

        let in_flight = match job.as_ref().and_then(|j| NormalizedQuery::new(&j.query)) {
            Some(query) => self.registry.lookup(&query).await == Some(job_id),
            None => false,
        };

        Ok(StatusReport { job, status, failures, in_flight })
    }

    /// The in-flight job for `raw_query`, if any. A slot whose job already has
    /// a resolved attempt for every partition is evicted on the way.
    pub async fn check_active(&self, raw_query: &str) -> Result<Option<JobId>, SearchError> {
        let Some(query) = NormalizedQuery::new(raw_query) else {
            return Ok(None);
        };
        let Some(job_id) = self.registry.lookup(&query).await else {
            return Ok(None);
        };

        let status = self.gateway.job_status(job_id).await?;
        // 디스패치 도중에는 생성된 attempt 만 집계되므로 파티션 수와 비교
        let partitions = self.gateway.load_partitions().await?.len() as i64;
        if status.is_fully_resolved() && status.total >= partitions {
            info!(job_id = %job_id, "Job for '{}' already finished, evicting its slot", query);
            self.registry.release(&query, job_id).await;
            return Ok(None);
        }
        Ok(Some(job_id))
    }

    pub async fn results(
        &self,
        job_id: JobId,
        options: &ResultQuery,
    ) -> Result<ResultPage, SearchError> {
        Ok(self.gateway.search_results(job_id, options).await?)
    }

    pub async fn recent_queries(
        &self,
        requester: &str,
        limit: u32,
    ) -> Result<Vec<SearchJob>, SearchError> {
        Ok(self.gateway.recent_queries(requester, limit).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::testing::{InMemoryGateway, ScriptedFetcher, partitions, raw_item};
    use crate::infrastructure::proxy_pool::tests::descriptors;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::time::Duration;

    struct StaticProbe;

    #[async_trait]
    impl EgressProbe for StaticProbe {
        async fn resolve_egress_ip(&self, _proxy: &ProxyDescriptor) -> Result<String> {
            Ok("203.0.113.10".to_string())
        }
    }

    fn app_config(proxies: u16) -> AppConfig {
        let mut config = AppConfig::default();
        config.proxies = descriptors(proxies);
        config.dispatch.shuffle_partitions = false;
        config.completion.poll_interval_secs = 1;
        config.completion.max_polls = 3;
        config
    }

    fn service(
        gateway: &Arc<InMemoryGateway>,
        fetcher: Arc<ScriptedFetcher>,
        registry: &Arc<DedupRegistry>,
        config: &AppConfig,
    ) -> SearchService {
        SearchService::new(
            gateway.clone(),
            fetcher,
            Arc::new(StaticProbe),
            registry.clone(),
            config,
            CancellationToken::new(),
        )
    }

    fn ok_fetcher() -> Arc<ScriptedFetcher> {
        Arc::new(ScriptedFetcher::new(|_, p| Ok(vec![raw_item(&p.param, 1)])))
    }

    #[tokio::test]
    async fn blank_query_is_rejected() {
        let gateway = Arc::new(InMemoryGateway::default());
        let registry = Arc::new(DedupRegistry::default());
        let service = service(&gateway, ok_fetcher(), &registry, &app_config(1));

        assert!(matches!(service.submit("   ", None).await, Err(SearchError::EmptyQuery)));
    }

    #[tokio::test]
    async fn missing_proxies_release_the_slot() {
        let gateway = Arc::new(InMemoryGateway::with_partitions(partitions(2)));
        let registry = Arc::new(DedupRegistry::default());
        let service = service(&gateway, ok_fetcher(), &registry, &app_config(0));

        assert!(matches!(service.submit("자전거", None).await, Err(SearchError::NoProxies)));
        assert_eq!(registry.in_flight().await, 0);
        assert!(gateway.jobs().is_empty());
    }

    #[tokio::test]
    async fn new_search_returns_first_partition_and_completes() {
        let gateway = Arc::new(InMemoryGateway::with_partitions(partitions(3)));
        let registry = Arc::new(DedupRegistry::default());
        let service = service(&gateway, ok_fetcher(), &registry, &app_config(2));

        let handle = service.submit("  Bike ", Some("user-1".into())).await.unwrap();
        assert!(!handle.reused);
        assert_eq!(handle.items.len(), 1);
        assert!(handle.items[0].link.contains(&gateway.partitions[0].param));

        let outcome = handle.completion.unwrap().await.unwrap();
        assert_eq!(outcome, CompletionOutcome::Complete);

        let report = service.status(handle.job_id).await.unwrap();
        assert_eq!(report.job.unwrap().query, "bike");
        assert_eq!((report.status.total, report.status.completed), (3, 3));
        assert!(report.failures.is_empty());
        assert!(!report.in_flight);

        let recent = service.recent_queries("user-1", 10).await.unwrap();
        assert_eq!(recent.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_submit_reuses_the_in_flight_job() {
        let gateway = Arc::new(InMemoryGateway::with_partitions(partitions(4)));
        let registry = Arc::new(DedupRegistry::default());
        let fetcher = Arc::new(
            ScriptedFetcher::new(|_, p| Ok(vec![raw_item(&p.param, 1)]))
                .with_delay(Duration::from_secs(5)),
        );
        let service = service(&gateway, fetcher, &registry, &app_config(2));

        let first = service.submit("iPhone", None).await.unwrap();
        let second = service.submit("IPHONE ", None).await.unwrap();

        assert!(second.reused);
        assert_eq!(second.job_id, first.job_id);
        assert!(second.completion.is_none());
        assert_eq!(second.items.len(), 1);
        assert_eq!(service.check_active("iphone").await.unwrap(), Some(first.job_id));

        let outcome = first.completion.unwrap().await.unwrap();
        assert_eq!(outcome, CompletionOutcome::Complete);
        assert_eq!(gateway.jobs().len(), 1);
        assert_eq!(service.check_active("iphone").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_submit_still_finishes_and_frees_the_query() {
        let gateway = Arc::new(InMemoryGateway::with_partitions(partitions(3)));
        let registry = Arc::new(DedupRegistry::default());
        let fetcher = Arc::new(
            ScriptedFetcher::new(|_, p| Ok(vec![raw_item(&p.param, 1)]))
                .with_delay(Duration::from_secs(5)),
        );
        let service = service(&gateway, fetcher, &registry, &app_config(2));

        // 첫 파티션이 끝나기 전에 호출자가 포기
        let waited =
            tokio::time::timeout(Duration::from_secs(1), service.submit("bike", None)).await;
        assert!(waited.is_err());
        assert_eq!(registry.in_flight().await, 1);

        tokio::time::sleep(Duration::from_secs(3600)).await;

        assert_eq!(registry.in_flight().await, 0);
        let jobs = gateway.jobs();
        assert_eq!(jobs.len(), 1);
        let status = gateway.job_status(jobs[0].id).await.unwrap();
        assert_eq!((status.total, status.completed), (3, 3));
        assert_eq!(service.check_active("bike").await.unwrap(), None);

        let again = service.submit("bike", None).await.unwrap();
        assert!(!again.reused);
        assert_ne!(again.job_id, jobs[0].id);
    }

    #[tokio::test]
    async fn check_active_evicts_a_finished_job() {
        let gateway = Arc::new(InMemoryGateway::default());
        gateway.script_statuses([JobStatus::from_counts(2, 1, 1, 4)]);
        let registry = Arc::new(DedupRegistry::default());
        let query = NormalizedQuery::new("책상").unwrap();
        registry.admit(&query).await;
        let service = service(&gateway, ok_fetcher(), &registry, &app_config(1));

        assert_eq!(service.check_active("책상").await.unwrap(), None);
        assert_eq!(registry.lookup(&query).await, None);
    }

    #[tokio::test]
    async fn empty_partition_table_still_resolves() {
        let gateway = Arc::new(InMemoryGateway::default());
        let registry = Arc::new(DedupRegistry::default());
        let service = service(&gateway, ok_fetcher(), &registry, &app_config(1));

        let handle = service.submit("아무거나", None).await.unwrap();
        assert!(handle.items.is_empty());
        assert_eq!(handle.completion.unwrap().await.unwrap(), CompletionOutcome::Empty);
        assert_eq!(registry.in_flight().await, 0);
    }
}
