//! Test doubles shared by the application unit tests

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::attempt::{AttemptFailure, AttemptId, AttemptState};
use crate::domain::job_status::JobStatus;
use crate::domain::partition::Partition;
use crate::domain::proxy::ProxyDescriptor;
use crate::domain::repositories::PersistenceGateway;
use crate::domain::result_item::{
    NewResultItem, RawItem, ResultPage, ResultQuery, ResultView, StoredResultItem,
};
use crate::domain::search_job::{JobId, NormalizedQuery, SearchJob};
use crate::infrastructure::area_scraper::AreaFetcher;
use crate::infrastructure::proxy_pool::ProxyPool;
use crate::infrastructure::scrape_error::ScrapeError;

pub(crate) fn partitions(count: usize) -> Vec<Partition> {
    (0..count)
        .map(|i| Partition {
            id: i as i64 + 1,
            sido: "서울특별시".into(),
            sigungu: Some("강남구".into()),
            dong: format!("동{i}"),
            param: format!("동{i}-{}", 6000 + i),
            dong_id: Some(6000 + i as i64),
        })
        .collect()
}

pub(crate) fn pool_of(count: u16) -> ProxyPool {
    ProxyPool::new(crate::infrastructure::proxy_pool::tests::descriptors(count)).unwrap()
}

pub(crate) fn raw_item(param: &str, n: usize) -> RawItem {
    RawItem {
        title: format!("매물 {n}"),
        price: Some(format!("{}", 1000 * n)),
        link: format!("https://www.daangn.com/kr/buy-sell/item-{param}-{n}"),
        location: param.split('-').next().unwrap_or_default().to_string(),
        status: Some("Ongoing".into()),
        ..RawItem::default()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct AttemptRecord {
    pub id: AttemptId,
    pub job_id: JobId,
    pub partition_id: i64,
    pub param: String,
    pub query: String,
    pub state: AttemptState,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub items_count: i64,
    pub error_message: Option<String>,
    pub proxy_port: u16,
}

#[derive(Default)]
struct Store {
    jobs: Vec<SearchJob>,
    attempts: Vec<AttemptRecord>,
    results: HashMap<String, StoredResultItem>,
}

/// Gateway kept entirely in memory. Safe under paused tokio time.
#[derive(Default)]
pub(crate) struct InMemoryGateway {
    pub partitions: Vec<Partition>,
    store: Mutex<Store>,
    status_script: Mutex<VecDeque<JobStatus>>,
    pub fail_upserts: AtomicBool,
    pub fail_status: AtomicBool,
    pub status_calls: AtomicUsize,
}

impl InMemoryGateway {
    pub(crate) fn with_partitions(partitions: Vec<Partition>) -> Self {
        Self { partitions, ..Self::default() }
    }

    pub(crate) async fn insert_job(&self, query: &str) -> JobId {
        let job = SearchJob::new(JobId::new(), &NormalizedQuery::new(query).unwrap(), None);
        self.create_job(&job).await.unwrap();
        job.id
    }

    pub(crate) fn attempts(&self) -> Vec<AttemptRecord> {
        self.store.lock().unwrap().attempts.clone()
    }

    pub(crate) fn jobs(&self) -> Vec<SearchJob> {
        self.store.lock().unwrap().jobs.clone()
    }

    /// Status reads return these in order; the last one repeats.
    pub(crate) fn script_statuses(&self, statuses: impl IntoIterator<Item = JobStatus>) {
        self.status_script.lock().unwrap().extend(statuses);
    }

    fn update_attempt(
        &self,
        attempt_id: AttemptId,
        apply: impl FnOnce(&mut AttemptRecord),
    ) -> Result<()> {
        let mut store = self.store.lock().unwrap();
        let record = store
            .attempts
            .iter_mut()
            .find(|a| a.id == attempt_id)
            .ok_or_else(|| anyhow!("partition attempt {attempt_id} not found"))?;
        apply(record);
        Ok(())
    }
}

#[async_trait]
impl PersistenceGateway for InMemoryGateway {
    async fn load_partitions(&self) -> Result<Vec<Partition>> {
        Ok(self.partitions.clone())
    }

    async fn create_job(&self, job: &SearchJob) -> Result<()> {
        self.store.lock().unwrap().jobs.push(job.clone());
        Ok(())
    }

    async fn find_job(&self, job_id: JobId) -> Result<Option<SearchJob>> {
        Ok(self.store.lock().unwrap().jobs.iter().find(|j| j.id == job_id).cloned())
    }

    async fn latest_job_for_query(&self, query: &str) -> Result<Option<SearchJob>> {
        let store = self.store.lock().unwrap();
        Ok(store.jobs.iter().filter(|j| j.query == query).max_by_key(|j| j.created_at).cloned())
    }

    async fn recent_queries(&self, requester: &str, limit: u32) -> Result<Vec<SearchJob>> {
        let store = self.store.lock().unwrap();
        let mut jobs: Vec<SearchJob> = store
            .jobs
            .iter()
            .filter(|j| j.requester.as_deref() == Some(requester))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(limit as usize);
        Ok(jobs)
    }

    async fn create_attempt(
        &self,
        job_id: JobId,
        partition: &Partition,
        query: &str,
        proxy: &ProxyDescriptor,
    ) -> Result<AttemptId> {
        let mut store = self.store.lock().unwrap();
        let id = store.attempts.len() as AttemptId + 1;
        store.attempts.push(AttemptRecord {
            id,
            job_id,
            partition_id: partition.id,
            param: partition.param.clone(),
            query: query.to_string(),
            state: AttemptState::Pending,
            start_time: None,
            end_time: None,
            items_count: 0,
            error_message: None,
            proxy_port: proxy.port,
        });
        Ok(id)
    }

    async fn mark_attempt_started(
        &self,
        attempt_id: AttemptId,
        proxy: &ProxyDescriptor,
    ) -> Result<()> {
        self.update_attempt(attempt_id, |a| {
            a.state = AttemptState::Started;
            a.start_time = Some(Utc::now());
            a.proxy_port = proxy.port;
        })
    }

    async fn complete_attempt(
        &self,
        attempt_id: AttemptId,
        item_count: usize,
        proxy: &ProxyDescriptor,
    ) -> Result<()> {
        self.update_attempt(attempt_id, |a| {
            a.state = AttemptState::Completed;
            a.end_time = Some(Utc::now());
            a.items_count = item_count as i64;
            a.proxy_port = proxy.port;
        })
    }

    async fn fail_attempt(
        &self,
        attempt_id: AttemptId,
        error_message: &str,
        proxy: &ProxyDescriptor,
    ) -> Result<()> {
        self.update_attempt(attempt_id, |a| {
            a.state = AttemptState::Failed;
            a.end_time = None;
            a.error_message = Some(error_message.to_string());
            a.proxy_port = proxy.port;
        })
    }

    async fn upsert_results(
        &self,
        _job_id: JobId,
        query: &str,
        items: &[NewResultItem],
    ) -> Result<Vec<StoredResultItem>> {
        if self.fail_upserts.load(Ordering::SeqCst) {
            bail!("upsert rejected");
        }
        let mut store = self.store.lock().unwrap();
        let now = Utc::now();
        let stored = items
            .iter()
            .map(|item| {
                let existing = store.results.get(&item.link);
                let row = StoredResultItem {
                    id: existing.map_or_else(|| uuid::Uuid::new_v4().to_string(), |e| e.id.clone()),
                    query: query.to_string(),
                    title: item.title.clone(),
                    price: item.price,
                    link: item.link.clone(),
                    thumbnail: item.thumbnail.clone(),
                    location: item.location.clone(),
                    sido: None,
                    dong_id: item.dong_id,
                    status: item.status.clone(),
                    content: item.content.clone(),
                    nickname: item.nickname.clone(),
                    nickname_id: item.nickname_id,
                    category_id: item.category_id,
                    created_at_origin: item.created_at_origin,
                    boosted_at: item.boosted_at,
                    created_at: existing.map_or(now, |e| e.created_at),
                    updated_at: existing.map(|_| now),
                };
                store.results.insert(row.link.clone(), row.clone());
                row
            })
            .collect();
        Ok(stored)
    }

    async fn search_results(&self, job_id: JobId, options: &ResultQuery) -> Result<ResultPage> {
        let store = self.store.lock().unwrap();
        let job = store
            .jobs
            .iter()
            .find(|j| j.id == job_id)
            .ok_or_else(|| anyhow!("search job {job_id} not found"))?;
        let mut items: Vec<&StoredResultItem> =
            store.results.values().filter(|r| r.query == job.query).collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let page = options.effective_page();
        let page_size = options.effective_page_size();
        let total = items.len() as i64;
        let pages = (total + i64::from(page_size) - 1) / i64::from(page_size);
        let views = items
            .into_iter()
            .skip(((page - 1) * page_size) as usize)
            .take(page_size as usize)
            .map(|item| ResultView { item: item.clone(), is_new: false })
            .collect();
        Ok(ResultPage {
            items: views,
            total,
            page,
            page_size,
            pages,
            has_next: i64::from(page) < pages,
            has_prev: page > 1,
            category_counts: BTreeMap::new(),
        })
    }

    async fn job_status(&self, job_id: JobId) -> Result<JobStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_status.load(Ordering::SeqCst) {
            bail!("status query failed");
        }
        {
            let mut script = self.status_script.lock().unwrap();
            if script.len() > 1 {
                return Ok(script.pop_front().unwrap_or_default());
            }
            if let Some(last) = script.front() {
                return Ok(*last);
            }
        }
        let store = self.store.lock().unwrap();
        let attempts: Vec<&AttemptRecord> =
            store.attempts.iter().filter(|a| a.job_id == job_id).collect();
        let succeeded =
            attempts.iter().filter(|a| a.state == AttemptState::Completed).count() as i64;
        let failed = attempts.iter().filter(|a| a.state == AttemptState::Failed).count() as i64;
        let items = attempts.iter().map(|a| a.items_count).sum();
        Ok(JobStatus::from_counts(attempts.len() as i64, succeeded, failed, items))
    }

    async fn failed_attempts(&self, job_id: JobId) -> Result<Vec<AttemptFailure>> {
        let store = self.store.lock().unwrap();
        Ok(store
            .attempts
            .iter()
            .filter(|a| a.job_id == job_id && a.state == AttemptState::Failed)
            .map(|a| AttemptFailure {
                attempt_id: a.id,
                partition_id: a.partition_id,
                param: a.param.clone(),
                query: a.query.clone(),
                error_message: a.error_message.clone().unwrap_or_default(),
                start_time: a.start_time,
                end_time: a.end_time,
                is_completed: false,
            })
            .collect())
    }
}

type Script =
    dyn Fn(&ProxyDescriptor, &Partition) -> Result<Vec<RawItem>, ScrapeError> + Send + Sync;

/// Fetcher whose answer is decided by a closure over (proxy, partition).
pub(crate) struct ScriptedFetcher {
    script: Box<Script>,
    delay: Duration,
    calls: Mutex<Vec<(String, u16)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedFetcher {
    pub(crate) fn new(
        script: impl Fn(&ProxyDescriptor, &Partition) -> Result<Vec<RawItem>, ScrapeError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            script: Box::new(script),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn calls(&self) -> Vec<(String, u16)> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn ports_tried(&self) -> Vec<u16> {
        self.calls().into_iter().map(|(_, port)| port).collect()
    }

    pub(crate) fn max_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AreaFetcher for ScriptedFetcher {
    async fn fetch(
        &self,
        proxy: &ProxyDescriptor,
        partition: &Partition,
        _query: &str,
    ) -> Result<Vec<RawItem>, ScrapeError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.calls.lock().unwrap().push((partition.param.clone(), proxy.port));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let outcome = (self.script)(proxy, partition);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}
