//! SQLite implementation of the persistence gateway

use std::collections::{BTreeMap, HashMap};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteQueryResult, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::domain::attempt::{AttemptFailure, AttemptId, AttemptState, format_error_message};
use crate::domain::job_status::JobStatus;
use crate::domain::partition::{NewPartition, Partition};
use crate::domain::proxy::ProxyDescriptor;
use crate::domain::repositories::PersistenceGateway;
use crate::domain::result_item::{
    NewResultItem, ResultPage, ResultQuery, ResultSort, ResultView, StoredResultItem,
};
use crate::domain::search_job::{JobId, SearchJob};

const RESULT_COLUMNS: &str = "id, query, title, price, link, thumbnail, location, sido, dong_id, \
     status, content, nickname, nickname_id, category_id, created_at_origin, boosted_at, \
     created_at, updated_at";

pub struct SqliteGateway {
    pool: SqlitePool,
}

impl SqliteGateway {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts or refreshes partition reference rows, keyed by `param`.
    pub async fn seed_partitions(&self, partitions: &[NewPartition]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut written = 0;
        for p in partitions {
            written += sqlx::query(
                "INSERT INTO partitions (sido, sigungu, dong, param, dong_id) VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT(param) DO UPDATE SET
                    sido = excluded.sido, sigungu = excluded.sigungu,
                    dong = excluded.dong, dong_id = excluded.dong_id",
            )
            .bind(&p.sido)
            .bind(&p.sigungu)
            .bind(&p.dong)
            .bind(&p.param)
            .bind(p.dong_id)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to seed partition {}", p.param))?
            .rows_affected();
        }
        tx.commit().await?;
        Ok(written)
    }
}

fn ensure_attempt_updated(result: &SqliteQueryResult, attempt_id: AttemptId) -> Result<()> {
    if result.rows_affected() == 0 {
        bail!("Partition attempt {attempt_id} not found");
    }
    Ok(())
}

fn job_from_row(row: &SqliteRow) -> Result<SearchJob> {
    let id: String = row.try_get("id")?;
    Ok(SearchJob {
        id: id.parse().with_context(|| format!("Corrupt job id: {id}"))?,
        query: row.try_get("query")?,
        requester: row.try_get("requester")?,
        created_at: row.try_get("created_at")?,
    })
}

fn result_from_row(row: &SqliteRow) -> Result<StoredResultItem> {
    Ok(StoredResultItem {
        id: row.try_get("id")?,
        query: row.try_get("query")?,
        title: row.try_get("title")?,
        price: row.try_get("price")?,
        link: row.try_get("link")?,
        thumbnail: row.try_get("thumbnail")?,
        location: row.try_get("location")?,
        sido: row.try_get("sido")?,
        dong_id: row.try_get("dong_id")?,
        status: row.try_get("status")?,
        content: row.try_get("content")?,
        nickname: row.try_get("nickname")?,
        nickname_id: row.try_get("nickname_id")?,
        category_id: row.try_get("category_id")?,
        created_at_origin: row.try_get("created_at_origin")?,
        boosted_at: row.try_get("boosted_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn push_result_filters(builder: &mut QueryBuilder<'_, Sqlite>, query: &str, options: &ResultQuery) {
    builder.push(" WHERE query = ").push_bind(query.to_string());
    if options.only_available {
        builder.push(" AND (status IS NULL OR status = '' OR status = 'Ongoing')");
    }
    if !options.category_ids.is_empty() {
        builder.push(" AND category_id IN (");
        let mut ids = builder.separated(", ");
        for id in &options.category_ids {
            ids.push_bind(*id);
        }
        builder.push(")");
    }
    if let Some(sido) = &options.sido {
        builder.push(" AND sido = ").push_bind(sido.clone());
    }
}

#[async_trait]
impl PersistenceGateway for SqliteGateway {
    async fn load_partitions(&self) -> Result<Vec<Partition>> {
        let rows = sqlx::query(
            "SELECT id, sido, sigungu, dong, param, dong_id FROM partitions ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to load partitions")?;

        rows.iter()
            .map(|row| {
                Ok(Partition {
                    id: row.try_get("id")?,
                    sido: row.try_get("sido")?,
                    sigungu: row.try_get("sigungu")?,
                    dong: row.try_get("dong")?,
                    param: row.try_get("param")?,
                    dong_id: row.try_get("dong_id")?,
                })
            })
            .collect()
    }

    async fn create_job(&self, job: &SearchJob) -> Result<()> {
        sqlx::query(
            "INSERT INTO search_jobs (id, query, requester, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(job.id.to_string())
        .bind(&job.query)
        .bind(&job.requester)
        .bind(job.created_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to create search job for '{}'", job.query))?;
        Ok(())
    }

    async fn find_job(&self, job_id: JobId) -> Result<Option<SearchJob>> {
        let row = sqlx::query(
            "SELECT id, query, requester, created_at FROM search_jobs WHERE id = ?",
        )
        .bind(job_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn latest_job_for_query(&self, query: &str) -> Result<Option<SearchJob>> {
        let row = sqlx::query(
            "SELECT id, query, requester, created_at FROM search_jobs
             WHERE query = ? ORDER BY created_at DESC LIMIT 1",
        )
        .bind(query)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn recent_queries(&self, requester: &str, limit: u32) -> Result<Vec<SearchJob>> {
        // 같은 검색어는 가장 최근 작업 하나만
        let rows = sqlx::query(
            "SELECT j.id, j.query, j.requester, j.created_at FROM search_jobs j
             WHERE j.requester = ?
               AND j.created_at = (
                   SELECT MAX(created_at) FROM search_jobs
                   WHERE requester = j.requester AND query = j.query)
             ORDER BY j.created_at DESC LIMIT ?",
        )
        .bind(requester)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(job_from_row).collect()
    }

    async fn create_attempt(
        &self,
        job_id: JobId,
        partition: &Partition,
        query: &str,
        proxy: &ProxyDescriptor,
    ) -> Result<AttemptId> {
        let attempt_id: AttemptId = sqlx::query_scalar(
            "INSERT INTO partition_attempts
                (job_id, partition_id, query, param, state, is_completed,
                 proxy_provider, proxy_endpoint, proxy_country, proxy_ip, created_at)
             VALUES (?, ?, ?, ?, 'pending', 0, ?, ?, ?, ?, ?)
             ON CONFLICT(job_id, partition_id) DO UPDATE SET
                state = 'pending', is_completed = 0, start_time = NULL, end_time = NULL,
                items_count = 0, error_message = NULL,
                proxy_provider = excluded.proxy_provider, proxy_endpoint = excluded.proxy_endpoint,
                proxy_country = excluded.proxy_country, proxy_ip = excluded.proxy_ip,
                updated_at = excluded.created_at
             RETURNING id",
        )
        .bind(job_id.to_string())
        .bind(partition.id)
        .bind(query)
        .bind(&partition.param)
        .bind(proxy.provider.as_str())
        .bind(proxy.endpoint())
        .bind(&proxy.country)
        .bind(&proxy.public_ip)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("Failed to create attempt for partition {}", partition.param))?;
        Ok(attempt_id)
    }

    async fn mark_attempt_started(
        &self,
        attempt_id: AttemptId,
        proxy: &ProxyDescriptor,
    ) -> Result<()> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE partition_attempts SET
                state = ?, start_time = ?, updated_at = ?,
                proxy_provider = ?, proxy_endpoint = ?, proxy_country = ?, proxy_ip = ?
             WHERE id = ?",
        )
        .bind(AttemptState::Started.as_str())
        .bind(now)
        .bind(now)
        .bind(proxy.provider.as_str())
        .bind(proxy.endpoint())
        .bind(&proxy.country)
        .bind(&proxy.public_ip)
        .bind(attempt_id)
        .execute(&self.pool)
        .await?;
        ensure_attempt_updated(&result, attempt_id)
    }

    async fn complete_attempt(
        &self,
        attempt_id: AttemptId,
        item_count: usize,
        proxy: &ProxyDescriptor,
    ) -> Result<()> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE partition_attempts SET
                state = ?, is_completed = 1, end_time = ?, items_count = ?,
                error_message = NULL, updated_at = ?,
                proxy_provider = ?, proxy_endpoint = ?, proxy_country = ?, proxy_ip = ?
             WHERE id = ?",
        )
        .bind(AttemptState::Completed.as_str())
        .bind(now)
        .bind(i64::try_from(item_count).unwrap_or(i64::MAX))
        .bind(now)
        .bind(proxy.provider.as_str())
        .bind(proxy.endpoint())
        .bind(&proxy.country)
        .bind(&proxy.public_ip)
        .bind(attempt_id)
        .execute(&self.pool)
        .await?;
        ensure_attempt_updated(&result, attempt_id)
    }

    async fn fail_attempt(
        &self,
        attempt_id: AttemptId,
        error_message: &str,
        proxy: &ProxyDescriptor,
    ) -> Result<()> {
        // 실패한 시도는 end_time 을 남기지 않는다
        let result = sqlx::query(
            "UPDATE partition_attempts SET
                state = ?, is_completed = 0, end_time = NULL, error_message = ?, updated_at = ?,
                proxy_provider = ?, proxy_endpoint = ?, proxy_country = ?, proxy_ip = ?
             WHERE id = ?",
        )
        .bind(AttemptState::Failed.as_str())
        .bind(format_error_message(error_message))
        .bind(Utc::now())
        .bind(proxy.provider.as_str())
        .bind(proxy.endpoint())
        .bind(&proxy.country)
        .bind(&proxy.public_ip)
        .bind(attempt_id)
        .execute(&self.pool)
        .await?;
        ensure_attempt_updated(&result, attempt_id)
    }

    async fn upsert_results(
        &self,
        job_id: JobId,
        query: &str,
        items: &[NewResultItem],
    ) -> Result<Vec<StoredResultItem>> {
        let mut tx = self.pool.begin().await?;
        let mut sido_by_dong: HashMap<String, Option<String>> = HashMap::new();
        let mut stored = Vec::with_capacity(items.len());

        for item in items {
            let sido = match sido_by_dong.get(&item.location) {
                Some(cached) => cached.clone(),
                None => {
                    let found: Option<String> =
                        sqlx::query_scalar("SELECT sido FROM partitions WHERE dong = ? LIMIT 1")
                            .bind(&item.location)
                            .fetch_optional(&mut *tx)
                            .await?;
                    sido_by_dong.insert(item.location.clone(), found.clone());
                    found
                }
            };

            let sql = format!(
                "INSERT INTO search_results
                    (id, query, title, price, link, thumbnail, location, sido, dong_id, status,
                     content, nickname, nickname_id, category_thumbnail, category_id,
                     created_at_origin, boosted_at, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL)
                 ON CONFLICT(link) DO UPDATE SET
                    query = excluded.query, title = excluded.title, price = excluded.price,
                    thumbnail = excluded.thumbnail, location = excluded.location,
                    sido = COALESCE(excluded.sido, search_results.sido),
                    dong_id = excluded.dong_id, status = excluded.status,
                    content = excluded.content,
                    nickname = excluded.nickname, nickname_id = excluded.nickname_id,
                    category_thumbnail = excluded.category_thumbnail,
                    category_id = excluded.category_id,
                    created_at_origin =
                        COALESCE(excluded.created_at_origin, search_results.created_at_origin),
                    boosted_at = excluded.boosted_at,
                    updated_at = excluded.created_at
                 RETURNING {RESULT_COLUMNS}"
            );
            let row = sqlx::query(&sql)
                .bind(Uuid::new_v4().to_string())
                .bind(query)
                .bind(&item.title)
                .bind(item.price)
                .bind(&item.link)
                .bind(&item.thumbnail)
                .bind(&item.location)
                .bind(&sido)
                .bind(item.dong_id)
                .bind(&item.status)
                .bind(&item.content)
                .bind(&item.nickname)
                .bind(item.nickname_id)
                .bind(&item.category_thumbnail)
                .bind(item.category_id)
                .bind(item.created_at_origin)
                .bind(item.boosted_at)
                .bind(Utc::now())
                .fetch_one(&mut *tx)
                .await
                .with_context(|| format!("Failed to upsert result {}", item.link))?;
            stored.push(result_from_row(&row)?);
        }

        tx.commit().await?;
        debug!(job_id = %job_id, "Upserted {} results for '{}'", stored.len(), query);
        Ok(stored)
    }

    async fn search_results(&self, job_id: JobId, options: &ResultQuery) -> Result<ResultPage> {
        let Some(job) = self.find_job(job_id).await? else {
            bail!("Search job {job_id} not found");
        };

        let job_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM search_jobs WHERE query = ?")
            .bind(&job.query)
            .fetch_one(&self.pool)
            .await?;
        let has_previous_search = job_count >= 2;

        let page = options.effective_page();
        let page_size = options.effective_page_size();

        let mut count_query = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM search_results");
        push_result_filters(&mut count_query, &job.query, options);
        let total: i64 = count_query.build_query_scalar().fetch_one(&self.pool).await?;

        let mut items_query =
            QueryBuilder::<Sqlite>::new(format!("SELECT {RESULT_COLUMNS} FROM search_results"));
        push_result_filters(&mut items_query, &job.query, options);
        items_query.push(match options.sort {
            ResultSort::CreatedAtDesc => " ORDER BY created_at_origin DESC, created_at DESC",
            ResultSort::PriceAsc => " ORDER BY price IS NULL, price ASC",
        });
        items_query
            .push(" LIMIT ")
            .push_bind(i64::from(page_size))
            .push(" OFFSET ")
            .push_bind(i64::from(page - 1) * i64::from(page_size));
        let rows = items_query.build().fetch_all(&self.pool).await?;

        let items = rows
            .iter()
            .map(|row| {
                let item = result_from_row(row)?;
                let is_new = has_previous_search && item.created_at > job.created_at;
                Ok(ResultView { item, is_new })
            })
            .collect::<Result<Vec<_>>>()?;

        let category_rows: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT category_id, COUNT(*) FROM search_results
             WHERE query = ? AND category_id IS NOT NULL GROUP BY category_id",
        )
        .bind(&job.query)
        .fetch_all(&self.pool)
        .await?;
        let category_counts: BTreeMap<i64, i64> = category_rows.into_iter().collect();

        let per_page = i64::from(page_size);
        let pages = if total == 0 { 0 } else { (total + per_page - 1) / per_page };
        Ok(ResultPage {
            items,
            total,
            page,
            page_size,
            pages,
            has_next: i64::from(page) < pages,
            has_prev: page > 1,
            category_counts,
        })
    }

    async fn job_status(&self, job_id: JobId) -> Result<JobStatus> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total,
                    COALESCE(SUM(CASE WHEN state = 'completed' THEN 1 ELSE 0 END), 0) AS succeeded,
                    COALESCE(SUM(CASE WHEN state = 'failed' THEN 1 ELSE 0 END), 0) AS failed,
                    COALESCE(SUM(items_count), 0) AS total_items
             FROM partition_attempts WHERE job_id = ?",
        )
        .bind(job_id.to_string())
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("Failed to aggregate status of job {job_id}"))?;

        Ok(JobStatus::from_counts(
            row.try_get("total")?,
            row.try_get("succeeded")?,
            row.try_get("failed")?,
            row.try_get("total_items")?,
        ))
    }

    async fn failed_attempts(&self, job_id: JobId) -> Result<Vec<AttemptFailure>> {
        let rows = sqlx::query(
            "SELECT id, partition_id, param, query, error_message, start_time, end_time,
                    is_completed
             FROM partition_attempts
             WHERE job_id = ? AND error_message IS NOT NULL
             ORDER BY id",
        )
        .bind(job_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(AttemptFailure {
                    attempt_id: row.try_get("id")?,
                    partition_id: row.try_get("partition_id")?,
                    param: row.try_get("param")?,
                    query: row.try_get("query")?,
                    error_message: row.try_get("error_message")?,
                    start_time: row.try_get::<Option<DateTime<Utc>>, _>("start_time")?,
                    end_time: row.try_get::<Option<DateTime<Utc>>, _>("end_time")?,
                    is_completed: row.try_get("is_completed")?,
                })
            })
            .collect()
    }
}
