//! HTTP scraper for one geographic partition
//!
//! Each fetch goes out through the proxy the caller currently holds. Clients
//! are built once per proxy endpoint and reused.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::header::{ACCEPT_LANGUAGE, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, StatusCode};
use tokio::sync::RwLock;
use tracing::debug;
use url::Url;

use crate::domain::partition::Partition;
use crate::domain::proxy::ProxyDescriptor;
use crate::domain::result_item::RawItem;
use crate::infrastructure::config::ScraperConfig;
use crate::infrastructure::extraction::PageExtractor;
use crate::infrastructure::proxy_pool::EgressProbe;
use crate::infrastructure::scrape_error::ScrapeError;

/// One fetch-and-extract attempt for a partition.
#[async_trait]
pub trait AreaFetcher: Send + Sync {
    async fn fetch(
        &self,
        proxy: &ProxyDescriptor,
        partition: &Partition,
        query: &str,
    ) -> Result<Vec<RawItem>, ScrapeError>;
}

pub struct MarketplaceScraper {
    config: ScraperConfig,
    base_url: Url,
    headers: HeaderMap,
    extractor: Arc<PageExtractor>,
    clients: RwLock<HashMap<String, Client>>,
}

impl MarketplaceScraper {
    pub fn new(config: ScraperConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .with_context(|| format!("Invalid marketplace base URL: {}", config.base_url))?;

        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent).context("Invalid user agent")?,
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_str(&config.accept_language).context("Invalid accept-language")?,
        );

        Ok(Self {
            config,
            base_url,
            headers,
            extractor: Arc::new(PageExtractor::new()?),
            clients: RwLock::new(HashMap::new()),
        })
    }

    /// `{base}?in={param}&search={query}`
    #[must_use]
    pub fn search_url(&self, param: &str, query: &str) -> Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .clear()
            .append_pair("in", param)
            .append_pair("search", query);
        url
    }

    fn build_client(
        &self,
        proxy: &ProxyDescriptor,
        timeout: Duration,
    ) -> Result<Client, ScrapeError> {
        let upstream = reqwest::Proxy::all(format!("http://{}", proxy.endpoint()))
            .map_err(|e| ScrapeError::InvalidProxy { message: e.to_string() })?
            .basic_auth(&proxy.upstream_username(), &proxy.password);

        Client::builder()
            .proxy(upstream)
            .timeout(timeout)
            .default_headers(self.headers.clone())
            .redirect(reqwest::redirect::Policy::none())
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(|e| ScrapeError::InvalidProxy { message: e.to_string() })
    }

    async fn client_for(&self, proxy: &ProxyDescriptor) -> Result<Client, ScrapeError> {
        let key = format!("{}|{}", proxy.upstream_username(), proxy.endpoint());
        if let Some(client) = self.clients.read().await.get(&key) {
            return Ok(client.clone());
        }
        let client = self.build_client(proxy, self.config.request_timeout())?;
        self.clients.write().await.insert(key, client.clone());
        Ok(client)
    }
}

#[async_trait]
impl AreaFetcher for MarketplaceScraper {
    async fn fetch(
        &self,
        proxy: &ProxyDescriptor,
        partition: &Partition,
        query: &str,
    ) -> Result<Vec<RawItem>, ScrapeError> {
        let url = self.search_url(&partition.param, query);
        let client = self.client_for(proxy).await?;

        debug!(partition = %partition.param, proxy = %proxy.label(), "Fetching {}", url);
        let response = client.get(url.clone()).send().await?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::TOO_MANY_REQUESTS => {
                return Err(ScrapeError::RateLimited { url: url.to_string() });
            }
            status => {
                return Err(ScrapeError::HttpStatus {
                    status: status.as_u16(),
                    url: url.to_string(),
                });
            }
        }

        let body = response.text().await?;
        let extractor = Arc::clone(&self.extractor);
        // HTML 파싱은 블로킹 풀에서 수행
        let items = tokio::task::spawn_blocking(move || extractor.extract(&body))
            .await
            .map_err(|e| ScrapeError::network(format!("extraction task failed: {e}")))??;

        debug!(partition = %partition.param, "Extracted {} items", items.len());
        Ok(items)
    }
}

#[async_trait]
impl EgressProbe for MarketplaceScraper {
    async fn resolve_egress_ip(&self, proxy: &ProxyDescriptor) -> Result<String> {
        let client = self
            .build_client(proxy, self.config.probe_timeout())
            .map_err(|e| anyhow!(e))?;
        let response = client
            .get(&self.config.probe_url)
            .send()
            .await
            .with_context(|| format!("Probe request via {} failed", proxy.endpoint()))?;

        if !response.status().is_success() {
            anyhow::bail!("Probe returned HTTP {}", response.status());
        }

        let body: serde_json::Value = response.json().await.context("Probe response is not JSON")?;
        body.get("ip")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Probe response has no 'ip' field"))
    }
}
